// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Guest identity metadata
//!
//! Images are imported with a JSON document stored in the `<description>`
//! element of their libvirt domain XML. A capture cannot start without it.

use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Domain XML is malformed: {0}")]
    Xml(String),

    #[error("Domain XML has no <description> element holding the guest metadata")]
    MissingDescription,

    #[error("Guest metadata is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("Guest metadata must be a JSON object")]
    NotAnObject,

    #[error("Guest metadata has no release_date string")]
    MissingReleaseDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuestMetadata {
    pub release_date: String,
    /// Remaining keys, kept verbatim
    pub extra: Map<String, Value>,
}

impl GuestMetadata {
    pub fn from_domain_xml(xml: &str) -> Result<Self, MetadataError> {
        let description = domain_description(xml)?.ok_or(MetadataError::MissingDescription)?;
        Self::from_json(&description)
    }

    pub fn from_json(text: &str) -> Result<Self, MetadataError> {
        let value: Value = serde_json::from_str(text.trim()).map_err(MetadataError::InvalidJson)?;
        let Value::Object(mut extra) = value else {
            return Err(MetadataError::NotAnObject);
        };
        let release_date = match extra.remove("release_date") {
            Some(Value::String(date)) if !date.trim().is_empty() => date,
            _ => return Err(MetadataError::MissingReleaseDate),
        };
        Ok(Self { release_date, extra })
    }
}

/// Text of the top-level `<description>` element, `None` if absent
pub fn domain_description(xml: &str) -> Result<Option<String>, MetadataError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut depth = 0usize;
    let mut capturing = false;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => {
                depth += 1;
                if depth == 2 && e.name().as_ref() == b"description" {
                    capturing = true;
                }
            }
            Ok(XmlEvent::End(_)) => {
                if capturing && depth == 2 {
                    return Ok(Some(text));
                }
                depth = depth.saturating_sub(1);
            }
            Ok(XmlEvent::Empty(e)) => {
                if depth == 1 && e.name().as_ref() == b"description" {
                    return Ok(Some(String::new()));
                }
            }
            Ok(XmlEvent::Text(t)) if capturing => {
                let unescaped = t
                    .unescape()
                    .map_err(|e| MetadataError::Xml(e.to_string()))?;
                text.push_str(&unescaped);
            }
            Ok(XmlEvent::CData(c)) if capturing => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(XmlEvent::Eof) => return Ok(None),
            Err(e) => {
                return Err(MetadataError::Xml(format!(
                    "at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }
}
