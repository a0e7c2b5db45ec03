// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Libvirt Domain Controller
//!
//! Powers on a disposable copy-on-write clone of the source domain so a
//! capture never writes to the original disk image.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements `DomainController` over `virsh` and `qemu-img`
//!
//! # Clone layout
//!
//! ```text
//! <storage_dir>/oswatcher-XXXX/
//!   ├── <domain>-osw-<id>.qcow2   overlay, backing file = source disk
//!   └── <domain>-osw-<id>.xml     rewritten domain XML given to `virsh create`
//! ```
//!
//! The temporary directory is removed when the clone is powered off or the
//! controller is dropped.

use async_trait::async_trait;
use parking_lot::Mutex;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::capture_config::ConnectionConfig;
use crate::domain::controller::{DomainController, DomainError};
use crate::infrastructure::process::{display_command, run_command, RunFailure};
use crate::infrastructure::virsh::VirshClient;

const QEMU_IMG_TIMEOUT: Duration = Duration::from_secs(300);

/// File-backed disk of a domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSource {
    pub path: PathBuf,
    /// Image format from `<driver type=...>`, qcow2 when absent
    pub format: String,
}

struct ActiveDomain {
    name: String,
    // Held for its Drop
    _storage: Option<TempDir>,
}

pub struct VirshDomainController {
    virsh: VirshClient,
    qemu_img_path: PathBuf,
    domain: String,
    clone: bool,
    storage_dir: Option<PathBuf>,
    active: Mutex<Option<ActiveDomain>>,
}

impl VirshDomainController {
    pub fn new(domain: impl Into<String>, virsh: VirshClient, qemu_img_path: impl Into<PathBuf>) -> Self {
        Self {
            virsh,
            qemu_img_path: qemu_img_path.into(),
            domain: domain.into(),
            clone: true,
            storage_dir: None,
            active: Mutex::new(None),
        }
    }

    pub fn from_config(domain: impl Into<String>, config: &ConnectionConfig) -> Self {
        let mut controller = Self::new(
            domain,
            VirshClient::new(config.uri.clone(), config.virsh_path.clone()),
            config.qemu_img_path.clone(),
        );
        controller.clone = config.clone;
        controller.storage_dir = config.storage_dir.clone();
        controller
    }

    /// Name of the domain currently powered on by this controller
    pub fn active_domain(&self) -> Option<String> {
        self.active.lock().as_ref().map(|a| a.name.clone())
    }

    fn create_storage(&self) -> Result<TempDir, DomainError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("oswatcher-");
        let dir = match &self.storage_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    async fn create_overlay(&self, backing: &DiskSource, overlay: &Path) -> Result<(), DomainError> {
        let args = [
            "create".to_string(),
            "-f".to_string(),
            "qcow2".to_string(),
            "-F".to_string(),
            backing.format.clone(),
            "-b".to_string(),
            backing.path.to_string_lossy().to_string(),
            overlay.to_string_lossy().to_string(),
        ];
        let command = display_command(&self.qemu_img_path, &args);
        let output = run_command(&self.qemu_img_path, &args, Some(QEMU_IMG_TIMEOUT))
            .await
            .map_err(|failure| match failure {
                RunFailure::Spawn(source) => DomainError::Spawn {
                    command: command.clone(),
                    source,
                },
                RunFailure::TimedOut => DomainError::Command {
                    command: command.clone(),
                    status: None,
                    stderr: "timed out".to_string(),
                },
            })?;
        if !output.success {
            return Err(DomainError::Command {
                command,
                status: output.status,
                stderr: output.stderr,
            });
        }
        Ok(())
    }

    async fn start_clone(&self) -> Result<ActiveDomain, DomainError> {
        let xml = self.virsh.dumpxml(&self.domain).await?;
        let disk = first_disk_source(&xml)?.ok_or_else(|| DomainError::NoDisk(self.domain.clone()))?;

        let short = Uuid::new_v4().simple().to_string()[..8].to_string();
        let clone_name = format!("{}-osw-{}", self.domain, short);
        let storage = self.create_storage()?;
        let overlay = storage.path().join(format!("{}.qcow2", clone_name));

        info!(
            "Creating copy-on-write overlay {} on top of {}",
            overlay.display(),
            disk.path.display()
        );
        self.create_overlay(&disk, &overlay).await?;

        let clone_xml = rewrite_for_clone(&xml, &clone_name, &overlay)?;
        let xml_path = storage.path().join(format!("{}.xml", clone_name));
        tokio::fs::write(&xml_path, clone_xml).await?;

        self.virsh.create(&xml_path).await?;
        info!("Started transient clone {} of {}", clone_name, self.domain);
        Ok(ActiveDomain {
            name: clone_name,
            _storage: Some(storage),
        })
    }
}

#[async_trait]
impl DomainController for VirshDomainController {
    fn domain_name(&self) -> &str {
        &self.domain
    }

    fn running_domain(&self) -> Option<String> {
        self.active_domain()
    }

    async fn power_on(&self) -> Result<(), DomainError> {
        if let Some(name) = self.active_domain() {
            return Err(DomainError::AlreadyRunning(name));
        }

        let active = if self.clone {
            self.start_clone().await?
        } else {
            warn!("Cloning disabled: starting {} in place", self.domain);
            self.virsh.start(&self.domain).await?;
            ActiveDomain {
                name: self.domain.clone(),
                _storage: None,
            }
        };
        *self.active.lock() = Some(active);
        Ok(())
    }

    async fn power_off(&self) -> Result<(), DomainError> {
        let name = self
            .active_domain()
            .ok_or_else(|| DomainError::NotRunning(self.domain.clone()))?;
        // Stays active until destroyed, so a failed destroy can be retried
        self.virsh.destroy(&name).await?;
        self.active.lock().take();
        debug!("Destroyed {}", name);
        Ok(())
    }

    async fn configuration_description(&self) -> Result<String, DomainError> {
        self.virsh.dumpxml(&self.domain).await
    }
}

fn xml_error(e: impl std::fmt::Display) -> DomainError {
    DomainError::Xml(e.to_string())
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Result<Option<String>, DomainError> {
    for attr in e.attributes() {
        let attr = attr.map_err(xml_error)?;
        if attr.key.as_ref() == key.as_bytes() {
            return Ok(Some(attr.unescape_value().map_err(xml_error)?.to_string()));
        }
    }
    Ok(None)
}

/// Copy `e`, replacing (or adding) attribute `key`
fn with_attribute(e: &BytesStart<'_>, key: &str, value: &str) -> Result<BytesStart<'static>, DomainError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
    let mut out = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr.map_err(xml_error)?;
        if attr.key.as_ref() != key.as_bytes() {
            let k = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let v = attr.unescape_value().map_err(xml_error)?.to_string();
            out.push_attribute((k.as_str(), v.as_str()));
        }
    }
    out.push_attribute((key, value));
    Ok(out)
}

fn is_disk_device(e: &BytesStart<'_>) -> Result<bool, DomainError> {
    Ok(e.name().as_ref() == b"disk"
        && attribute(e, "type")?.as_deref() == Some("file")
        && attribute(e, "device")?.as_deref().unwrap_or("disk") == "disk")
}

/// Source file of the first file-backed `<disk device='disk'>`
pub fn first_disk_source(xml: &str) -> Result<Option<DiskSource>, DomainError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut in_disk = false;
    let mut format = None;
    let mut path = None;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) if is_disk_device(&e)? => in_disk = true,
            Event::Start(e) | Event::Empty(e) if in_disk => match e.name().as_ref() {
                b"driver" => format = attribute(&e, "type")?,
                b"source" => path = attribute(&e, "file")?,
                _ => {}
            },
            Event::End(e) if in_disk && e.name().as_ref() == b"disk" => {
                if let Some(path) = path.take() {
                    return Ok(Some(DiskSource {
                        path: PathBuf::from(path),
                        format: format.take().unwrap_or_else(|| "qcow2".to_string()),
                    }));
                }
                in_disk = false;
                format = None;
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// Rewrite a domain XML for a transient clone: new `<name>`, no `<uuid>`,
/// first file-backed disk pointing at `overlay` as qcow2.
pub fn rewrite_for_clone(xml: &str, clone_name: &str, overlay: &Path) -> Result<String, DomainError> {
    let overlay = overlay.to_string_lossy();
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());

    let mut depth = 0usize;
    let mut skip_until: Option<usize> = None;
    let mut in_name = false;
    let mut in_disk = false;
    let mut disk_done = false;

    loop {
        let event = reader.read_event().map_err(xml_error)?;
        if let Some(level) = skip_until {
            match event {
                Event::Start(_) => depth += 1,
                Event::End(_) => {
                    depth -= 1;
                    if depth == level {
                        skip_until = None;
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            continue;
        }

        let out = match event {
            Event::Eof => break,
            Event::Start(e) => {
                depth += 1;
                if depth == 2 && e.name().as_ref() == b"uuid" {
                    skip_until = Some(depth - 1);
                    continue;
                }
                in_name = depth == 2 && e.name().as_ref() == b"name";
                if !disk_done && is_disk_device(&e)? {
                    in_disk = true;
                }
                if in_disk && e.name().as_ref() == b"source" {
                    Event::Start(with_attribute(&e, "file", &overlay)?)
                } else {
                    Event::Start(e)
                }
            }
            Event::Empty(e) => {
                if depth == 1 && e.name().as_ref() == b"uuid" {
                    continue;
                }
                match e.name().as_ref() {
                    b"source" if in_disk => Event::Empty(with_attribute(&e, "file", &overlay)?),
                    b"driver" if in_disk => Event::Empty(with_attribute(&e, "type", "qcow2")?),
                    _ => Event::Empty(e),
                }
            }
            Event::Text(_) if in_name => Event::Text(BytesText::new(clone_name)),
            Event::End(e) => {
                if in_disk && e.name().as_ref() == b"disk" {
                    in_disk = false;
                    disk_done = true;
                }
                in_name = false;
                depth = depth.saturating_sub(1);
                Event::End(e)
            }
            other => other,
        };
        writer.write_event(out).map_err(xml_error)?;
    }

    if !disk_done {
        return Err(DomainError::NoDisk(clone_name.to_string()));
    }
    String::from_utf8(writer.into_inner()).map_err(xml_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN_XML: &str = r#"<domain type='kvm'>
  <name>osw-ubuntu-20.04</name>
  <uuid>5f3a9d2e-7c1b-4a38-9e55-0c4d0c1b9f11</uuid>
  <description>{&quot;release_date&quot;: &quot;2020-04-23&quot;}</description>
  <memory unit='MiB'>2048</memory>
  <devices>
    <disk type='file' device='cdrom'>
      <driver name='qemu' type='raw'/>
      <source file='/iso/ubuntu.iso'/>
    </disk>
    <disk type='file' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source file='/var/lib/oswatcher/ubuntu.qcow2'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='file' device='disk'>
      <source file='/var/lib/oswatcher/data.img'/>
    </disk>
  </devices>
</domain>"#;

    #[test]
    fn test_first_disk_skips_cdrom() {
        let disk = first_disk_source(DOMAIN_XML).unwrap().unwrap();
        assert_eq!(disk.path, PathBuf::from("/var/lib/oswatcher/ubuntu.qcow2"));
        assert_eq!(disk.format, "qcow2");
    }

    #[test]
    fn test_no_disk() {
        assert_eq!(first_disk_source("<domain><name>x</name></domain>").unwrap(), None);
    }

    #[test]
    fn test_rewrite_for_clone() {
        let out = rewrite_for_clone(
            DOMAIN_XML,
            "osw-ubuntu-20.04-osw-1a2b3c4d",
            Path::new("/tmp/oswatcher-x/clone.qcow2"),
        )
        .unwrap();

        assert!(out.contains("<name>osw-ubuntu-20.04-osw-1a2b3c4d</name>"));
        assert!(!out.contains("<uuid>"));
        assert!(out.contains("/tmp/oswatcher-x/clone.qcow2"));
        assert!(!out.contains("/var/lib/oswatcher/ubuntu.qcow2"));
        // Only the first hard disk is redirected
        assert!(out.contains("/iso/ubuntu.iso"));
        assert!(out.contains("/var/lib/oswatcher/data.img"));
        // Guest metadata survives the rewrite
        assert!(out.contains("release_date"));

        let disk = first_disk_source(&out).unwrap().unwrap();
        assert_eq!(disk.path, PathBuf::from("/tmp/oswatcher-x/clone.qcow2"));
    }

    #[test]
    fn test_rewrite_without_disk_fails() {
        let err = rewrite_for_clone("<domain><name>x</name></domain>", "x-osw-1", Path::new("/tmp/o.qcow2"))
            .unwrap_err();
        assert!(matches!(err, DomainError::NoDisk(_)));
    }

    fn running(virsh_path: &str, name: &str) -> VirshDomainController {
        let controller = VirshDomainController::new("vm", VirshClient::new("qemu:///session", virsh_path), "qemu-img");
        *controller.active.lock() = Some(ActiveDomain {
            name: name.to_string(),
            _storage: None,
        });
        controller
    }

    #[tokio::test]
    async fn test_failed_destroy_keeps_domain_active() {
        let controller = running("/nonexistent/oswatcher/virsh", "vm-osw-1a2b3c4d");

        let err = controller.power_off().await.unwrap_err();
        assert!(matches!(err, DomainError::Spawn { .. }));
        assert_eq!(controller.active_domain().as_deref(), Some("vm-osw-1a2b3c4d"));
        assert_eq!(controller.running_domain().as_deref(), Some("vm-osw-1a2b3c4d"));

        // Retrying still targets the clone instead of reporting NotRunning
        assert!(matches!(controller.power_off().await, Err(DomainError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_successful_destroy_clears_active_domain() {
        let controller = running("true", "vm-osw-1a2b3c4d");
        controller.power_off().await.unwrap();
        assert_eq!(controller.active_domain(), None);
        assert!(matches!(controller.power_off().await, Err(DomainError::NotRunning(_))));
    }

    #[tokio::test]
    async fn test_power_off_without_power_on() {
        let controller = VirshDomainController::new("vm", VirshClient::new("qemu:///session", "virsh"), "qemu-img");
        assert!(matches!(controller.power_off().await, Err(DomainError::NotRunning(_))));
    }
}
