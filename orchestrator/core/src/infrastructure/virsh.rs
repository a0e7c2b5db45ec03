// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Thin async wrapper over the `virsh` command line

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::controller::DomainError;
use crate::infrastructure::process::{display_command, run_command, RunFailure};

const VIRSH_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct VirshClient {
    uri: String,
    virsh_path: PathBuf,
}

impl VirshClient {
    pub fn new(uri: impl Into<String>, virsh_path: impl Into<PathBuf>) -> Self {
        Self {
            uri: uri.into(),
            virsh_path: virsh_path.into(),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    fn args<'a>(&'a self, rest: &[&'a str]) -> Vec<&'a str> {
        let mut args = vec!["-c", self.uri.as_str()];
        args.extend_from_slice(rest);
        args
    }

    async fn virsh(&self, rest: &[&str]) -> Result<String, DomainError> {
        let args = self.args(rest);
        let command = display_command(&self.virsh_path, &args);
        let output = run_command(&self.virsh_path, &args, Some(VIRSH_TIMEOUT))
            .await
            .map_err(|failure| match failure {
                RunFailure::Spawn(source) => DomainError::Spawn {
                    command: command.clone(),
                    source,
                },
                RunFailure::TimedOut => DomainError::Command {
                    command: command.clone(),
                    status: None,
                    stderr: format!("timed out after {}s", VIRSH_TIMEOUT.as_secs()),
                },
            })?;

        if !output.success {
            return Err(DomainError::Command {
                command,
                status: output.status,
                stderr: output.stderr,
            });
        }
        Ok(output.stdout)
    }

    /// `virsh dumpxml`, mapping an unknown domain to [`DomainError::NotFound`]
    pub async fn dumpxml(&self, domain: &str) -> Result<String, DomainError> {
        match self.virsh(&["dumpxml", domain]).await {
            Err(DomainError::Command { stderr, .. }) if is_missing_domain(&stderr) => {
                Err(DomainError::NotFound(domain.to_string()))
            }
            other => other,
        }
    }

    pub async fn domain_exists(&self, domain: &str) -> Result<bool, DomainError> {
        match self.virsh(&["dominfo", domain]).await {
            Ok(_) => Ok(true),
            Err(DomainError::Command { stderr, .. }) if is_missing_domain(&stderr) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn domain_state(&self, domain: &str) -> Result<String, DomainError> {
        Ok(self.virsh(&["domstate", domain]).await?.trim().to_string())
    }

    /// Start a transient domain from an XML file
    pub async fn create(&self, xml_path: &Path) -> Result<(), DomainError> {
        let path = xml_path.to_string_lossy();
        self.virsh(&["create", path.as_ref()]).await.map(|_| ())
    }

    /// Start a defined domain
    pub async fn start(&self, domain: &str) -> Result<(), DomainError> {
        self.virsh(&["start", domain]).await.map(|_| ())
    }

    pub async fn destroy(&self, domain: &str) -> Result<(), DomainError> {
        self.virsh(&["destroy", domain]).await.map(|_| ())
    }

    pub async fn define(&self, xml_path: &Path) -> Result<(), DomainError> {
        let path = xml_path.to_string_lossy();
        self.virsh(&["define", path.as_ref()]).await.map(|_| ())
    }

    pub async fn pool_exists(&self, pool: &str) -> Result<bool, DomainError> {
        match self.virsh(&["pool-info", pool]).await {
            Ok(_) => Ok(true),
            Err(DomainError::Command { stderr, .. }) if stderr.contains("Storage pool not found") => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn pool_is_active(&self, pool: &str) -> Result<bool, DomainError> {
        let info = self.virsh(&["pool-info", pool]).await?;
        Ok(info
            .lines()
            .filter_map(|line| line.split_once(':'))
            .any(|(key, value)| key.trim() == "State" && value.trim() == "running"))
    }

    pub async fn pool_define_dir(&self, pool: &str, target: &Path) -> Result<(), DomainError> {
        let target = target.to_string_lossy();
        self.virsh(&["pool-define-as", pool, "dir", "--target", target.as_ref()])
            .await
            .map(|_| ())
    }

    pub async fn pool_build(&self, pool: &str) -> Result<(), DomainError> {
        self.virsh(&["pool-build", pool]).await.map(|_| ())
    }

    pub async fn pool_start(&self, pool: &str) -> Result<(), DomainError> {
        self.virsh(&["pool-start", pool]).await.map(|_| ())
    }

    pub async fn pool_autostart(&self, pool: &str) -> Result<(), DomainError> {
        self.virsh(&["pool-autostart", pool]).await.map(|_| ())
    }

    pub async fn pool_refresh(&self, pool: &str) -> Result<(), DomainError> {
        self.virsh(&["pool-refresh", pool]).await.map(|_| ())
    }

    /// Target directory of a storage pool, from `pool-dumpxml`
    pub async fn pool_target_path(&self, pool: &str) -> Result<PathBuf, DomainError> {
        let xml = self.virsh(&["pool-dumpxml", pool]).await?;
        pool_target_from_xml(&xml)
    }
}

fn is_missing_domain(stderr: &str) -> bool {
    stderr.contains("failed to get domain") || stderr.contains("Domain not found")
}

/// Extract `<pool><target><path>` from a storage pool XML document
pub fn pool_target_from_xml(xml: &str) -> Result<PathBuf, DomainError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut stack: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push(String::from_utf8_lossy(e.name().as_ref()).to_string());
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(t)) => {
                if stack.iter().map(String::as_str).eq(["pool", "target", "path"]) {
                    let text = t.unescape().map_err(|e| DomainError::Xml(e.to_string()))?;
                    return Ok(PathBuf::from(text.as_ref()));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(DomainError::Xml(e.to_string())),
            _ => {}
        }
    }
    Err(DomainError::Xml("storage pool has no target path".to_string()))
}
