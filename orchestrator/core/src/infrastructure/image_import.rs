// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Disk image import
//!
//! Turns a built disk image plus its `<image>.json` metadata sidecar into a
//! libvirt domain ready for capture. The metadata ends up in the domain
//! `<description>`, where the OS assembler reads it back.

use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::domain::capture_config::ImportConfig;
use crate::domain::controller::DomainError;
use crate::domain::guest_metadata::{GuestMetadata, MetadataError};
use crate::infrastructure::virsh::VirshClient;

pub const DOMAIN_PREFIX: &str = "osw";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Disk image {0:?} does not exist")]
    MissingImage(PathBuf),

    #[error("Could not find metadata file {0:?} for image")]
    MissingMetadata(PathBuf),

    #[error("Invalid image metadata: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Import I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Defined { name: String, disk: PathBuf },
    AlreadyDefined { name: String },
}

pub struct ImageImporter {
    virsh: VirshClient,
    config: ImportConfig,
}

/// `osw-<stem>` unless a name is given
pub fn domain_name_for(image: &Path, vm_name: Option<&str>) -> String {
    match vm_name {
        Some(name) => name.to_string(),
        None => {
            let stem = image.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
            format!("{}-{}", DOMAIN_PREFIX, stem)
        }
    }
}

/// File name of the image inside the pool, always ending in `.qcow2`
pub fn pool_file_name(image: &Path) -> String {
    let name = image.file_name().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    if image.extension().is_some_and(|ext| ext == "qcow2") {
        name
    } else {
        format!("{}.qcow2", name)
    }
}

/// Domain XML for an imported image
pub fn render_domain_xml(name: &str, metadata: &str, disk: &Path, config: &ImportConfig) -> String {
    use quick_xml::escape::escape;

    let disk = disk.to_string_lossy();
    format!(
        r#"<domain type='kvm'>
  <name>{name}</name>
  <description>{description}</description>
  <memory unit='MiB'>{memory}</memory>
  <vcpu>{vcpus}</vcpu>
  <os>
    <type arch='x86_64'>hvm</type>
    <boot dev='hd'/>
  </os>
  <features>
    <acpi/>
    <apic/>
  </features>
  <devices>
    <disk type='file' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source file='{disk}'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <interface type='user'>
      <model type='virtio'/>
    </interface>
    <graphics type='vnc' autoport='yes'/>
    <video>
      <model type='qxl'/>
    </video>
  </devices>
</domain>
"#,
        name = escape(name),
        description = escape(metadata.trim()),
        memory = config.memory_mib,
        vcpus = config.vcpus,
        disk = escape(disk.as_ref()),
    )
}

fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        // Cross-device moves fall back to copy + remove
        Err(_) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}

impl ImageImporter {
    pub fn new(virsh: VirshClient, config: ImportConfig) -> Self {
        Self { virsh, config }
    }

    /// Make sure the `dir` storage pool exists and runs, returning its path
    async fn ensure_pool(&self) -> Result<PathBuf, DomainError> {
        let pool = &self.config.pool_name;
        if self.virsh.pool_exists(pool).await? {
            info!("Storage pool {} already existing", pool);
        } else {
            let target = self.config.resolved_pool_path();
            info!("Defining storage pool {} at {}", pool, target.display());
            self.virsh.pool_define_dir(pool, &target).await?;
            self.virsh.pool_autostart(pool).await?;
        }

        if !self.virsh.pool_is_active(pool).await? {
            self.virsh.pool_build(pool).await?;
            self.virsh.pool_start(pool).await?;
        }
        self.virsh.pool_target_path(pool).await
    }

    pub async fn import(&self, image: &Path, vm_name: Option<&str>) -> Result<ImportOutcome, ImportError> {
        let image = std::fs::canonicalize(image).map_err(|_| ImportError::MissingImage(image.to_path_buf()))?;
        let metadata_path = image.with_extension("json");
        if !metadata_path.exists() {
            return Err(ImportError::MissingMetadata(metadata_path));
        }
        let metadata = std::fs::read_to_string(&metadata_path)?;
        let parsed = GuestMetadata::from_json(&metadata)?;

        let pool_path = self.ensure_pool().await?;
        let name = domain_name_for(&image, vm_name);
        if self.virsh.domain_exists(&name).await? {
            info!("Domain {} already defined", name);
            return Ok(ImportOutcome::AlreadyDefined { name });
        }

        let disk = pool_path.join(pool_file_name(&image));
        info!("Moving {} to {}", image.display(), disk.display());
        move_file(&image, &disk)?;

        let xml = render_domain_xml(&name, &metadata, &disk, &self.config);
        let mut xml_file = tempfile::Builder::new().prefix("oswatcher-domain-").suffix(".xml").tempfile()?;
        xml_file.write_all(xml.as_bytes())?;
        xml_file.flush()?;

        self.virsh.define(xml_file.path()).await?;
        self.virsh.pool_refresh(&self.config.pool_name).await?;
        info!("Domain {} defined (release {})", name, parsed.release_date);

        Ok(ImportOutcome::Defined { name, disk })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::virsh_domain::first_disk_source;

    #[test]
    fn test_domain_name() {
        assert_eq!(domain_name_for(Path::new("/out/ubuntu-20.04.qcow2"), None), "osw-ubuntu-20.04");
        assert_eq!(domain_name_for(Path::new("/out/ubuntu-20.04.qcow2"), Some("lab")), "lab");
    }

    #[test]
    fn test_pool_file_name() {
        assert_eq!(pool_file_name(Path::new("/out/debian.qcow2")), "debian.qcow2");
        assert_eq!(pool_file_name(Path::new("/out/packer-debian")), "packer-debian.qcow2");
        assert_eq!(pool_file_name(Path::new("/out/disk.img")), "disk.img.qcow2");
    }

    #[test]
    fn test_rendered_xml_round_trips_metadata() {
        let metadata = r#"{"release_date": "2020-04-23", "codename": "focal <lts> & \"stable\""}"#;
        let xml = render_domain_xml(
            "osw-ubuntu-20.04",
            metadata,
            Path::new("/var/lib/oswatcher/images/ubuntu-20.04.qcow2"),
            &ImportConfig::default(),
        );

        let parsed = GuestMetadata::from_domain_xml(&xml).unwrap();
        assert_eq!(parsed.release_date, "2020-04-23");
        assert_eq!(
            parsed.extra.get("codename").and_then(|v| v.as_str()),
            Some("focal <lts> & \"stable\"")
        );

        let disk = first_disk_source(&xml).unwrap().unwrap();
        assert_eq!(disk.path, PathBuf::from("/var/lib/oswatcher/images/ubuntu-20.04.qcow2"));
    }

    #[tokio::test]
    async fn test_missing_metadata_fails_before_libvirt() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("debian-10.qcow2");
        std::fs::write(&image, b"qcow").unwrap();

        let importer = ImageImporter::new(
            VirshClient::new("qemu:///session", "/nonexistent/virsh"),
            ImportConfig::default(),
        );
        let err = importer.import(&image, None).await.unwrap_err();
        assert!(matches!(err, ImportError::MissingMetadata(_)));
        assert!(image.exists());
    }

    #[tokio::test]
    async fn test_metadata_without_release_date_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("debian-10.qcow2");
        std::fs::write(&image, b"qcow").unwrap();
        std::fs::write(dir.path().join("debian-10.json"), r#"{"codename": "buster"}"#).unwrap();

        let importer = ImageImporter::new(
            VirshClient::new("qemu:///session", "/nonexistent/virsh"),
            ImportConfig::default(),
        );
        let err = importer.import(&image, None).await.unwrap_err();
        assert!(matches!(err, ImportError::Metadata(MetadataError::MissingReleaseDate)));
    }
}
