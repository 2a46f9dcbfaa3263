//! Durable node identity.
//!
//! A node's identifier is derived once from stable host attributes, hashed,
//! and persisted to a local file. Every later startup reads the file
//! verbatim: there is no re-validation against current hardware, so the
//! identity survives minor reconfiguration. Deleting the file is the only
//! way to re-provision the host as a new node.

use chrono::{DateTime, Utc};
use gethostname::gethostname;
use sha2::{Digest, Sha256};
use std::path::Path;
use sysinfo::Disks;
use thiserror::Error;
use tracing::{debug, info};

/// Identity failures. Identity is mandatory: all of these are fatal at startup.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("cannot read identity file {0}: {1}")]
    Read(String, #[source] std::io::Error),
    #[error("cannot write identity file {0}: {1}")]
    Write(String, #[source] std::io::Error),
    #[error("identity file {0} is empty")]
    Empty(String),
}

/// Stable identity of this node. Immutable for the process lifetime and
/// shared by reference with every component that needs it.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub node_id: String,
    pub hostname: String,
    pub created_at: DateTime<Utc>,
}

impl NodeIdentity {
    /// Load the persisted identity, or derive and persist one on first run.
    pub fn load_or_create(path: &Path) -> Result<Self, IdentityError> {
        let hostname = gethostname().to_string_lossy().into_owned();

        if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| IdentityError::Read(path.display().to_string(), e))?;
            let node_id = raw.trim().to_string();
            if node_id.is_empty() {
                return Err(IdentityError::Empty(path.display().to_string()));
            }
            let created_at = std::fs::metadata(path)
                .ok()
                .and_then(|meta| meta.modified().ok())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(Utc::now);
            debug!("Loaded node identity from {}", path.display());
            return Ok(Self { node_id, hostname, created_at });
        }

        let node_id = Self::fingerprint(&hostname);
        std::fs::write(path, &node_id)
            .map_err(|e| IdentityError::Write(path.display().to_string(), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
        }
        info!("Created node identity {} at {}", node_id, path.display());
        Ok(Self { node_id, hostname, created_at: Utc::now() })
    }

    /// Derive the node id from stable host attributes: hostname, the primary
    /// disk's device identifier, and the owning Unix uid.
    fn fingerprint(hostname: &str) -> String {
        let disks = Disks::new_with_refreshed_list();
        let primary_disk = disks
            .list()
            .first()
            .map(|disk| disk.name().to_string_lossy().into_owned())
            .unwrap_or_else(|| "no-disk".to_string());

        #[cfg(unix)]
        let owner_id = nix::unistd::getuid().as_raw();
        #[cfg(not(unix))]
        let owner_id = 0u32;

        let material = format!("{hostname}-{owner_id}-{primary_disk}");
        format!("{:x}", Sha256::digest(material.as_bytes()))
    }

    /// `hostname-node_id` tag used to attribute outbound requests. Advisory
    /// only: the sealed payload remains the source of truth.
    pub fn client_tag(&self) -> String {
        format!("{}-{}", self.hostname, self.node_id)
    }
}
