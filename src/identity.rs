//! Persistence of the local node identifier.
//!
//! The identifier is stored as a single line of hex in a small file. A node
//! keeps its identity across restarts by reading that file on startup and
//! only mints a fresh random identifier when the file is missing or unusable.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rand::RngCore;
use tracing::{error, info};

use crate::core::{derive_node_id, NodeId, ID_LEN};

/// File name used when no identity path is configured.
pub const DEFAULT_IDENTITY_FILE: &str = "sdht-identity";

/// Mint a fresh identifier from 32 random bytes.
pub fn generate_node_id() -> NodeId {
    let mut seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    derive_node_id(&seed)
}

/// Parse a node identifier from hex, ignoring surrounding whitespace.
pub fn parse_node_id(text: &str) -> Result<NodeId> {
    let bytes = hex::decode(text.trim()).context("invalid hex node id")?;
    if bytes.len() != ID_LEN {
        bail!(
            "node id must be {} hex characters ({} bytes), got {} bytes",
            ID_LEN * 2,
            ID_LEN,
            bytes.len()
        );
    }
    let mut id = [0u8; ID_LEN];
    id.copy_from_slice(&bytes);
    Ok(id)
}

#[derive(Clone, Debug)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored identifier. A missing file is `Ok(None)`.
    pub fn load(&self) -> Result<Option<NodeId>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read identity file {}", self.path.display())
                })
            }
        };
        parse_node_id(&text)
            .map(Some)
            .with_context(|| format!("corrupt identity file {}", self.path.display()))
    }

    pub fn save(&self, id: &NodeId) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create identity directory {}", parent.display())
                })?;
            }
        }
        fs::write(&self.path, format!("{}\n", hex::encode(id)))
            .with_context(|| format!("failed to write identity file {}", self.path.display()))
    }

    /// The persisted identifier, creating and storing one if needed.
    ///
    /// Never fails: read and write errors are logged and a freshly generated
    /// identifier is returned instead.
    pub fn local_node_id(&self) -> NodeId {
        match self.load() {
            Ok(Some(id)) => return id,
            Ok(None) => {}
            Err(err) => error!(
                path = %self.path.display(),
                "failed to load local node id: {err:#}"
            ),
        }

        let id = generate_node_id();
        match self.save(&id) {
            Ok(()) => info!(
                path = %self.path.display(),
                node_id = %hex::encode(id),
                "generated new local node id"
            ),
            Err(err) => error!(
                path = %self.path.display(),
                "failed to save local node id: {err:#}"
            ),
        }
        id
    }
}

impl Default for IdentityStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTITY_FILE)
    }
}
