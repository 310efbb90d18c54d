//! Debugging session identity
//!
//! A session id is a content hash of the invocation arguments, the machine
//! identity and the working directory, so restarting the same command in the
//! same project reuses the same cloud wiring. Mirror mode always uses a fixed
//! sentinel so several developers can observe the same functions.

use crate::config::TetherConfig;
use crate::types::SessionId;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;

/// One local debugging run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggerSession {
    /// Session id
    pub session_id: SessionId,
    /// Mirror mode flag
    pub mirror: bool,
    /// Minimum interval between mirrored invocations
    pub mirror_interval: Duration,
}

impl DebuggerSession {
    /// Derive the session for the current process
    #[must_use]
    pub fn for_current_process(config: &TetherConfig) -> Self {
        let args: Vec<String> = std::env::args().collect();
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::derive(config, &args, &machine_id(), &cwd)
    }

    /// Derive a session from explicit inputs
    #[must_use]
    pub fn derive(config: &TetherConfig, args: &[String], device_id: &str, cwd: &Path) -> Self {
        let session_id = if config.mirror {
            SessionId::mirror()
        } else {
            hash_identity(args, device_id, cwd)
        };

        Self {
            session_id,
            mirror: config.mirror,
            mirror_interval: config.mirror_interval(),
        }
    }
}

fn hash_identity(args: &[String], device_id: &str, cwd: &Path) -> SessionId {
    let mut hasher = Sha256::new();
    hasher.update(args.join(" ").as_bytes());
    hasher.update(device_id.as_bytes());
    hasher.update(cwd.to_string_lossy().as_bytes());
    SessionId::new(hex::encode(hasher.finalize()))
}

/// Stable identifier of this machine
///
/// Reads the systemd machine id, falling back to the host name.
#[must_use]
pub fn machine_id() -> String {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(id) = std::fs::read_to_string(path) {
            let id = id.trim();
            if !id.is_empty() {
                return id.to_string();
            }
        }
    }
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string())
}
