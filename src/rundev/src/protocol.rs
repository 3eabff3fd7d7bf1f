//! Registration wire format
//!
//! One JSON object per connection, newline-terminated, answered with a
//! single confirmation byte. Descendants find the socket through
//! [`SOCKET_ENV`] and may namespace their registrations with [`SUBNAME_ENV`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Confirmation byte written back once a request has been fully processed.
pub const ACK: u8 = b'A';

/// Registry name reserved for the supervisor's own initial command.
pub const INITIAL_NAME: &str = "_initial";

/// Environment variable holding the registration socket path.
pub const SOCKET_ENV: &str = "RUNDEV_SOCKET";

/// Environment variable holding an optional namespace prefix for
/// registrations made by a descendant.
pub const SUBNAME_ENV: &str = "RUNDEV_SUBNAME";

/// A request to spawn one process under the development console.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRequest {
    /// Process name; must be unique among live sessions.
    pub name: String,
    /// Optional namespace prefix, usually taken from `RUNDEV_SUBNAME`.
    #[serde(default)]
    pub subname: Option<String>,
    /// Command line; the first element is the executable.
    pub command: Vec<String>,
    /// Environment overrides applied on top of the console's sanitized
    /// environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory, if any.
    #[serde(default)]
    pub chdir: Option<String>,
    /// Whether exiting is the expected outcome for this process.
    #[serde(default)]
    pub oneshot: bool,
}

impl SpawnRequest {
    /// The registry key for this request: `subname/name` when a non-empty
    /// subname is present, plain `name` otherwise.
    pub fn effective_name(&self) -> String {
        match self.subname.as_deref() {
            Some(subname) if !subname.is_empty() => format!("{subname}/{}", self.name),
            _ => self.name.clone(),
        }
    }
}
