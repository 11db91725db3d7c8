//! Session identity and client descriptor.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of one client connection.
///
/// Unique per connection: a reconnecting client gets a new id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// Lets the registry map be queried with `&str`.
impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Whether the client publishes or subscribes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Pub,
    #[default]
    Sub,
}

/// Who is on the other end of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientInfo {
    /// Subsystem the client belongs to (used for bulk rejection).
    pub subsystem: String,
    /// Consumer/producer group.
    pub group: String,
    pub purpose: Purpose,
    pub host: String,
    pub pid: u32,
}

impl ClientInfo {
    pub fn new(subsystem: impl Into<String>, group: impl Into<String>, purpose: Purpose) -> Self {
        Self {
            subsystem: subsystem.into(),
            group: group.into(),
            purpose,
            ..Default::default()
        }
    }
}

impl fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}({:?})@{}:{}",
            self.subsystem, self.group, self.purpose, self.host, self.pid
        )
    }
}
