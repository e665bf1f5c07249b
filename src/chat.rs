//! Type definitions for chat primitives
//!

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The author of a `Message`
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Role {
    /// A `System` message is an authoritative message which is used to
    /// instruct the model.
    System,

    /// A message authored by the user
    User,

    /// A message authored by the model
    Assistant,

    /// Any role this crate does not interpret. It is carried through
    /// the pipeline untouched.
    Other(String),
}

impl Role {
    pub(crate) fn as_str(&self) -> &str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Other(role) => role,
        }
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        match value {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => Role::Other(other.to_string()),
        }
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let role = String::deserialize(deserializer)?;

        Ok(Role::from(role.as_str()))
    }
}

/// A `Message` in a chat conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Message {
    /// The author of the message
    pub role: Role,
    /// The contents of the message
    pub content: String,
    /// An identifier assigned by the caller's message store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Message {
    pub(crate) fn new(role: Role, content: String) -> Message {
        Message {
            role,
            content,
            id: None,
        }
    }

    pub(crate) fn user<S: Into<String>>(content: S) -> Message {
        Message::new(Role::User, content.into())
    }

    #[cfg(test)]
    pub(crate) fn assistant<S: Into<String>>(content: S) -> Message {
        Message::new(Role::Assistant, content.into())
    }
}
