//! Identity keys addressing entities in the remote store.

use crate::Kind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The id part of a complete key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyId {
    /// Numeric id, usually allocated by the remote store
    Id(i64),
    /// Caller-chosen name
    Name(String),
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Id(id) => write!(f, "{}", id),
            KeyId::Name(name) => write!(f, "{:?}", name),
        }
    }
}

/// Identity key of an entity.
///
/// A key without an id is *incomplete*: it names the kind only, and the
/// remote store completes it the first time the entity is written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    /// Kind (table) the entity belongs to
    pub kind: Kind,
    /// Id within the kind, absent until allocated
    pub id: Option<KeyId>,
}

impl Key {
    /// An incomplete key for a fresh entity of `kind`.
    pub fn incomplete(kind: impl Into<Kind>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
        }
    }

    /// A complete key with a numeric id.
    pub fn with_id(kind: impl Into<Kind>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id: Some(KeyId::Id(id)),
        }
    }

    /// A complete key with a caller-chosen name.
    pub fn with_name(kind: impl Into<Kind>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: Some(KeyId::Name(name.into())),
        }
    }

    /// Whether the key carries an id.
    pub fn is_complete(&self) -> bool {
        self.id.is_some()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}({})", self.kind, id),
            None => write!(f, "{}(?)", self.kind),
        }
    }
}
