//! Actor identity: `(type, id)` pairs and node names.

use serde::{Deserialize, Serialize};

/// The logical type of an actor, e.g. `"OrderActor"`. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorType(pub String);

impl ActorType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ActorType {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for ActorType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The name of a hosting node, as used for deterministic tie-breaking and
/// as a destination for remote invocation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeName(pub String);

impl NodeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for NodeName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// An actor identity: a type plus an ordered path of id segments.
///
/// Order of `id` segments is significant and stable; the engine never
/// reorders or interprets them beyond what a placement entry's `bind_idx`
/// selects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId {
    pub actor_type: ActorType,
    pub id: Vec<String>,
}

impl ActorId {
    pub fn new(actor_type: impl Into<ActorType>, id: Vec<String>) -> Self {
        Self {
            actor_type: actor_type.into(),
            id,
        }
    }

    /// Fetch the id segment at `idx`, if present.
    pub fn segment(&self, idx: usize) -> Option<&str> {
        self.id.get(idx).map(String::as_str)
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.actor_type, self.id.join("/"))
    }
}
