//! Caller-supplied capabilities.
//!
//! The engine never inspects roles; the presentation layer decides which
//! capabilities a user holds and passes the set in as a precondition.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A privileged operation the caller may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Delete an entity together with its whole dependency closure.
    ForceDelete,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ForceDelete => "force_delete",
        }
    }
}

/// Set of capabilities granted to the caller of an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(HashSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{Capability, CapabilitySet};

    #[test]
    fn empty_set_grants_nothing() {
        assert!(!CapabilitySet::new().has(Capability::ForceDelete));
    }

    #[test]
    fn granted_capability_is_reported() {
        let caps = CapabilitySet::new().grant(Capability::ForceDelete);
        assert!(caps.has(Capability::ForceDelete));
    }
}
