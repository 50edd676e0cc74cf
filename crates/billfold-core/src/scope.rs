//! Profile/entity scope identity.

use serde::{Deserialize, Serialize};

/// The account scope a piece of data belongs to.
///
/// Every sensitive cache key and every sensitive row-store access carries
/// one of these. Two scopes are the same account only if both the profile
/// and the entity match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileScope {
    /// The logged-in profile (user) identifier.
    pub profile_id: String,
    /// The entity (e.g. personal vs. business account) under that profile.
    pub entity_id: String,
}

impl ProfileScope {
    pub fn new(profile_id: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            profile_id: profile_id.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl std::fmt::Display for ProfileScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.profile_id, self.entity_id)
    }
}
