//! Typed topics and the static topic-to-key-pattern routing table.

use billfold_core::{Feature, KeyPattern, ProfileScope};
use serde::{Deserialize, Serialize};

/// Domain event topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// A message was sent (optimistically or confirmed).
    MessageSent,
    /// A wallet mutation (payment, top-up) succeeded.
    WalletMutated,
    /// The contact book changed.
    ContactsChanged,
    /// KYC state advanced.
    KycUpdated,
    /// A reconciliation pass for some stream committed.
    SyncCompleted,
    /// The active profile scope changed. Dispatched immediately.
    ProfileSwitched,
}

impl Topic {
    /// Whether events on this topic are debounced. Profile switches must
    /// reach listeners without delay; everything else coalesces.
    pub fn is_debounced(&self) -> bool {
        !matches!(self, Self::ProfileSwitched)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageSent => "message_sent",
            Self::WalletMutated => "wallet_mutated",
            Self::ContactsChanged => "contacts_changed",
            Self::KycUpdated => "kyc_updated",
            Self::SyncCompleted => "sync_completed",
            Self::ProfileSwitched => "profile_switched",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload attached to an emitted event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Account scope the event happened under, if any.
    pub scope: Option<ProfileScope>,
    /// Stream/feature the event concerns (used by `SyncCompleted`).
    pub feature: Option<Feature>,
    /// Interaction (conversation) the event concerns, if any.
    pub interaction_id: Option<String>,
    /// Free-form detail for diagnostics.
    pub detail: serde_json::Value,
}

impl EventPayload {
    pub fn scoped(scope: ProfileScope) -> Self {
        Self {
            scope: Some(scope),
            ..Self::default()
        }
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.feature = Some(feature);
        self
    }

    pub fn with_interaction(mut self, interaction_id: impl Into<String>) -> Self {
        self.interaction_id = Some(interaction_id.into());
        self
    }
}

/// The static routing table: which key patterns an event dirties.
///
/// A message on an interaction dirties both that interaction's timeline
/// and the parent conversation summary (same feature, no param). Wallet
/// mutations dirty both the balance and the transaction history. A
/// completed transactions sync also dirties the balance, since the two
/// move together on the server.
pub fn routes_for(topic: Topic, payload: &EventPayload) -> Vec<KeyPattern> {
    let scoped = |feature: Feature| match payload.scope.clone() {
        Some(scope) => KeyPattern::feature_scoped(feature, scope),
        None => KeyPattern::feature(feature),
    };

    match topic {
        Topic::MessageSent => {
            let mut patterns = vec![scoped(Feature::Messages)];
            if let Some(interaction_id) = &payload.interaction_id {
                patterns.push(scoped(Feature::Messages).with_param(interaction_id.clone()));
            }
            patterns
        }
        Topic::WalletMutated => {
            vec![scoped(Feature::Balance), scoped(Feature::Transactions)]
        }
        Topic::ContactsChanged => vec![scoped(Feature::Contacts)],
        Topic::KycUpdated => vec![scoped(Feature::Kyc)],
        // The origin key's subscribers are already notified by the cache
        // write itself; routing here covers coupled domains only. A
        // transactions sync implies the balance moved with it.
        Topic::SyncCompleted => match payload.feature {
            Some(Feature::Transactions) => vec![scoped(Feature::Balance)],
            _ => Vec::new(),
        },
        // Sweeps are handled by the scope guard, not by key patterns.
        Topic::ProfileSwitched => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billfold_core::CacheKey;

    fn scope() -> ProfileScope {
        ProfileScope::new("p1", "e1")
    }

    #[test]
    fn wallet_mutation_dirties_balance_and_history() {
        let patterns = routes_for(Topic::WalletMutated, &EventPayload::scoped(scope()));
        assert_eq!(patterns.len(), 2);

        let balance = CacheKey::scoped(Feature::Balance, scope());
        let transactions = CacheKey::scoped(Feature::Transactions, scope());
        assert!(patterns.iter().any(|p| p.matches(&balance)));
        assert!(patterns.iter().any(|p| p.matches(&transactions)));
    }

    #[test]
    fn message_sent_dirties_timeline_and_summary() {
        let payload = EventPayload::scoped(scope()).with_interaction("conv-1");
        let patterns = routes_for(Topic::MessageSent, &payload);

        let summary = CacheKey::scoped(Feature::Messages, scope());
        let timeline = CacheKey::scoped(Feature::Messages, scope()).with_param("conv-1");
        assert!(patterns.iter().any(|p| p.matches(&summary)));
        assert!(patterns.iter().any(|p| p.matches(&timeline)));
    }

    #[test]
    fn transactions_sync_also_dirties_balance() {
        let payload = EventPayload::scoped(scope()).with_feature(Feature::Transactions);
        let patterns = routes_for(Topic::SyncCompleted, &payload);

        let balance = CacheKey::scoped(Feature::Balance, scope());
        assert!(patterns.iter().any(|p| p.matches(&balance)));
    }

    #[test]
    fn sync_completed_without_feature_routes_nowhere() {
        assert!(routes_for(Topic::SyncCompleted, &EventPayload::default()).is_empty());
    }

    #[test]
    fn profile_switch_is_immediate_and_unrouted() {
        assert!(!Topic::ProfileSwitched.is_debounced());
        assert!(routes_for(Topic::ProfileSwitched, &EventPayload::default()).is_empty());
    }

    #[test]
    fn routes_without_scope_fall_back_to_feature_wide() {
        let patterns = routes_for(Topic::ContactsChanged, &EventPayload::default());
        assert_eq!(patterns.len(), 1);
        // Feature-wide pattern matches any scope.
        assert!(patterns[0].matches(&CacheKey::scoped(Feature::Contacts, scope())));
    }
}
