//! Staleness policy: dynamic TTL per data class and behavior snapshot.

use billfold_core::Feature;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Hard floor for any computed TTL.
pub const TTL_FLOOR: Duration = Duration::seconds(5);
/// Hard ceiling for any computed TTL.
pub const TTL_CEILING: Duration = Duration::seconds(3600);

/// Data class for TTL purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataClass {
    /// Account balances: volatile, short base TTL.
    Balance,
    /// Append-only history (transactions, messages).
    History,
    /// Contact book and KYC state: changes rarely.
    Directory,
    /// Static reference data (currencies, fee tables).
    Reference,
}

impl DataClass {
    pub fn for_feature(feature: Feature) -> Self {
        match feature {
            Feature::Balance => Self::Balance,
            Feature::Transactions | Feature::Messages => Self::History,
            Feature::Contacts | Feature::Kyc => Self::Directory,
            Feature::ReferenceData => Self::Reference,
        }
    }

    fn base_ttl(&self) -> Duration {
        match self {
            Self::Balance => Duration::seconds(30),
            Self::History => Duration::seconds(120),
            Self::Directory => Duration::seconds(600),
            Self::Reference => Duration::seconds(3600),
        }
    }
}

/// How actively the user is interacting with the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    /// Foreground, actively navigating.
    Active,
    /// Foreground but idle.
    Idle,
    /// Backgrounded.
    Background,
}

/// Observed network quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkQuality {
    Fast,
    Slow,
    Offline,
}

/// Snapshot of live behavioral signals feeding the TTL computation.
///
/// The caller takes one snapshot per decision; the policy never reads
/// ambient state, so identical snapshots always produce identical TTLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorSnapshot {
    pub activity: ActivityLevel,
    /// A local mutation in the same domain landed very recently, so the
    /// remote state is likely ahead of the cache.
    pub recent_domain_mutation: bool,
    /// The user is inside a critical flow (e.g. a payment in progress).
    pub critical_flow: bool,
    pub network: NetworkQuality,
}

impl Default for BehaviorSnapshot {
    fn default() -> Self {
        Self {
            activity: ActivityLevel::Active,
            recent_domain_mutation: false,
            critical_flow: false,
            network: NetworkQuality::Fast,
        }
    }
}

/// Pure TTL policy.
pub struct StalenessPolicy;

impl StalenessPolicy {
    /// Compute the TTL for one data class under the given behavior.
    ///
    /// The base TTL is scaled by independent multiplicative factors and
    /// clamped to `[TTL_FLOOR, TTL_CEILING]`.
    pub fn ttl(class: DataClass, behavior: &BehaviorSnapshot) -> Duration {
        let base_ms = class.base_ttl().num_milliseconds() as f64;

        let activity = match behavior.activity {
            ActivityLevel::Active => 1.0,
            ActivityLevel::Idle => 1.5,
            ActivityLevel::Background => 3.0,
        };
        let mutation = if behavior.recent_domain_mutation { 0.25 } else { 1.0 };
        let critical = if behavior.critical_flow { 0.2 } else { 1.0 };
        let network = match behavior.network {
            NetworkQuality::Fast => 1.0,
            NetworkQuality::Slow => 2.0,
            NetworkQuality::Offline => 4.0,
        };

        let scaled = Duration::milliseconds(
            (base_ms * activity * mutation * critical * network) as i64,
        );
        scaled.clamp(TTL_FLOOR, TTL_CEILING)
    }

    /// Convenience: TTL for a feature's data class.
    pub fn ttl_for_feature(feature: Feature, behavior: &BehaviorSnapshot) -> Duration {
        Self::ttl(DataClass::for_feature(feature), behavior)
    }
}
