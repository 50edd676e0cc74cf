//! Cache key addressing and wildcard matching.

use crate::ProfileScope;
use serde::{Deserialize, Serialize};

/// Feature (data domain) a cache key belongs to.
///
/// Each feature maps to one row-store collection and one remote sync
/// stream. Sensitive features must always be addressed with a
/// [`ProfileScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Balance,
    Transactions,
    Messages,
    Contacts,
    Kyc,
    ReferenceData,
}

impl Feature {
    /// Whether data under this feature must never leak across accounts.
    pub fn is_sensitive(&self) -> bool {
        !matches!(self, Self::ReferenceData)
    }

    /// Whether this feature materializes as a timeline of items rather
    /// than a flat record set.
    pub fn is_timeline(&self) -> bool {
        matches!(self, Self::Transactions | Self::Messages)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Balance => "balance",
            Self::Transactions => "transactions",
            Self::Messages => "messages",
            Self::Contacts => "contacts",
            Self::Kyc => "kyc",
            Self::ReferenceData => "reference_data",
        }
    }

    /// Stable key under which this stream's sync cursor is persisted.
    pub fn cursor_key(&self) -> String {
        format!("{}_last_sync", self.as_str())
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite cache key: `(feature, scope, params...)`.
///
/// Keys are structurally comparable and hashable; the same tuple always
/// addresses the same entry. `params` carries feature-specific
/// discriminators such as an interaction id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub feature: Feature,
    pub scope: Option<ProfileScope>,
    pub params: Vec<String>,
}

impl CacheKey {
    /// A key scoped to an account. Required form for sensitive features.
    pub fn scoped(feature: Feature, scope: ProfileScope) -> Self {
        Self {
            feature,
            scope: Some(scope),
            params: Vec::new(),
        }
    }

    /// A key for non-sensitive, account-independent data.
    pub fn global(feature: Feature) -> Self {
        Self {
            feature,
            scope: None,
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.params.push(param.into());
        self
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.feature)?;
        if let Some(scope) = &self.scope {
            write!(f, ":{}", scope)?;
        }
        for p in &self.params {
            write!(f, ":{}", p)?;
        }
        Ok(())
    }
}

/// Wildcard matcher over cache keys.
///
/// Used both for invalidation routing and for subscriptions. A `None`
/// feature or scope matches anything; `param_prefix` must be a prefix of
/// the key's params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPattern {
    pub feature: Option<Feature>,
    pub scope: Option<ProfileScope>,
    pub param_prefix: Vec<String>,
}

impl KeyPattern {
    /// Matches every key.
    pub fn any() -> Self {
        Self {
            feature: None,
            scope: None,
            param_prefix: Vec::new(),
        }
    }

    /// Matches every key under one feature.
    pub fn feature(feature: Feature) -> Self {
        Self {
            feature: Some(feature),
            scope: None,
            param_prefix: Vec::new(),
        }
    }

    /// Matches keys under one feature and one account scope.
    pub fn feature_scoped(feature: Feature, scope: ProfileScope) -> Self {
        Self {
            feature: Some(feature),
            scope: Some(scope),
            param_prefix: Vec::new(),
        }
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param_prefix.push(param.into());
        self
    }

    pub fn matches(&self, key: &CacheKey) -> bool {
        if let Some(feature) = self.feature {
            if feature != key.feature {
                return false;
            }
        }
        if let Some(scope) = &self.scope {
            if key.scope.as_ref() != Some(scope) {
                return false;
            }
        }
        if self.param_prefix.len() > key.params.len() {
            return false;
        }
        self.param_prefix
            .iter()
            .zip(key.params.iter())
            .all(|(a, b)| a == b)
    }
}
