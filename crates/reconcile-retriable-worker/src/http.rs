//! HTTP remote source over the sync API.

use crate::{FetchError, RemoteSource, SyncDelta};
use billfold_core::{Feature, ProfileScope, Record, SyncCursor};
use chrono::DateTime;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote source backed by `GET {base}/sync/{stream}`.
///
/// The access token is swapped at runtime on login/logout and profile
/// switch; requests without a token go out unauthenticated and the
/// server rejects them, which surfaces as a network failure.
pub struct HttpRemoteSource {
    client: reqwest::Client,
    base_url: Url,
    access_token: RwLock<Option<String>>,
}

impl HttpRemoteSource {
    pub fn new(base_url: Url) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            access_token: RwLock::new(None),
        })
    }

    pub fn set_access_token(&self, token: impl Into<String>) {
        *self.access_token.write().expect("lock poisoned") = Some(token.into());
    }

    pub fn clear_access_token(&self) {
        *self.access_token.write().expect("lock poisoned") = None;
    }

    fn sync_url(
        &self,
        stream: Feature,
        cursor: &SyncCursor,
        scope: Option<&ProfileScope>,
    ) -> Result<Url, FetchError> {
        let mut url = self
            .base_url
            .join(&format!("sync/{stream}"))
            .map_err(|e| FetchError::Network(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(since) = &cursor.last_sync_timestamp {
                query.append_pair("since", since);
            }
            if let Some(next) = &cursor.next_cursor {
                query.append_pair("cursor", next);
            }
            if let Some(scope) = scope {
                query.append_pair("profile_id", &scope.profile_id);
                query.append_pair("entity_id", &scope.entity_id);
            }
        }
        Ok(url)
    }
}

impl RemoteSource for HttpRemoteSource {
    fn fetch(
        &self,
        stream: Feature,
        cursor: SyncCursor,
        scope: Option<ProfileScope>,
    ) -> BoxFuture<'_, Result<SyncDelta, FetchError>> {
        Box::pin(async move {
            let url = self.sync_url(stream, &cursor, scope.as_ref())?;
            debug!(stream = %stream, %url, "Fetching sync delta");

            let mut request = self.client.get(url);
            let token = self.access_token.read().expect("lock poisoned").clone();
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }

            let response = request
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| FetchError::Network(e.to_string()))?;
            let body = response
                .text()
                .await
                .map_err(|e| FetchError::Network(e.to_string()))?;

            parse_delta(&body)
        })
    }
}

#[derive(Deserialize)]
struct WireRecord {
    id: String,
    payload: serde_json::Value,
    updated_at: String,
}

#[derive(Deserialize)]
struct WireDelta {
    upserts: Vec<WireRecord>,
    #[serde(default)]
    deletions: Vec<String>,
    #[serde(default)]
    next_cursor: Option<String>,
    sync_timestamp: String,
}

/// Decode a wire response body into a [`SyncDelta`].
///
/// Any shape violation, including an unparseable `updated_at`, is a
/// parse failure; the caller treats it exactly like a network failure.
fn parse_delta(body: &str) -> Result<SyncDelta, FetchError> {
    let wire: WireDelta =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(e.to_string()))?;

    let mut upserts = Vec::with_capacity(wire.upserts.len());
    for record in wire.upserts {
        let updated_at = DateTime::parse_from_rfc3339(&record.updated_at)
            .map_err(|e| {
                FetchError::Parse(format!("record '{}': bad updated_at: {e}", record.id))
            })?
            .to_utc();
        upserts.push(Record {
            id: record.id,
            payload: record.payload,
            updated_at,
        });
    }

    Ok(SyncDelta {
        upserts,
        deletions: wire.deletions,
        next_cursor: wire.next_cursor,
        sync_timestamp: wire.sync_timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_full_delta() {
        let body = json!({
            "upserts": [
                {"id": "t1", "payload": {"amount": 5}, "updated_at": "2026-01-02T03:04:05Z"}
            ],
            "deletions": ["t0"],
            "next_cursor": "page-2",
            "sync_timestamp": "2026-01-02T03:04:06Z"
        })
        .to_string();

        let delta = parse_delta(&body).unwrap();
        assert_eq!(delta.upserts.len(), 1);
        assert_eq!(delta.upserts[0].id, "t1");
        assert_eq!(delta.deletions, vec!["t0".to_string()]);
        assert_eq!(delta.next_cursor.as_deref(), Some("page-2"));
    }

    #[test]
    fn deletions_and_cursor_are_optional() {
        let body = json!({
            "upserts": [],
            "sync_timestamp": "2026-01-02T03:04:06Z"
        })
        .to_string();

        let delta = parse_delta(&body).unwrap();
        assert!(delta.deletions.is_empty());
        assert!(delta.next_cursor.is_none());
    }

    #[test]
    fn missing_timestamp_is_a_parse_failure() {
        let body = json!({"upserts": []}).to_string();
        assert!(matches!(parse_delta(&body), Err(FetchError::Parse(_))));
    }

    #[test]
    fn bad_updated_at_is_a_parse_failure() {
        let body = json!({
            "upserts": [{"id": "t1", "payload": {}, "updated_at": "yesterday"}],
            "sync_timestamp": "2026-01-02T03:04:06Z"
        })
        .to_string();
        assert!(matches!(parse_delta(&body), Err(FetchError::Parse(_))));
    }

    #[test]
    fn garbage_body_is_a_parse_failure() {
        assert!(matches!(parse_delta("not json"), Err(FetchError::Parse(_))));
    }

    #[test]
    fn sync_url_carries_cursor_and_scope() {
        let source =
            HttpRemoteSource::new(Url::parse("https://api.example.test/v1/").unwrap()).unwrap();
        let cursor = SyncCursor {
            last_sync_timestamp: Some("2026-01-01T00:00:00Z".to_string()),
            next_cursor: Some("page-2".to_string()),
        };
        let scope = ProfileScope::new("p1", "e1");

        let url = source
            .sync_url(Feature::Transactions, &cursor, Some(&scope))
            .unwrap();
        assert_eq!(url.path(), "/v1/sync/transactions");
        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(query.contains(&("since".into(), "2026-01-01T00:00:00Z".into())));
        assert!(query.contains(&("cursor".into(), "page-2".into())));
        assert!(query.contains(&("profile_id".into(), "p1".into())));
    }
}
