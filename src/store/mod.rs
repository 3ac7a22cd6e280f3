//! Persistence of finished measurements.
//!
//! [`MeasurementStore`] is the seam the controller saves through;
//! [`RestStore`] posts records to a PostgREST-style endpoint
//! (`{base_url}/rest/v1/{table}`), which is what a Supabase project exposes.
//! No retries or queueing: a failed save is reported and the session is
//! left untouched.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::StoreConfig;

// ---------------------------------------------------------------------------
// NoiseRecord
// ---------------------------------------------------------------------------

/// One saved measurement.
///
/// Serialises as `{"noise_level": 62, "duration": 30, "type": "street"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoiseRecord {
    /// Last smoothed reading, rounded to whole dB.
    pub noise_level: i32,
    /// Session duration in seconds.
    pub duration: u64,
    /// Free-form measurement label ("street", "office", …).
    #[serde(rename = "type")]
    pub kind: String,
}

impl NoiseRecord {
    /// Record for a reading, or `None` when there is no reading yet.
    pub fn from_reading(level_db: f32, duration_secs: u64, kind: &str) -> Option<Self> {
        if !level_db.is_finite() || level_db <= 0.0 {
            return None;
        }
        Some(Self {
            noise_level: level_db.round() as i32,
            duration: duration_secs,
            kind: kind.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    /// No endpoint configured.
    #[error("measurement store is not configured (set store.base_url)")]
    NotConfigured,

    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("store request timed out")]
    Timeout,

    /// The endpoint answered with a non-success status.
    #[error("store rejected the record ({status}): {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// MeasurementStore trait
// ---------------------------------------------------------------------------

/// Destination for finished measurements.
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    async fn save(&self, record: &NoiseRecord) -> Result<(), StoreError>;
}

// Compile-time assertion: the trait must stay object-safe.
const _: fn() = || {
    fn _assert_object_safe(_: &dyn MeasurementStore) {}
};

// ---------------------------------------------------------------------------
// RestStore
// ---------------------------------------------------------------------------

/// Posts records as JSON to `{base_url}/rest/v1/{table}`.
///
/// The API key goes out both as the `apikey` header and as a bearer token;
/// both are omitted when no key is configured.
pub struct RestStore {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl RestStore {
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        if !config.is_configured() {
            return Err(StoreError::NotConfigured);
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let endpoint = format!(
            "{}/rest/v1/{}",
            config.base_url.trim().trim_end_matches('/'),
            config.table
        );

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl MeasurementStore for RestStore {
    async fn save(&self, record: &NoiseRecord) -> Result<(), StoreError> {
        let mut req = self
            .client
            .post(&self.endpoint)
            .header("Prefer", "return=minimal")
            .json(record);

        if let Some(key) = self.api_key.as_deref() {
            req = req.header("apikey", key).bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("store: {} rejected record: {status}", self.endpoint);
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        log::info!(
            "store: saved {} dB / {} s ({})",
            record.noise_level,
            record.duration,
            record.kind
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str, api_key: Option<&str>) -> StoreConfig {
        StoreConfig {
            base_url: base_url.into(),
            api_key: api_key.map(str::to_string),
            table: "noise_measurements".into(),
            timeout_secs: 5,
        }
    }

    fn record() -> NoiseRecord {
        NoiseRecord::from_reading(61.6, 30, "street").unwrap()
    }

    #[test]
    fn record_wire_shape() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "noise_level": 62, "duration": 30, "type": "street" })
        );
    }

    #[test]
    fn no_record_without_reading() {
        assert!(NoiseRecord::from_reading(0.0, 10, "x").is_none());
        assert!(NoiseRecord::from_reading(f32::NAN, 10, "x").is_none());
    }

    #[test]
    fn unconfigured_store_is_refused() {
        assert!(matches!(
            RestStore::from_config(&config("  ", None)),
            Err(StoreError::NotConfigured)
        ));
    }

    #[test]
    fn endpoint_joins_table() {
        let store = RestStore::from_config(&config("https://example.supabase.co/", None)).unwrap();
        assert_eq!(
            store.endpoint(),
            "https://example.supabase.co/rest/v1/noise_measurements"
        );
    }

    #[test]
    fn store_is_object_safe() {
        let store = RestStore::from_config(&config("http://localhost:1", None)).unwrap();
        let _boxed: Box<dyn MeasurementStore> = Box::new(store);
    }

    #[tokio::test]
    async fn posts_record_with_key_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/noise_measurements"))
            .and(header("apikey", "anon"))
            .and(header("authorization", "Bearer anon"))
            .and(body_json(
                serde_json::json!({ "noise_level": 62, "duration": 30, "type": "street" }),
            ))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let store = RestStore::from_config(&config(&server.uri(), Some("anon"))).unwrap();
        store.save(&record()).await.unwrap();
    }

    #[tokio::test]
    async fn rejection_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let store = RestStore::from_config(&config(&server.uri(), Some("bad"))).unwrap();
        match store.save(&record()).await {
            Err(StoreError::Rejected { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid key");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_request_error() {
        // Port 9 (discard) is not listening on test machines.
        let store = RestStore::from_config(&config("http://127.0.0.1:9", None)).unwrap();
        assert!(matches!(
            store.save(&record()).await,
            Err(StoreError::Request(_)) | Err(StoreError::Timeout)
        ));
    }
}
