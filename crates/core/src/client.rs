//! HTTP client for the API under test.
//!
//! The client is bound to the configured base URL and API key. Responses are never turned into
//! errors on non-2xx status: cases assert on the status themselves, so only transport failures
//! and timeouts surface as [`HarnessError`].

use std::time::{Duration, Instant};

use api_shared::API_KEY_HEADER;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::ApiSettings;
use crate::constants::{HEALTH_PATH, LAB_RESULTS_SEGMENT, PATIENTS_SEGMENT};
use crate::{HarnessError, HarnessResult};

/// A response as seen by the harness: status, body and client-side latency.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON body; `Null` when empty, a JSON string when the body is not JSON.
    pub body: Value,
    pub elapsed: Duration,
    pub url: String,
}

impl ApiResponse {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }

    pub fn data(&self) -> Option<&Value> {
        self.field("data")
    }

    pub fn detail(&self) -> Option<&str> {
        self.field("detail").and_then(Value::as_str)
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }

    /// Deserialize the body into a typed payload.
    pub fn decode<T: DeserializeOwned>(&self) -> HarnessResult<T> {
        serde_json::from_value(self.body.clone()).map_err(|source| HarnessError::Decode {
            url: self.url.clone(),
            source,
        })
    }
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    version: Vec<String>,
    api_key: Option<String>,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(settings: &ApiSettings) -> HarnessResult<Self> {
        let base = Url::parse(&settings.base_url).map_err(|e| {
            HarnessError::Config(format!("invalid API base URL '{}': {e}", settings.base_url))
        })?;
        if base.cannot_be_a_base() {
            return Err(HarnessError::Config(format!(
                "API base URL '{}' cannot carry a path",
                settings.base_url
            )));
        }
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| HarnessError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base,
            version: settings
                .version
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
            api_key: Some(settings.api_key.clone()),
            timeout: settings.request_timeout,
        })
    }

    /// A copy of this client sending a different key.
    pub fn with_api_key(&self, key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..self.clone()
        }
    }

    /// A copy of this client sending no key at all.
    pub fn without_api_key(&self) -> Self {
        Self {
            api_key: None,
            ..self.clone()
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `GET /health`
    pub async fn health(&self) -> HarnessResult<ApiResponse> {
        let url = self.endpoint(&[HEALTH_PATH])?;
        self.get(url).await
    }

    /// `GET /api/v1/patients/{patient_id}`
    pub async fn get_patient(&self, patient_id: &str) -> HarnessResult<ApiResponse> {
        let url = self.versioned(&[PATIENTS_SEGMENT, patient_id])?;
        self.get(url).await
    }

    /// `GET /api/v1/patients/{patient_id}/lab_results?from_date=..&to_date=..`
    ///
    /// Dates are passed through untouched so that malformed values can be sent on purpose.
    pub async fn get_lab_results(
        &self,
        patient_id: &str,
        from_date: Option<&str>,
        to_date: Option<&str>,
    ) -> HarnessResult<ApiResponse> {
        let mut url = self.versioned(&[PATIENTS_SEGMENT, patient_id, LAB_RESULTS_SEGMENT])?;
        if from_date.is_some() || to_date.is_some() {
            let mut query = url.query_pairs_mut();
            if let Some(from) = from_date {
                query.append_pair("from_date", from);
            }
            if let Some(to) = to_date {
                query.append_pair("to_date", to);
            }
        }
        self.get(url).await
    }

    fn versioned(&self, segments: &[&str]) -> HarnessResult<Url> {
        let mut all: Vec<&str> = self.version.iter().map(String::as_str).collect();
        all.extend_from_slice(segments);
        self.endpoint(&all)
    }

    fn endpoint(&self, segments: &[&str]) -> HarnessResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| HarnessError::Config(format!("API base URL '{}' cannot carry a path", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, url: Url) -> HarnessResult<ApiResponse> {
        let mut request = self.http.get(url.clone()).timeout(self.timeout);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let started = Instant::now();
        let response = request.send().await.map_err(|e| self.transport_error(&url, e))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(&url, e))?;
        let elapsed = started.elapsed();

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        tracing::debug!(
            url = %url,
            status,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "API response"
        );

        Ok(ApiResponse {
            status,
            body,
            elapsed,
            url: url.to_string(),
        })
    }

    fn transport_error(&self, url: &Url, source: reqwest::Error) -> HarnessError {
        if source.is_timeout() {
            HarnessError::Timeout {
                url: url.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            HarnessError::Http {
                url: url.to_string(),
                source,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(base_url: &str) -> ApiSettings {
        ApiSettings {
            base_url: base_url.into(),
            version: "api/v1".into(),
            api_key: "test_api_key".into(),
            request_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_endpoints_are_built_from_segments() {
        let client = ApiClient::new(&settings("http://localhost:8000")).expect("client");
        assert_eq!(
            client.endpoint(&[HEALTH_PATH]).expect("url").as_str(),
            "http://localhost:8000/health"
        );
        assert_eq!(
            client
                .versioned(&[PATIENTS_SEGMENT, "P0001", LAB_RESULTS_SEGMENT])
                .expect("url")
                .as_str(),
            "http://localhost:8000/api/v1/patients/P0001/lab_results"
        );
    }

    #[test]
    fn test_base_path_is_preserved_and_ids_are_escaped() {
        let client = ApiClient::new(&settings("http://gateway.test/medata/")).expect("client");
        let url = client
            .versioned(&[PATIENTS_SEGMENT, "a b/c"])
            .expect("url");
        assert_eq!(
            url.as_str(),
            "http://gateway.test/medata/api/v1/patients/a%20b%2Fc"
        );
    }

    #[test]
    fn test_invalid_base_url_is_a_config_error() {
        let err = ApiClient::new(&settings("not a url")).expect_err("invalid");
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn test_key_variants_share_base() {
        let client = ApiClient::new(&settings("http://localhost:8000")).expect("client");
        assert_eq!(client.with_api_key("other").api_key.as_deref(), Some("other"));
        assert_eq!(client.without_api_key().api_key, None);
        assert_eq!(client.without_api_key().base_url(), client.base_url());
    }

    #[test]
    fn test_response_helpers() {
        let response = ApiResponse {
            status: 404,
            body: serde_json::json!({"detail": "Patient X not found"}),
            elapsed: Duration::from_millis(3),
            url: "http://localhost/x".into(),
        };
        assert_eq!(response.detail(), Some("Patient X not found"));
        assert!(response.data().is_none());
        assert!((response.elapsed_ms() - 3.0).abs() < f64::EPSILON);
    }
}
