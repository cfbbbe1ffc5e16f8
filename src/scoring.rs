use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{DatasetName, NarrativePair, RawRow, SessionMetadata};
use crate::error::NarrascopeError;

/// Scoring parameters sent with every trace request, mirroring the
/// service's wire field names.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
    pub start_date: String,
    pub end_date: String,
    pub target_narrative: String,
    pub threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SavedSession {
    pub filename: String,
    #[serde(rename = "rowCount")]
    pub row_count: usize,
}

/// Black-box similarity scoring service. Scoring and clustering happen
/// server-side; this crate only moves data to and from it.
pub trait ScoringClient: Send + Sync {
    /// Score a server-hosted dataset by name.
    fn score_dataset(
        &self,
        request: &ScoreRequest,
        dataset: &DatasetName,
    ) -> Result<Vec<RawRow>, NarrascopeError>;

    /// Score locally uploaded rows, embedded in the request body.
    fn score_upload(
        &self,
        request: &ScoreRequest,
        rows: &[RawRow],
    ) -> Result<Vec<RawRow>, NarrascopeError>;

    fn list_datasets(&self) -> Result<Vec<String>, NarrascopeError>;

    fn generate_narratives(
        &self,
        rows: &[RawRow],
        num_narratives: usize,
    ) -> Result<Vec<NarrativePair>, NarrascopeError>;

    fn save_session(
        &self,
        rows: &[RawRow],
        metadata: &SessionMetadata,
    ) -> Result<SavedSession, NarrascopeError>;

    fn list_sessions(&self) -> Result<Vec<String>, NarrascopeError>;

    fn load_session(&self, filename: &str) -> Result<Vec<RawRow>, NarrascopeError>;
}

#[derive(Clone)]
pub struct ScoringHttpClient {
    client: Client,
    base_url: String,
}

impl ScoringHttpClient {
    pub fn new(
        base_url: &str,
        auth_token: Option<&str>,
        timeout_secs: u64,
    ) -> Result<Self, NarrascopeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("narrascope/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| NarrascopeError::ScoringHttp(err.to_string()))?,
        );
        if let Some(token) = auth_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| NarrascopeError::AuthExpired)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|err| NarrascopeError::ScoringHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, NarrascopeError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return Err(NarrascopeError::AuthExpired);
        }
        // The service reports failures as {"error": "..."}.
        let message = response
            .text()
            .ok()
            .and_then(|body| {
                serde_json::from_str::<Value>(&body)
                    .ok()
                    .and_then(|value| {
                        value
                            .get("error")
                            .and_then(|err| err.as_str())
                            .map(|err| err.to_string())
                    })
                    .or(Some(body))
            })
            .unwrap_or_else(|| "scoring service request failed".to_string());
        Err(NarrascopeError::ScoringStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, NarrascopeError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(NarrascopeError::ScoringHttp(err.to_string()));
                }
            }
        }
    }

    fn post_json(&self, path: &str, body: &Value) -> Result<Value, NarrascopeError> {
        let url = self.url(path);
        let response = self.send_with_retries(|| self.client.post(&url).json(body))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| NarrascopeError::ScoringHttp(err.to_string()))
    }

    fn trace(&self, body: Value) -> Result<Vec<RawRow>, NarrascopeError> {
        let payload = self.post_json("trace-over-time", &body)?;
        rows_from(&payload, "filteredData")
    }
}

impl ScoringClient for ScoringHttpClient {
    fn score_dataset(
        &self,
        request: &ScoreRequest,
        dataset: &DatasetName,
    ) -> Result<Vec<RawRow>, NarrascopeError> {
        let mut body = serde_json::to_value(request)
            .map_err(|err| NarrascopeError::ScoringHttp(err.to_string()))?;
        body["file1"] = Value::from(dataset.as_str());
        self.trace(body)
    }

    fn score_upload(
        &self,
        request: &ScoreRequest,
        rows: &[RawRow],
    ) -> Result<Vec<RawRow>, NarrascopeError> {
        let mut body = serde_json::to_value(request)
            .map_err(|err| NarrascopeError::ScoringHttp(err.to_string()))?;
        body["uploadedData"] = serde_json::to_value(rows)
            .map_err(|err| NarrascopeError::ScoringHttp(err.to_string()))?;
        self.trace(body)
    }

    fn list_datasets(&self) -> Result<Vec<String>, NarrascopeError> {
        let payload = self.post_json("post-datasets", &Value::Object(Default::default()))?;
        strings_from(&payload, "files")
    }

    fn generate_narratives(
        &self,
        rows: &[RawRow],
        num_narratives: usize,
    ) -> Result<Vec<NarrativePair>, NarrascopeError> {
        let body = serde_json::json!({
            "filteredData": rows,
            "numNarratives": num_narratives,
        });
        let payload = self.post_json("generate-narratives", &body)?;
        let narratives = payload
            .get("narratives")
            .cloned()
            .ok_or_else(|| NarrascopeError::ScoringHttp("missing narratives field".to_string()))?;
        serde_json::from_value(narratives)
            .map_err(|err| NarrascopeError::ScoringHttp(err.to_string()))
    }

    fn save_session(
        &self,
        rows: &[RawRow],
        metadata: &SessionMetadata,
    ) -> Result<SavedSession, NarrascopeError> {
        let body = serde_json::json!({
            "filteredData": rows,
            "metadata": metadata,
        });
        let payload = self.post_json("save-filtered-data", &body)?;
        serde_json::from_value(payload)
            .map_err(|err| NarrascopeError::ScoringHttp(err.to_string()))
    }

    fn list_sessions(&self) -> Result<Vec<String>, NarrascopeError> {
        let url = self.url("list-saved-data");
        let response = self.send_with_retries(|| self.client.get(&url))?;
        let response = Self::handle_status(response)?;
        let payload: Value = response
            .json()
            .map_err(|err| NarrascopeError::ScoringHttp(err.to_string()))?;
        strings_from(&payload, "datasets")
    }

    fn load_session(&self, filename: &str) -> Result<Vec<RawRow>, NarrascopeError> {
        let body = serde_json::json!({ "filename": filename });
        let payload = self.post_json("load-saved-data", &body)?;
        rows_from(&payload, "data")
    }
}

fn rows_from(payload: &Value, field: &str) -> Result<Vec<RawRow>, NarrascopeError> {
    let rows = payload
        .get(field)
        .and_then(|value| value.as_array())
        .ok_or_else(|| NarrascopeError::ScoringHttp(format!("missing {field} field")))?;
    rows.iter()
        .map(|value| match value {
            Value::Object(row) => Ok(row.clone()),
            other => Err(NarrascopeError::ScoringHttp(format!(
                "expected row object, got {other}"
            ))),
        })
        .collect()
}

fn strings_from(payload: &Value, field: &str) -> Result<Vec<String>, NarrascopeError> {
    let values = payload
        .get(field)
        .and_then(|value| value.as_array())
        .ok_or_else(|| NarrascopeError::ScoringHttp(format!("missing {field} field")))?;
    Ok(values
        .iter()
        .filter_map(|value| value.as_str().map(|name| name.to_string()))
        .collect())
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
