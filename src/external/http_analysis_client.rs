use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::external::analysis_client::{
    AnalysisClient, AnalysisClientError, AnalysisRequest, ExternalJob, JobStatus,
};

#[derive(Debug, Clone)]
pub struct AnalysisClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
}

impl AnalysisClientConfig {
    pub fn from_env() -> Result<Self, AnalysisClientError> {
        let base_url = std::env::var("ANALYSIS_BASE_URL")
            .map_err(|_| AnalysisClientError::BadResponse("ANALYSIS_BASE_URL not set".into()))?;

        let request_timeout = std::env::var("ANALYSIS_REQUEST_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Ok(Self {
            base_url,
            api_key: std::env::var("ANALYSIS_API_KEY").ok().filter(|k| !k.is_empty()),
            request_timeout,
        })
    }
}

/// `POST {base}/jobs` to submit, `GET {base}/jobs/{id}` to poll.
pub struct HttpAnalysisClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpAnalysisClient {
    pub fn new(config: AnalysisClientConfig) -> Result<Self, AnalysisClientError> {
        let mut base_url = Url::parse(&config.base_url)
            .map_err(|e| AnalysisClientError::BadResponse(format!("invalid base url: {}", e)))?;
        // Url::join drops the last path segment unless it ends with '/'
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AnalysisClientError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key,
        })
    }

    pub fn from_env() -> Result<Self, AnalysisClientError> {
        Self::new(AnalysisClientConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> Result<Url, AnalysisClientError> {
        self.base_url
            .join(path)
            .map_err(|e| AnalysisClientError::BadResponse(format!("invalid path {}: {}", path, e)))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, AnalysisClientError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisClientError::BadResponse(format!("HTTP {}: {}", status, body)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AnalysisClientError::Parse(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(alias = "id")]
    job_id: Value,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    #[serde(alias = "state")]
    status: String,
    #[serde(default)]
    outputs: Vec<Value>,
}

/// Outputs are usually plain strings; some deployments wrap them in objects.
fn output_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(map) => map
            .get("text")
            .or_else(|| map.get("content"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn submit(&self, request: &AnalysisRequest) -> Result<String, AnalysisClientError> {
        let url = self.endpoint("jobs")?;

        let response = self
            .authorize(self.client.post(url))
            .json(request)
            .send()
            .await
            .map_err(|e| AnalysisClientError::Network(e.to_string()))?;

        let body: SubmitResponse = Self::read_json(response).await?;
        let job_id = match body.job_id {
            Value::String(s) if !s.trim().is_empty() => s,
            Value::Number(n) => n.to_string(),
            other => {
                return Err(AnalysisClientError::Parse(format!("unusable job id: {}", other)));
            }
        };

        debug!("Submitted {} job {}", request.kind, job_id);
        Ok(job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<ExternalJob, AnalysisClientError> {
        let url = self.endpoint(&format!("jobs/{}", job_id))?;

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| AnalysisClientError::Network(e.to_string()))?;

        let body: PollResponse = Self::read_json(response).await?;

        Ok(ExternalJob {
            job_id: job_id.to_string(),
            status: JobStatus::from_remote(&body.status),
            outputs: body.outputs.into_iter().filter_map(output_text).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, api_key: Option<&str>) -> HttpAnalysisClient {
        HttpAnalysisClient::new(AnalysisClientConfig {
            base_url: format!("{}/api", server.uri()),
            api_key: api_key.map(|k| k.to_string()),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_submit_posts_request_and_reads_job_id() {
        let server = MockServer::start().await;
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let request = AnalysisRequest::individual("AAPL", date);

        Mock::given(method("POST"))
            .and(path("/api/jobs"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(json!({
                "kind": "individual",
                "payload": { "symbol": "AAPL", "date": "2026-10-16" }
            })))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "job_id": "job-42" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Some("secret"));
        assert_eq!(client.submit(&request).await.unwrap(), "job-42");
    }

    #[tokio::test]
    async fn test_submit_accepts_numeric_id_alias() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 7 })))
            .mount(&server)
            .await;

        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let client = client_for(&server, None);
        let id = client.submit(&AnalysisRequest::individual("MSFT", date)).await.unwrap();
        assert_eq!(id, "7");
    }

    #[tokio::test]
    async fn test_submit_surfaces_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/jobs"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let client = client_for(&server, None);
        let err = client.submit(&AnalysisRequest::individual("MSFT", date)).await.unwrap_err();
        assert!(matches!(err, AnalysisClientError::BadResponse(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_poll_maps_state_and_outputs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/jobs/job-42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "state": "SUCCEEDED",
                "outputs": ["draft", { "text": "{\"verdict\": \"BUY\"}" }, null]
            })))
            .mount(&server)
            .await;

        let job = client_for(&server, None).poll("job-42").await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.outputs, vec!["draft", "{\"verdict\": \"BUY\"}"]);
    }

    #[tokio::test]
    async fn test_poll_without_outputs_is_running() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/jobs/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "queued" })))
            .mount(&server)
            .await;

        let job = client_for(&server, None).poll("abc").await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.outputs.is_empty());
    }
}
