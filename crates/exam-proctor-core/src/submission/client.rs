//! HTTP submission client
//!
//! Posts the attempt to `{base_url}/assignments/{assignment}/attempts/{attempt}/submit`
//! with a bearer token. Transient failures (network errors, 5xx, 429) are
//! retried with exponential backoff; other 4xx answers are returned at once.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::time::sleep;

use super::{SubmissionApi, SubmissionPayload, SubmissionResponse, SubmitError};
use crate::config::SubmissionConfig;
use crate::store::AttemptScope;

/// Submission endpoint client
#[derive(Debug, Clone)]
pub struct HttpSubmissionClient {
    client: Client,
    config: SubmissionConfig,
    token: Option<String>,
}

impl HttpSubmissionClient {
    /// Create a client from the submission config
    pub fn with_config(config: SubmissionConfig) -> Result<Self, SubmitError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SubmitError::Config(e.to_string()))?;

        Ok(Self {
            client,
            config,
            token: None,
        })
    }

    pub fn builder() -> HttpSubmissionClientBuilder {
        HttpSubmissionClientBuilder::new()
    }

    /// Attach the caller-supplied bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn timeout_ms(&self) -> u64 {
        self.config.timeout_ms
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    fn submit_url(&self, scope: &AttemptScope) -> String {
        format!(
            "{}/assignments/{}/attempts/{}/submit",
            self.config.base_url.trim_end_matches('/'),
            scope.assignment_id,
            scope.attempt_id
        )
    }

    async fn send_once(
        &self,
        url: &str,
        payload: &SubmissionPayload,
    ) -> Result<SubmissionResponse, SubmitError> {
        let mut request = self.client.post(url).json(payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SubmitError::Network(e.to_string()))?;
        let status = response.status();

        if status.is_success() {
            return response
                .json::<SubmissionResponse>()
                .await
                .map_err(|e| SubmitError::Parse(e.to_string()));
        }

        let message = response.text().await.unwrap_or_default();
        let message = match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                format!("authentication failed: {}", message)
            }
            _ => message,
        };
        Err(SubmitError::Server {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl SubmissionApi for HttpSubmissionClient {
    async fn submit(
        &self,
        scope: &AttemptScope,
        payload: &SubmissionPayload,
    ) -> Result<SubmissionResponse, SubmitError> {
        let url = self.submit_url(scope);
        let mut last_error = None;
        let mut backoff_ms = self.config.initial_backoff_ms;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::debug!(
                    attempt = attempt,
                    backoff_ms = backoff_ms,
                    attempt_scope = %scope,
                    "Retrying submission"
                );
                sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms as f64 * self.config.backoff_multiplier) as u64;
                backoff_ms = backoff_ms.min(self.config.max_backoff_ms);
            }

            match self.send_once(&url, payload).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt,
                        error = %e,
                        attempt_scope = %scope,
                        "Submission request failed"
                    );
                    let permanent = e.is_permanent();
                    last_error = Some(e);
                    if permanent {
                        break;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| SubmitError::Network("no submission attempt was made".to_string())))
    }
}

/// Builder for [`HttpSubmissionClient`]
#[derive(Debug, Clone, Default)]
pub struct HttpSubmissionClientBuilder {
    config: SubmissionConfig,
    token: Option<String>,
}

impl HttpSubmissionClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config section
    pub fn config(mut self, config: SubmissionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn timeout_ms(mut self, timeout: u64) -> Self {
        self.config.timeout_ms = timeout;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn initial_backoff_ms(mut self, backoff: u64) -> Self {
        self.config.initial_backoff_ms = backoff;
        self
    }

    pub fn max_backoff_ms(mut self, backoff: u64) -> Self {
        self.config.max_backoff_ms = backoff;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    pub fn build(self) -> Result<HttpSubmissionClient, SubmitError> {
        let client = HttpSubmissionClient::with_config(self.config)?;
        Ok(match self.token {
            Some(token) => client.with_token(token),
            None => client,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::IntegrityFlags;
    use crate::submission::AnswerSheet;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SUBMIT_PATH: &str = "/assignments/quiz-1/attempts/a-1/submit";

    fn scope() -> AttemptScope {
        AttemptScope::new("quiz-1", "a-1")
    }

    fn payload() -> SubmissionPayload {
        let mut answers = AnswerSheet::new();
        answers.set("q1", "A");
        SubmissionPayload::new(answers, IntegrityFlags::default(), None)
    }

    fn client(server: &MockServer) -> HttpSubmissionClient {
        HttpSubmissionClient::builder()
            .base_url(server.uri())
            .token("secret-token")
            .max_retries(2)
            .initial_backoff_ms(1)
            .max_backoff_ms(5)
            .build()
            .unwrap()
    }

    fn graded() -> serde_json::Value {
        serde_json::json!({
            "score": 50.0,
            "correctCount": 1,
            "totalQuestions": 2,
            "showResults": true,
            "isLateSubmission": true
        })
    }

    #[test]
    fn test_builder() {
        let client = HttpSubmissionClient::builder()
            .base_url("https://exam.test/api/")
            .timeout_ms(2500)
            .max_retries(5)
            .build()
            .unwrap();

        assert_eq!(client.base_url(), "https://exam.test/api/");
        assert_eq!(client.timeout_ms(), 2500);
        assert_eq!(client.max_retries(), 5);
        assert_eq!(
            client.submit_url(&scope()),
            "https://exam.test/api/assignments/quiz-1/attempts/a-1/submit"
        );
    }

    #[tokio::test]
    async fn test_submit_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SUBMIT_PATH))
            .and(header("authorization", "Bearer secret-token"))
            .and(body_partial_json(serde_json::json!({
                "answers": {"q1": "A"},
                "proctoringData": null
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(graded()))
            .expect(1)
            .mount(&server)
            .await;

        let response = client(&server).submit(&scope(), &payload()).await.unwrap();
        assert_eq!(response.correct_count, 1);
        assert!(response.is_late_submission);
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SUBMIT_PATH))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(SUBMIT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(graded()))
            .mount(&server)
            .await;

        let response = client(&server).submit(&scope(), &payload()).await.unwrap();
        assert_eq!(response.total_questions, 2);
    }

    #[tokio::test]
    async fn test_no_retry_on_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SUBMIT_PATH))
            .respond_with(ResponseTemplate::new(409).set_body_string("already submitted"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).submit(&scope(), &payload()).await.unwrap_err();
        assert_eq!(
            err,
            SubmitError::Server {
                status: 409,
                message: "already submitted".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SUBMIT_PATH))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server).submit(&scope(), &payload()).await.unwrap_err();
        assert!(matches!(err, SubmitError::Server { status: 500, .. }));
    }
}
