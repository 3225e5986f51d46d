//! REST Client
//!
//! Thin `reqwest` wrapper around the tutor backend's request/response
//! endpoints. The streaming chat does not go through here; see `ws`.

use crate::models::{
    Answer, ConceptsResponse, IndexStatus, PracticePayload, PracticeResponse, QueryPayload,
    QueryResponse, RegisterUserPayload, ReindexResponse, StatusResponse, SubmitAnswerPayload,
    SubmitAnswerResponse, UserProfile,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never produced a response, or its body was unreadable.
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The backend answered with a non-success status.
    #[error("{body}")]
    Status { status: StatusCode, body: String },
    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Client for the tutor backend's REST endpoints.
#[derive(Clone, Debug)]
pub struct TutorApi {
    http: Client,
    base_url: String,
}

impl TutorApi {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends the request and decodes a JSON body from a success response.
    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!(%status, bytes = text.len(), "Received response.");

        if !status.is_success() {
            let body = if text.is_empty() {
                format!("Error {}", status.as_u16())
            } else {
                text
            };
            return Err(ApiError::Status { status, body });
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// `POST /v1/user`: creates or updates the user's profile.
    #[instrument(skip(self))]
    pub async fn register_user(
        &self,
        user_id: &str,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<StatusResponse, ApiError> {
        let payload = RegisterUserPayload {
            user_id: user_id.to_string(),
            name: name.map(str::to_string),
            email: email.map(str::to_string),
        };
        self.execute(self.http.post(self.url("/v1/user")).json(&payload))
            .await
    }

    /// `GET /v1/user/{user_id}`. The backend answers `{}` for unknown users.
    #[instrument(skip(self))]
    pub async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, ApiError> {
        let body: Value = self
            .execute(self.http.get(self.url(&format!("/v1/user/{user_id}"))))
            .await?;
        if body.as_object().is_some_and(|o| o.is_empty()) || body.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(body)?))
    }

    /// `GET /v1/concepts`.
    #[instrument(skip(self))]
    pub async fn list_concepts(&self) -> Result<Vec<String>, ApiError> {
        let response: ConceptsResponse = self
            .execute(self.http.get(self.url("/v1/concepts")))
            .await?;
        Ok(response.concepts)
    }

    /// `POST /v1/practice`: up to `n` questions picked for the user's mastery.
    #[instrument(skip(self))]
    pub async fn practice(
        &self,
        user_id: &str,
        concept: &str,
        n: u32,
    ) -> Result<PracticeResponse, ApiError> {
        let payload = PracticePayload {
            user_id: user_id.to_string(),
            concept: concept.to_string(),
            n,
        };
        self.execute(self.http.post(self.url("/v1/practice")).json(&payload))
            .await
    }

    /// `POST /v1/submit_answer`.
    #[instrument(skip(self, answer))]
    pub async fn submit_answer(
        &self,
        user_id: &str,
        concept: &str,
        qid: &str,
        answer: Answer,
    ) -> Result<SubmitAnswerResponse, ApiError> {
        let payload = SubmitAnswerPayload::new(user_id, concept, qid, answer);
        self.execute(self.http.post(self.url("/v1/submit_answer")).json(&payload))
            .await
    }

    /// `POST /v1/query`: a complete, non-streamed answer with its sources.
    #[instrument(skip(self))]
    pub async fn query(&self, user_id: &str, query: &str) -> Result<QueryResponse, ApiError> {
        let payload = QueryPayload {
            user_id: user_id.to_string(),
            query: query.to_string(),
        };
        self.execute(self.http.post(self.url("/v1/query")).json(&payload))
            .await
    }

    /// `GET /admin/index/status`.
    #[instrument(skip(self))]
    pub async fn index_status(&self) -> Result<IndexStatus, ApiError> {
        self.execute(self.http.get(self.url("/admin/index/status")))
            .await
    }

    /// `POST /admin/reindex`: starts a background rebuild and returns at once.
    #[instrument(skip(self))]
    pub async fn reindex(&self) -> Result<ReindexResponse, ApiError> {
        self.execute(
            self.http
                .post(self.url("/admin/reindex"))
                .json(&serde_json::json!({})),
        )
        .await
    }
}
