//! HTTP transport for the polyred service.
//!
//! Every call attaches the configured credential and classifies failures into
//! three kinds: the service could not be reached ([`TransportError`]), it
//! answered with a non-2xx status and a message ([`Error::RemoteRejection`]),
//! or its body could not be decoded ([`TransportError::Decode`]).
//!
//! The transport is stateless. Session bookkeeping lives in
//! [`crate::session::SessionController`].

mod registry;
pub mod wire;

pub use registry::ModelFormat;
pub use wire::HealthStatus;

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::config::{ClientConfig, Credential};
use crate::error::{Error, Result, TransportError};
use crate::models::*;
use wire::*;

/// HTTP client for the polyred service.
#[derive(Debug, Clone)]
pub struct PolyredClient {
    base_url: String,
    credential: Credential,
    request_timeout: Duration,
    run_timeout: Option<Duration>,
    client: Client,
}

impl PolyredClient {
    /// Create client from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Create with explicit configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        // Timeouts are per request: `run` must be able to wait indefinitely.
        let client = Client::builder().build()?;
        Ok(Self {
            base_url: config.endpoint,
            credential: config.credential,
            request_timeout: config.request_timeout,
            run_timeout: config.run_timeout,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a request with the credential and the ordinary timeout attached.
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.untimed_request(method, path)
            .timeout(self.request_timeout)
    }

    /// Build a request with the credential attached and no deadline.
    fn untimed_request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%method, %url, "polyred request");
        self.client
            .request(method, &url)
            .basic_auth(&self.credential.username, Some(self.credential.password()))
    }

    /// Handle response, decoding a 2xx body as `T` and anything else as an error.
    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let status = response.status();
        let body = response.bytes().await?;
        tracing::debug!(%status, bytes = body.len(), "polyred response");
        if status.is_success() {
            serde_json::from_slice(&body).map_err(|e| {
                TransportError::Decode {
                    status,
                    reason: e.to_string(),
                }
                .into()
            })
        } else {
            Err(rejection(status, &body))
        }
    }

    /// Handle response whose success body only acknowledges the call.
    async fn handle_ack(&self, response: Response) -> Result<()> {
        let ack: MessageBody = self.handle_response(response).await?;
        if let Some(message) = ack.message.filter(|m| !m.is_empty()) {
            tracing::debug!(%message, "polyred acknowledged");
        }
        Ok(())
    }

    // ============================================================
    // Service Operations
    // ============================================================

    /// Liveness and version check.
    pub async fn health(&self) -> Result<HealthStatus> {
        let response = self.request(Method::GET, "/health").send().await?;
        self.handle_response(response).await
    }

    /// Submit a configuration. Repeated calls replace the previous one.
    pub async fn configure(&self, session_id: &str, config: &Configuration) -> Result<()> {
        let response = self
            .request(Method::POST, &format!("/config/{}", session_id))
            .json(&ConfigRequest {
                percent: config.clone(),
            })
            .send()
            .await?;
        self.handle_ack(response).await
    }

    /// Trigger the simplification and wait for its terminal outcome.
    ///
    /// Only the configured run timeout applies; without one the call blocks
    /// until the service answers.
    pub async fn run(&self, session_id: &str) -> Result<RunOutcome> {
        let mut request = self.untimed_request(Method::POST, &format!("/run/{}", session_id));
        if let Some(timeout) = self.run_timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        let body: RunResponse = self.handle_response(response).await?;
        Ok(RunOutcome {
            phase_ids: body.ids,
            assumed_optimal: body.optimal,
        })
    }

    /// Phases of the session that have not been rated yet.
    pub async fn inspect(&self, session_id: &str) -> Result<Vec<PhaseId>> {
        let response = self
            .request(Method::GET, &format!("/evaluate/{}", session_id))
            .send()
            .await?;
        let body: InspectResponse = self.handle_response(response).await?;
        Ok(body.ids)
    }

    /// Submit a batch of ratings.
    pub async fn evaluate(&self, session_id: &str, ratings: &RatingSubmission) -> Result<()> {
        let body: EvaluateRequest = ratings
            .iter()
            .map(|(phase, score)| (phase.to_string(), score))
            .collect();
        let response = self
            .request(Method::PUT, &format!("/evaluate/{}", session_id))
            .json(&body)
            .send()
            .await?;
        self.handle_ack(response).await
    }

    /// Clear the session on the service side. Returns the (same) session id.
    pub async fn reset(&self, session_id: &str) -> Result<SessionId> {
        let response = self
            .request(Method::POST, &format!("/reset/{}", session_id))
            .send()
            .await?;
        let body: IdResponse = self.handle_response(response).await?;
        Ok(body.id)
    }

    /// Fork the session. Returns the new session id.
    pub async fn copy(&self, session_id: &str) -> Result<SessionId> {
        let response = self
            .request(Method::POST, &format!("/copy/{}", session_id))
            .send()
            .await?;
        let body: IdResponse = self.handle_response(response).await?;
        Ok(body.id)
    }

    /// Stream one phase's model bytes into `sink`. Returns the byte count.
    pub async fn download_phase<W>(&self, session_id: &str, phase_id: &str, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let response = self
            .request(
                Method::GET,
                &format!("/download/{}/{}", session_id, phase_id),
            )
            .send()
            .await?;
        self.stream_to(response, sink).await
    }

    /// Stream the latest result for a model into `sink`. Returns the byte count.
    pub async fn download_model<W>(&self, model_id: &str, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let response = self
            .request(Method::GET, &format!("/download/{}", model_id))
            .send()
            .await?;
        self.stream_to(response, sink).await
    }

    async fn stream_to<W>(&self, mut response: Response, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await?;
            return Err(rejection(status, &body));
        }

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            sink.write_all(&chunk).await.map_err(TransportError::Sink)?;
            written += chunk.len() as u64;
        }
        sink.flush().await.map_err(TransportError::Sink)?;
        Ok(written)
    }
}

/// Convert a non-2xx response into an error, keeping the server message verbatim.
fn rejection(status: StatusCode, body: &[u8]) -> Error {
    if status == StatusCode::UNAUTHORIZED {
        return TransportError::Unauthorized.into();
    }
    match serde_json::from_slice::<MessageBody>(body) {
        Ok(MessageBody {
            message: Some(message),
        }) => Error::RemoteRejection { status, message },
        Ok(MessageBody { message: None }) => TransportError::Decode {
            status,
            reason: "error response carries no message field".to_string(),
        }
        .into(),
        Err(e) => TransportError::Decode {
            status,
            reason: e.to_string(),
        }
        .into(),
    }
}
