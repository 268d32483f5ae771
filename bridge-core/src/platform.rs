//! The platform-side role: performs the real SOAP call for each request
//! envelope and publishes the signed reply.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bridge_transport::{tls, SoapCallError, SoapCaller, TlsContextResolver};
use bridge_wire::{signing, ConnectionId, Envelope, ReplyEnvelope, RequestEnvelope, Signer};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::ports::{MessageHandler, Outcome, PublishError, Publisher};

/// Why a request envelope could not be answered.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The message is not a request envelope.
    #[error("malformed request envelope: {0}")]
    Malformed(#[from] bridge_wire::Error),
    /// The envelope was not signed by the bridge key.
    #[error("request {0} failed signature verification")]
    InvalidSignature(ConnectionId),
    /// No TLS context exists for the organization.
    #[error(transparent)]
    Tls(#[from] tls::Error),
    /// The real SOAP endpoint failed.
    #[error("outbound call failed: {0}")]
    Call(#[from] SoapCallError),
    /// The reply envelope could not be signed.
    #[error("failed to sign reply: {0}")]
    Sign(#[from] signing::Error),
    /// The reply never reached the bus.
    #[error("failed to publish reply: {0}")]
    Publish(#[from] PublishError),
}

impl ProcessError {
    /// Returns `true` if processing the same message again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Call(e) => e.is_transient(),
            Self::Publish(_) => true,
            Self::Malformed(_) | Self::InvalidSignature(_) | Self::Tls(_) | Self::Sign(_) => false,
        }
    }
}

impl From<ProcessError> for Outcome {
    fn from(error: ProcessError) -> Self {
        if error.is_retryable() {
            Self::RetryableFailure(error.to_string())
        } else {
            Self::FatalFailure(error.to_string())
        }
    }
}

/// Configuration of the [`PlatformBridge`].
#[derive(Debug, Clone)]
pub struct PlatformOptions {
    /// Base URI of the real SOAP endpoint, e.g. `https://platform:443`. The
    /// request context is appended as path.
    pub call_endpoint: String,
    /// Topic carrying reply envelopes back to the client side.
    pub replies_topic: String,
    /// Bound on one outbound call, handshake included.
    pub call_timeout: Duration,
}

impl Default for PlatformOptions {
    fn default() -> Self {
        Self {
            call_endpoint: "https://localhost:443".to_string(),
            replies_topic: "replies".to_string(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl PlatformOptions {
    /// Sets the base URI of the real SOAP endpoint.
    pub fn with_call_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.call_endpoint = endpoint.into();
        self
    }

    /// Sets the topic replies are published to.
    pub fn with_replies_topic(mut self, topic: impl Into<String>) -> Self {
        self.replies_topic = topic.into();
        self
    }

    /// Sets the bound on one outbound call.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Consumes request envelopes, makes the outbound call and publishes the reply.
#[derive(Clone)]
pub struct PlatformBridge {
    options: PlatformOptions,
    signer: Arc<Signer>,
    tls: Arc<TlsContextResolver>,
    caller: Arc<dyn SoapCaller>,
    publisher: Arc<dyn Publisher>,
}

impl std::fmt::Debug for PlatformBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformBridge")
            .field("options", &self.options)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

impl PlatformBridge {
    /// Creates the platform role. Outbound calls go through `caller` with the
    /// TLS context `tls` selects for the request's organization.
    pub fn new(
        options: PlatformOptions,
        signer: Arc<Signer>,
        tls: Arc<TlsContextResolver>,
        caller: Arc<dyn SoapCaller>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self { options, signer, tls, caller, publisher }
    }

    fn call_uri(&self, context: &str) -> String {
        let base = self.options.call_endpoint.trim_end_matches('/');
        if context.is_empty() || context.starts_with('/') {
            format!("{base}{context}")
        } else {
            format!("{base}/{context}")
        }
    }

    /// Processes one request envelope.
    pub async fn process(&self, message: &str) -> Result<(), ProcessError> {
        let request = RequestEnvelope::decode(message)?;
        let id = request.connection_id();

        if !self.signer.verify_envelope(&request) {
            error!(connection_id = %id, "request failed signature verification");
            return Err(ProcessError::InvalidSignature(id.clone()));
        }

        let context = self.tls.context_for(request.organization())?;
        let uri = self.call_uri(request.context());
        debug!(
            connection_id = %id,
            %uri,
            organization = request.organization(),
            "calling soap endpoint"
        );

        let timeout = self.options.call_timeout;
        let response = self.caller.call(&uri, context, request.soap_payload(), timeout).await?;

        let mut reply = ReplyEnvelope::new(id.clone(), response);
        self.signer.sign_envelope(&mut reply)?;
        self.publisher.publish(&self.options.replies_topic, reply.encode()).await?;

        info!(connection_id = %id, "reply published");
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for PlatformBridge {
    async fn handle(&self, message: &str) -> Outcome {
        match self.process(message).await {
            Ok(()) => Outcome::Processed,
            Err(e) => {
                if e.is_retryable() {
                    warn!(error = %e, "request failed, may be retried");
                } else {
                    error!(error = %e, "request failed permanently");
                }
                e.into()
            }
        }
    }
}
