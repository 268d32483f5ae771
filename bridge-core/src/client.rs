//! The client-side role: turns inbound calls into signed request envelopes and
//! waits for the correlated reply.

use std::sync::Arc;

use async_trait::async_trait;
use bridge_wire::{signing, ConnectionId, Envelope, ReplyEnvelope, RequestEnvelope, Signer};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
    ports::{MessageHandler, Outcome, PublishError, Publisher},
    registry::{CorrelationError, CorrelationRegistry, RegistryError},
    timeouts::TimeoutTable,
};

/// Why a forwarded call produced no reply.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The call could not be registered.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// The request envelope could not be signed.
    #[error("failed to sign request: {0}")]
    Sign(#[from] signing::Error),
    /// The request never reached the bus.
    #[error("failed to publish request: {0}")]
    Publish(#[from] PublishError),
    /// The call timed out or was cancelled.
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
}

impl ForwardError {
    /// Returns `true` if no reply arrived in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Correlation(CorrelationError::Timeout))
    }
}

/// Configuration of the [`ClientBridge`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Topic carrying request envelopes to the platform side.
    pub requests_topic: String,
    /// Caller deadlines.
    pub timeouts: TimeoutTable,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self { requests_topic: "requests".to_string(), timeouts: TimeoutTable::default() }
    }
}

impl ClientOptions {
    /// Sets the topic requests are published to.
    pub fn with_requests_topic(mut self, topic: impl Into<String>) -> Self {
        self.requests_topic = topic.into();
        self
    }

    /// Sets the caller deadlines.
    pub fn with_timeouts(mut self, timeouts: TimeoutTable) -> Self {
        self.timeouts = timeouts;
        self
    }
}

/// One inbound SOAP call to forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    /// Operation name, the request path below the proxy prefix.
    pub context: String,
    /// The SOAP request body.
    pub payload: String,
    /// Common name of the caller's certificate, if the call was authenticated.
    pub organization: Option<String>,
}

/// Forwards calls over the bus and hands out the matching [`ReplyHandler`].
#[derive(Clone)]
pub struct ClientBridge {
    options: ClientOptions,
    signer: Arc<Signer>,
    registry: Arc<CorrelationRegistry>,
    publisher: Arc<dyn Publisher>,
}

impl std::fmt::Debug for ClientBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBridge")
            .field("options", &self.options)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ClientBridge {
    /// Creates a client that publishes through `publisher` and suspends callers
    /// in `registry`.
    pub fn new(
        options: ClientOptions,
        signer: Arc<Signer>,
        registry: Arc<CorrelationRegistry>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self { options, signer, registry, publisher }
    }

    /// The registry holding pending calls.
    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    /// Forwards `request` and waits for its reply.
    ///
    /// The pending call is registered before the request is published, so a
    /// reply can never overtake its registration. Dropping the returned future
    /// cancels the pending call.
    pub async fn forward(&self, request: ForwardRequest) -> Result<String, ForwardError> {
        let ForwardRequest { context, payload, organization } = request;

        let id = ConnectionId::random();
        let timeout = self.options.timeouts.for_call(&context, &payload);

        let mut envelope = RequestEnvelope::new(id.clone(), context, payload);
        if let Some(organization) = organization {
            envelope = envelope.with_organization(organization);
        }
        self.signer.sign_envelope(&mut envelope)?;

        let handle = self.registry.register(id.clone(), timeout)?;
        debug!(connection_id = %id, context = envelope.context(), ?timeout, "forwarding call");

        self.publisher.publish(&self.options.requests_topic, envelope.encode()).await?;

        handle.wait().await.map_err(|e| {
            warn!(connection_id = %id, error = %e, "call failed");
            e.into()
        })
    }

    /// A handler for the replies topic that completes this client's calls.
    pub fn reply_handler(&self) -> ReplyHandler {
        ReplyHandler { signer: Arc::clone(&self.signer), registry: Arc::clone(&self.registry) }
    }
}

/// Consumes reply envelopes and resolves their pending calls.
#[derive(Debug, Clone)]
pub struct ReplyHandler {
    signer: Arc<Signer>,
    registry: Arc<CorrelationRegistry>,
}

impl ReplyHandler {
    /// Creates a handler that verifies with `signer` and resolves in `registry`.
    pub fn new(signer: Arc<Signer>, registry: Arc<CorrelationRegistry>) -> Self {
        Self { signer, registry }
    }
}

#[async_trait]
impl MessageHandler for ReplyHandler {
    async fn handle(&self, message: &str) -> Outcome {
        let reply = match ReplyEnvelope::decode(message) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "malformed reply envelope");
                return Outcome::FatalFailure(e.to_string());
            }
        };

        if !self.signer.verify_envelope(&reply) {
            error!(connection_id = %reply.connection_id(), "reply failed signature verification");
            return Outcome::FatalFailure("invalid signature".to_string());
        }

        let id = reply.connection_id().clone();
        if self.registry.resolve(id.as_str(), reply.into_response()) {
            debug!(connection_id = %id, "reply delivered");
        }

        // A late or duplicate reply is harmless.
        Outcome::Processed
    }
}
