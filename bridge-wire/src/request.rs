//! Request envelopes.

use tracing::debug;

use crate::{decode_field, push_encoded, push_raw, ConnectionId, Envelope, Error, SEPARATOR};

/// A SOAP call travelling from the client-side role to the platform-side role.
///
/// The organization identity is optional. Without it the envelope uses the
/// 4-token wire form and the platform side must not select per-organization
/// TLS material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvelope {
    connection_id: ConnectionId,
    /// Logical operation name, also used to select the call timeout.
    context: String,
    soap_payload: String,
    organization: Option<String>,
    signature: String,
}

impl RequestEnvelope {
    /// Token count of the form without organization identity.
    const TOKENS_WITHOUT_ORGANIZATION: usize = 4;
    /// Token count of the form with organization identity.
    const TOKENS_WITH_ORGANIZATION: usize = 5;

    /// Creates an unsigned envelope without organization identity.
    pub fn new(
        connection_id: ConnectionId,
        context: impl Into<String>,
        soap_payload: impl Into<String>,
    ) -> Self {
        Self {
            connection_id,
            context: context.into(),
            soap_payload: soap_payload.into(),
            organization: None,
            signature: String::new(),
        }
    }

    /// Attaches the organization identity of the calling client.
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// The id that correlates the reply.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// The operation name.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// The SOAP request body.
    pub fn soap_payload(&self) -> &str {
        &self.soap_payload
    }

    /// The organization identity, or `""` when the envelope carries none.
    pub fn organization(&self) -> &str {
        self.organization.as_deref().unwrap_or_default()
    }

    /// Returns `true` if the envelope names a non-empty organization.
    pub fn has_organization(&self) -> bool {
        self.organization.as_deref().is_some_and(|org| !org.is_empty())
    }

    /// Decodes a signed request wire string.
    ///
    /// The variant is selected by token count: 4 tokens carry no organization
    /// identity, 5 tokens do. Anything else is malformed.
    pub fn decode(wire: &str) -> Result<Self, Error> {
        let tokens: Vec<&str> = wire.split(SEPARATOR).collect();
        debug!(tokens = tokens.len(), "decoding request envelope");

        let (organization, signature) = match tokens.len() {
            Self::TOKENS_WITHOUT_ORGANIZATION => (None, tokens[3]),
            Self::TOKENS_WITH_ORGANIZATION => {
                (Some(decode_field("organization", tokens[3])?), tokens[4])
            }
            found => return Err(Error::TokenCount { kind: "request", found }),
        };

        Ok(Self {
            connection_id: ConnectionId::new(tokens[0])?,
            context: decode_field("context", tokens[1])?,
            soap_payload: decode_field("soap_payload", tokens[2])?,
            organization,
            signature: signature.to_string(),
        })
    }
}

impl Envelope for RequestEnvelope {
    fn unsigned_string(&self) -> String {
        let encoded = (self.context.len() + self.soap_payload.len()) * 4 / 3;
        let mut wire = String::with_capacity(self.connection_id.as_str().len() + encoded + 16);

        push_raw(&mut wire, self.connection_id.as_str());
        push_encoded(&mut wire, &self.context);
        push_encoded(&mut wire, &self.soap_payload);
        if let Some(ref organization) = self.organization {
            push_encoded(&mut wire, organization);
        }

        wire
    }

    fn signature(&self) -> &str {
        &self.signature
    }

    fn set_signature(&mut self, signature: String) {
        self.signature = signature;
    }
}
