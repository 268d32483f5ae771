//! Reply envelopes.

use tracing::debug;

use crate::{decode_field, push_encoded, push_raw, ConnectionId, Envelope, Error, SEPARATOR};

/// The SOAP response travelling back from the platform-side role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyEnvelope {
    connection_id: ConnectionId,
    soap_response: String,
    signature: String,
}

impl ReplyEnvelope {
    const MIN_TOKENS: usize = 3;

    /// Creates an unsigned reply to the request `connection_id`.
    pub fn new(connection_id: ConnectionId, soap_response: impl Into<String>) -> Self {
        Self { connection_id, soap_response: soap_response.into(), signature: String::new() }
    }

    /// The id of the answered request.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// The SOAP response body.
    pub fn soap_response(&self) -> &str {
        &self.soap_response
    }

    /// Consumes the envelope, returning the SOAP response.
    pub fn into_response(self) -> String {
        self.soap_response
    }

    /// Decodes a signed reply wire string. Fewer than 3 tokens is malformed;
    /// trailing tokens past the signature are ignored.
    pub fn decode(wire: &str) -> Result<Self, Error> {
        let mut tokens = wire.splitn(Self::MIN_TOKENS + 1, SEPARATOR);

        let (Some(id), Some(response), Some(signature)) =
            (tokens.next(), tokens.next(), tokens.next())
        else {
            let found = wire.split(SEPARATOR).count();
            return Err(Error::TokenCount { kind: "reply", found });
        };

        if tokens.next().is_some() {
            debug!("ignoring trailing tokens in reply envelope");
        }

        Ok(Self {
            connection_id: ConnectionId::new(id)?,
            soap_response: decode_field("soap_response", response)?,
            signature: signature.to_string(),
        })
    }
}

impl Envelope for ReplyEnvelope {
    fn unsigned_string(&self) -> String {
        let mut wire = String::with_capacity(
            self.connection_id.as_str().len() + self.soap_response.len() * 4 / 3 + 8,
        );

        push_raw(&mut wire, self.connection_id.as_str());
        push_encoded(&mut wire, &self.soap_response);

        wire
    }

    fn signature(&self) -> &str {
        &self.signature
    }

    fn set_signature(&mut self, signature: String) {
        self.signature = signature;
    }
}
