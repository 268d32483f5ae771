//! Wire formats for the SOAP bridge.
//!
//! Both envelope kinds share the same layout: a list of fields joined by
//! [`SEPARATOR`], each field followed by the separator, and the detached
//! signature appended at the very end. Every variable-length field is base64
//! encoded so the separator can never appear inside it. The connection id is
//! the only field carried as-is, which is why [`ConnectionId`] refuses any
//! value containing the separator.

use std::{borrow::Borrow, fmt};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{distributions::Alphanumeric, Rng};
use thiserror::Error;

pub mod reply;
pub mod request;
pub mod signing;

pub use reply::ReplyEnvelope;
pub use request::RequestEnvelope;
pub use signing::{Signer, SigningOptions};

/// The field separator on the wire.
pub const SEPARATOR: char = '~';

/// A malformed envelope. Never retried: the same bytes will fail the same way.
#[derive(Debug, Error)]
pub enum Error {
    /// The wire string has the wrong number of `~` separated tokens.
    #[error("invalid number of tokens for {kind} envelope: {found}")]
    TokenCount { kind: &'static str, found: usize },
    /// A field is not base64.
    #[error("field `{field}` is not valid base64: {source}")]
    Base64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },
    /// A decoded field is not UTF-8.
    #[error("field `{field}` is not valid UTF-8")]
    Utf8 { field: &'static str },
    /// The connection id is empty or contains the separator.
    #[error("invalid connection id: {0:?}")]
    ConnectionId(String),
}

/// A signed envelope, either a request or a reply.
pub trait Envelope {
    /// The encoded fields, each followed by the separator. This is exactly the
    /// content covered by the signature.
    fn unsigned_string(&self) -> String;

    /// The detached signature token, empty while unsigned.
    fn signature(&self) -> &str;

    /// Replaces the signature token.
    fn set_signature(&mut self, signature: String);

    /// The full wire string: the unsigned string followed by the signature.
    fn encode(&self) -> String {
        let mut wire = self.unsigned_string();
        wire.push_str(self.signature());
        wire
    }
}

/// Correlation key threading a single client call through both envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Length of generated ids.
    const LEN: usize = 32;

    /// Generates a new random id. Ids only contain ASCII alphanumerics.
    pub fn random() -> Self {
        let id = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(Self::LEN)
            .map(char::from)
            .collect();

        Self(id)
    }

    /// Wraps an existing id, rejecting empty values and values that contain
    /// the separator.
    pub fn new(id: impl Into<String>) -> Result<Self, Error> {
        let id = id.into();
        if id.is_empty() || id.contains(SEPARATOR) {
            return Err(Error::ConnectionId(id));
        }

        Ok(Self(id))
    }

    /// The id as carried on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the id, returning its string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ConnectionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Appends `value` followed by the separator.
#[inline]
pub(crate) fn push_raw(wire: &mut String, value: &str) {
    wire.push_str(value);
    wire.push(SEPARATOR);
}

/// Appends the base64 encoding of `value` followed by the separator.
#[inline]
pub(crate) fn push_encoded(wire: &mut String, value: &str) {
    STANDARD.encode_string(value.as_bytes(), wire);
    wire.push(SEPARATOR);
}

pub(crate) fn decode_field(field: &'static str, token: &str) -> Result<String, Error> {
    let bytes = STANDARD.decode(token).map_err(|source| Error::Base64 { field, source })?;
    String::from_utf8(bytes).map_err(|_| Error::Utf8 { field })
}
