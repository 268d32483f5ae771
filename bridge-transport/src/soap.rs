//! The outbound SOAP call made on the platform side.

use std::{io, pin::Pin, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    header::{HeaderValue, ACCEPT_CHARSET, CONTENT_TYPE, HOST},
    Method, Request, Uri,
};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_openssl::SslStream;
use tracing::{debug, trace};

use crate::TlsContext;

const XML_CONTENT_TYPE: &str = "text/xml;charset=UTF-8";
const SOAP_ACTION: &str = "SOAP-ACTION";

/// A failed outbound call.
#[derive(Debug, Error)]
pub enum SoapCallError {
    /// The call did not finish within its bound.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    /// The connection failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// OpenSSL library error.
    #[error("openssl error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),
    /// TLS handshake failure.
    #[error("tls error: {0}")]
    Tls(#[from] openssl::ssl::Error),
    /// The endpoint URI cannot be called.
    #[error("invalid uri {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },
    /// The HTTP exchange failed.
    #[error("http error: {0}")]
    Http(#[from] hyper::Error),
    /// The request could not be built.
    #[error("invalid request: {0}")]
    Request(#[from] hyper::http::Error),
}

impl SoapCallError {
    /// Returns `true` if the same call may succeed when tried again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Io(_))
    }
}

/// Performs a SOAP call against an HTTPS endpoint.
#[async_trait]
pub trait SoapCaller: Send + Sync + 'static {
    /// POSTs `payload` to `uri` using `tls` and returns the response body,
    /// whatever the status code. The whole exchange is bounded by `timeout`.
    async fn call(
        &self,
        uri: &str,
        tls: &TlsContext,
        payload: &str,
        timeout: Duration,
    ) -> Result<String, SoapCallError>;
}

/// [`SoapCaller`] over a fresh HTTP/1.1 connection per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpsSoapCaller;

impl HttpsSoapCaller {
    /// Creates a caller.
    pub fn new() -> Self {
        Self
    }

    async fn exchange(uri: Uri, tls: &TlsContext, payload: &str) -> Result<String, SoapCallError> {
        let invalid = |reason: &str| SoapCallError::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        if uri.scheme_str().is_some_and(|scheme| !scheme.eq_ignore_ascii_case("https")) {
            return Err(invalid("scheme must be https"));
        }
        let host = uri.host().ok_or_else(|| invalid("missing host"))?;
        let domain = host.trim_start_matches('[').trim_end_matches(']');
        let port = uri.port_u16().unwrap_or(443);
        let authority = uri.authority().map(|a| a.as_str()).unwrap_or(host);
        let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

        // 1. Establish the TCP connection
        let stream = TcpStream::connect((domain, port)).await?;
        stream.set_nodelay(true)?;

        // 2. Perform the TLS handshake
        let ssl = tls.configure(domain)?;
        let mut stream = SslStream::new(ssl, stream)?;
        Pin::new(&mut stream).connect().await?;
        trace!(%host, port, organization = ?tls.organization(), "tls established");

        // 3. Send the request
        let (mut sender, connection) =
            hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "outbound connection closed");
            }
        });

        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(HOST, authority)
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .header(ACCEPT_CHARSET, "UTF-8")
            .header(SOAP_ACTION, HeaderValue::from_static(""))
            .body(Full::new(Bytes::copy_from_slice(payload.as_bytes())))?;

        let response = sender.send_request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        connection.abort();

        debug!(%status, bytes = body.len(), "soap call completed");
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[async_trait]
impl SoapCaller for HttpsSoapCaller {
    async fn call(
        &self,
        uri: &str,
        tls: &TlsContext,
        payload: &str,
        timeout: Duration,
    ) -> Result<String, SoapCallError> {
        let parsed: Uri = uri
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| SoapCallError::InvalidUri {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;

        tokio::time::timeout(timeout, Self::exchange(parsed, tls, payload))
            .await
            .map_err(|_| SoapCallError::Timeout(timeout))?
    }
}
