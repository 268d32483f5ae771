//! The inbound HTTPS server.

use std::{convert::Infallible, io, net::SocketAddr, pin::Pin, sync::Arc};

use bridge_transport::identity::peer_identity;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    body::Incoming,
    header::{HeaderValue, CONTENT_TYPE},
    service::service_fn,
    Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use openssl::ssl::{Ssl, SslAcceptor};
use tokio::net::{TcpListener, TcpStream};
use tokio_openssl::SslStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::endpoint::{EndpointResponse, InboundCall, SoapEndpoint};

/// Serves a [`SoapEndpoint`] over mutually authenticated HTTPS.
pub struct SoapServer {
    listener: TcpListener,
    acceptor: Arc<SslAcceptor>,
    endpoint: Arc<SoapEndpoint>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for SoapServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoapServer")
            .field("listener", &self.listener)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl SoapServer {
    /// Binds `addr`. Connections are accepted once [`Self::run`] is called.
    pub async fn bind(
        addr: SocketAddr,
        acceptor: SslAcceptor,
        endpoint: SoapEndpoint,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self {
            listener,
            acceptor: Arc::new(acceptor),
            endpoint: Arc::new(endpoint),
            shutdown: CancellationToken::new(),
        })
    }

    /// Stops accepting, and closes open connections, when `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// The bound address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until shut down. Each connection is served on its
    /// own task.
    pub async fn run(self) -> io::Result<()> {
        info!(addr = ?self.listener.local_addr()?, "soap server listening");

        loop {
            let (io, peer) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let acceptor = Arc::clone(&self.acceptor);
            let endpoint = Arc::clone(&self.endpoint);
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = serve_connection(acceptor, endpoint, io, peer) => {}
                }
            });
        }

        info!("soap server stopped");
        Ok(())
    }
}

async fn serve_connection(
    acceptor: Arc<SslAcceptor>,
    endpoint: Arc<SoapEndpoint>,
    io: TcpStream,
    peer: SocketAddr,
) {
    // 1. Perform the TLS handshake
    let mut stream = match Ssl::new(acceptor.context()).and_then(|ssl| SslStream::new(ssl, io)) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(%peer, error = %e, "failed to set up tls session");
            return;
        }
    };
    if let Err(e) = Pin::new(&mut stream).accept().await {
        debug!(%peer, error = %e, "tls handshake failed");
        return;
    }

    // 2. Authenticate the peer
    let identity = peer_identity(stream.ssl()).map(|identity| identity.common_name);
    debug!(%peer, ?identity, "connection established");

    // 3. Serve requests
    let service = service_fn(move |request| {
        let endpoint = Arc::clone(&endpoint);
        let identity = identity.clone();
        async move { Ok::<_, Infallible>(respond(&endpoint, identity, request).await) }
    });

    if let Err(e) = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(%peer, error = %e, "connection closed with error");
    }
}

async fn respond(
    endpoint: &SoapEndpoint,
    identity: Option<String>,
    request: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let body = match request.into_body().collect().await {
        Ok(body) => String::from_utf8_lossy(&body.to_bytes()).into_owned(),
        Err(e) => {
            debug!(error = %e, "failed to read request body");
            return into_response(EndpointResponse {
                status: StatusCode::BAD_REQUEST,
                content_type: None,
                body: String::new(),
            });
        }
    };

    into_response(endpoint.handle(InboundCall { method, path, identity, body }).await)
}

fn into_response(response: EndpointResponse) -> Response<Full<Bytes>> {
    let mut http = Response::new(Full::new(Bytes::from(response.body)));
    *http.status_mut() = response.status;
    if let Some(content_type) = response.content_type {
        http.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    http
}
