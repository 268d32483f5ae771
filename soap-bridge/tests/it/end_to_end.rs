use std::{
    convert::Infallible, net::SocketAddr, path::Path, pin::Pin, sync::Arc, time::Duration,
};

use bridge_transport::{
    identity::peer_identity,
    tls::inbound::{acceptor, InboundOptions},
    StoreKind, StoreOptions, TlsContext, TlsContextResolver, TlsOptions,
};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    body::Incoming,
    header::{CONTENT_TYPE, HOST},
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use openssl::ssl::{Ssl, SslAcceptor};
use soap_bridge::{Bridge, BridgeConfig, Publisher, SoapServer};
use tokio::net::{TcpListener, TcpStream};
use tokio_openssl::SslStream;

use crate::pki::Pki;

/// Serves `acceptor` on an ephemeral port, answering every request with
/// `make_response(caller, path, body)`.
async fn serve<F>(acceptor: SslAcceptor, make_response: F) -> SocketAddr
where
    F: Fn(String, String, String) -> (StatusCode, String) + Clone + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = Arc::new(acceptor);

    tokio::spawn(async move {
        while let Ok((io, _)) = listener.accept().await {
            let acceptor = Arc::clone(&acceptor);
            let make_response = make_response.clone();
            tokio::spawn(async move {
                let ssl = Ssl::new(acceptor.context()).unwrap();
                let mut stream = SslStream::new(ssl, io).unwrap();
                if Pin::new(&mut stream).accept().await.is_err() {
                    return;
                }

                let caller = peer_identity(stream.ssl())
                    .map(|identity| identity.common_name)
                    .unwrap_or_else(|| "anonymous".to_string());
                let service = service_fn(move |request: Request<Incoming>| {
                    let caller = caller.clone();
                    let make_response = make_response.clone();
                    async move {
                        let path = request.uri().path().to_string();
                        let body = request.into_body().collect().await.unwrap().to_bytes();
                        let (status, text) =
                            make_response(caller, path, String::from_utf8_lossy(&body).into());
                        let response =
                            Response::builder().status(status).body(Full::new(Bytes::from(text)));
                        Ok::<_, Infallible>(response.unwrap())
                    }
                });

                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

/// A platform that accepts connections and never answers.
async fn silent_platform() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((io, _)) = listener.accept().await {
            held.push(io);
        }
    });

    addr
}

/// The platform's SOAP endpoint: echoes the calling organization, path and body.
async fn platform(pki: &Pki) -> SocketAddr {
    let options = InboundOptions::new(pki.server("platform"), StoreKind::Pem)
        .with_trust_store(StoreOptions::new(pki.trust_pem(), StoreKind::Pem));

    serve(acceptor(&options).unwrap(), |caller, path, body| {
        (StatusCode::OK, format!("<echo org=\"{caller}\" path=\"{path}\">{body}</echo>"))
    })
    .await
}

fn store(path: &Path, kind: &str) -> String {
    format!("{{ location = {:?}, type = {kind:?} }}", path.display().to_string())
}

fn config(pki: &Pki, platform: SocketAddr, timeout_secs: u64) -> BridgeConfig {
    let (sign_key, verify_key) = pki.signing_keys();
    let key_store = pki.client("bridge-keys", "org-a");

    format!(
        r#"
        [soap]
        timeout_secs = {timeout_secs}
        call_endpoint = "https://localhost:{port}"
        call_timeout_secs = 5
        listen = "127.0.0.1:0"

        [security]
        per_organization = true
        key_store = {key_store}
        trust_store = {trust_store}
        server_identity = {server_identity}

        [security.signing]
        sign_key_file = {sign_key:?}
        verify_key_file = {verify_key:?}

        [bus]
        backoff_millis = 100
        "#,
        port = platform.port(),
        key_store = store(&key_store, "PEM"),
        trust_store = store(&pki.trust_pem(), "PEM"),
        server_identity = store(&pki.server("bridge"), "PEM"),
        sign_key = sign_key.display().to_string(),
        verify_key = verify_key.display().to_string(),
    )
    .parse()
    .unwrap()
}

/// A running bridge and the address of its inbound server.
async fn bridge(config: &BridgeConfig) -> (Bridge, SocketAddr) {
    let _ = tracing_subscriber::fmt::try_init();

    let acceptor = acceptor(&config.inbound_options().unwrap()).unwrap();
    let bridge = Bridge::loopback(config).unwrap();
    let server = SoapServer::bind(config.soap.listen, acceptor, bridge.endpoint())
        .await
        .unwrap()
        .with_shutdown(bridge.shutdown_token());
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    (bridge, addr)
}

/// TLS contexts of inbound callers: one per certificate in `store`, plus an
/// anonymous default.
fn callers(pki: &Pki, store: &Path) -> TlsContextResolver {
    let options = TlsOptions::default()
        .per_organization(true)
        .with_key_store(StoreOptions::new(store, StoreKind::Pem))
        .with_trust_store(StoreOptions::new(pki.trust_pem(), StoreKind::Pem));

    TlsContextResolver::load(&options).unwrap()
}

async fn eventually(check: impl Fn() -> bool) {
    let poll = async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), poll).await.unwrap();
}

struct Answer {
    status: StatusCode,
    content_type: Option<String>,
    body: String,
}

async fn connect(addr: SocketAddr, tls: &TlsContext) -> SslStream<TcpStream> {
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut stream = SslStream::new(tls.configure("localhost").unwrap(), stream).unwrap();
    Pin::new(&mut stream).connect().await.unwrap();
    stream
}

fn request(method: Method, path: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(method)
        .uri(path)
        .header(HOST, "localhost")
        .header(CONTENT_TYPE, "text/xml;charset=UTF-8")
        .body(Full::new(Bytes::from_static(b"<ping/>")))
        .unwrap()
}

async fn send(addr: SocketAddr, tls: &TlsContext, method: Method, path: &str) -> Answer {
    let stream = connect(addr, tls).await;
    let (mut sender, connection) =
        hyper::client::conn::http1::handshake(TokioIo::new(stream)).await.unwrap();
    tokio::spawn(connection);

    let request = request(method, path);
    let response = sender.send_request(request).await.unwrap();
    let status = response.status();
    let content_type =
        response.headers().get(CONTENT_TYPE).map(|v| v.to_str().unwrap().to_string());
    let body = response.into_body().collect().await.unwrap().to_bytes();

    Answer { status, content_type, body: String::from_utf8_lossy(&body).into_owned() }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn call_travels_through_both_roles() {
    let pki = Pki::new();
    let platform = platform(&pki).await;
    let config = config(&pki, platform, 10);
    let (bridge, addr) = bridge(&config).await;
    let callers = callers(&pki, &pki.client("callers", "org-a"));

    let answer =
        send(addr, callers.context_for("org-a").unwrap(), Method::POST, "/proxy-server/GetStatus")
            .await;

    assert_eq!(answer.status, StatusCode::OK);
    assert_eq!(answer.content_type.as_deref(), Some("text/xml; charset=UTF-8"));
    // The platform saw the bridge's certificate for the calling organization.
    assert_eq!(answer.body, "<echo org=\"org-a\" path=\"/GetStatus\"><ping/></echo>");
    eventually(|| bridge.request_stats().processed() == 1).await;
    eventually(|| bridge.reply_stats().processed() == 1).await;

    bridge.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejects_unauthenticated_and_unrouted_calls() {
    let pki = Pki::new();
    let platform = platform(&pki).await;
    let config = config(&pki, platform, 10);
    let (bridge, addr) = bridge(&config).await;
    let callers = callers(&pki, &pki.client("callers", "org-a"));
    let anonymous = callers.default_context();
    let org_a = callers.context_for("org-a").unwrap();

    let answer = send(addr, anonymous, Method::POST, "/proxy-server/GetStatus").await;
    assert_eq!(answer.status, StatusCode::UNAUTHORIZED);

    let answer = send(addr, anonymous, Method::GET, "/actuator/health").await;
    assert_eq!(answer.status, StatusCode::OK);

    let answer = send(addr, org_a, Method::POST, "/elsewhere/GetStatus").await;
    assert_eq!(answer.status, StatusCode::NOT_FOUND);

    assert_eq!(bridge.bus().published("requests"), 0);
    bridge.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn organization_without_identity_times_out() {
    let pki = Pki::new();
    let platform = platform(&pki).await;
    let config = config(&pki, platform, 1);
    let (bridge, addr) = bridge(&config).await;
    // Trusted by the bridge, but the bridge holds no client identity for it.
    let callers = callers(&pki, &pki.client("callers", "org-b"));

    let answer =
        send(addr, callers.context_for("org-b").unwrap(), Method::POST, "/proxy-server/GetStatus")
            .await;

    assert_eq!(answer.status, StatusCode::GATEWAY_TIMEOUT);
    eventually(|| bridge.request_stats().dead_lettered() == 1).await;
    assert_eq!(bridge.request_stats().retried(), 0);
    eventually(|| bridge.dead_letter_stats().processed() == 1).await;
    assert_eq!(bridge.bus().backlog("requests.DLT"), 0);

    bridge.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dead_letters_do_not_accumulate() {
    let pki = Pki::new();
    let platform = platform(&pki).await;
    let config = config(&pki, platform, 10);
    let (bridge, _) = bridge(&config).await;

    for i in 0..200 {
        // Well formed, with a signature that does not verify.
        let forged = format!("c{i}~L1Bpbmc=~PHBpbmcvPg==~00ff");
        bridge.bus().publish("requests", forged).await.unwrap();
        bridge.bus().publish("replies", format!("garbage {i}")).await.unwrap();
    }

    eventually(|| bridge.dead_letter_stats().processed() == 400).await;
    assert_eq!(bridge.request_stats().dead_lettered(), 200);
    assert_eq!(bridge.reply_stats().dead_lettered(), 200);
    assert_eq!(bridge.bus().backlog("requests.DLT"), 0);
    assert_eq!(bridge.bus().backlog("replies.DLT"), 0);
    assert_eq!(bridge.request_stats().dead_letter_failed(), 0);

    bridge.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_connection_cancels_pending_call() {
    let pki = Pki::new();
    let platform = silent_platform().await;
    let config = config(&pki, platform, 30);
    let (bridge, addr) = bridge(&config).await;
    let callers = callers(&pki, &pki.client("callers", "org-a"));
    let tls = callers.context_for("org-a").unwrap().clone();

    // The caller owns its whole connection, so aborting it closes the socket.
    let caller = tokio::spawn(async move {
        let stream = connect(addr, &tls).await;
        let (mut sender, connection) =
            hyper::client::conn::http1::handshake(TokioIo::new(stream)).await.unwrap();
        let call = sender.send_request(request(Method::POST, "/proxy-server/GetStatus"));
        let _ = tokio::join!(connection, call);
    });

    let registry = bridge.client().registry();
    eventually(|| registry.pending() == 1).await;
    caller.abort();

    eventually(|| registry.pending() == 0).await;
    assert_eq!(registry.stats().cancelled(), 1);
    assert_eq!(registry.stats().completed(), 0);
    assert_eq!(registry.stats().timed_out(), 0);

    bridge.shutdown().await;
}
