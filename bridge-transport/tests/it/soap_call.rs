use std::{convert::Infallible, net::SocketAddr, pin::Pin, sync::Arc, time::Duration};

use bridge_transport::{
    identity::peer_identity,
    tls::inbound::{acceptor, InboundOptions},
    HostnameVerification, HttpsSoapCaller, SoapCallError, SoapCaller, StoreKind, StoreOptions,
    TlsContextResolver, TlsOptions,
};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    body::Incoming, header::CONTENT_TYPE, service::service_fn, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use openssl::ssl::{Ssl, SslAcceptor};
use tokio::net::TcpListener;
use tokio_openssl::SslStream;

use crate::pki::Pki;

/// Echoes the caller identity, path, SOAP-ACTION presence, content type and
/// body. `/Fault` answers 500, `/Slow` stalls.
async fn respond(
    caller: String,
    request: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = request.uri().path().to_string();
    let soap_action = request.headers().contains_key("soap-action");
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = request.into_body().collect().await.map(|b| b.to_bytes()).unwrap_or_default();

    if path == "/Slow" {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    let status = if path == "/Fault" { StatusCode::INTERNAL_SERVER_ERROR } else { StatusCode::OK };
    let text = format!(
        "{caller}|{path}|{soap_action}|{content_type}|{}",
        String::from_utf8_lossy(&body)
    );

    Ok(Response::builder().status(status).body(Full::new(Bytes::from(text))).unwrap())
}

async fn serve(acceptor: SslAcceptor) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = Arc::new(acceptor);

    tokio::spawn(async move {
        while let Ok((io, _)) = listener.accept().await {
            let acceptor = Arc::clone(&acceptor);
            tokio::spawn(async move {
                let ssl = Ssl::new(acceptor.context()).unwrap();
                let mut stream = SslStream::new(ssl, io).unwrap();
                if Pin::new(&mut stream).accept().await.is_err() {
                    return;
                }

                let caller = peer_identity(stream.ssl())
                    .map(|identity| identity.common_name)
                    .unwrap_or_else(|| "anonymous".to_string());
                let service = service_fn(move |request| respond(caller.clone(), request));

                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

async fn server(pki: &Pki) -> SocketAddr {
    let options = InboundOptions::new(pki.server(), StoreKind::Pem)
        .with_trust_store(StoreOptions::new(pki.trust_pem(), StoreKind::Pem));

    serve(acceptor(&options).unwrap()).await
}

fn trusting(pki: &Pki) -> TlsOptions {
    TlsOptions::default().with_trust_store(StoreOptions::new(pki.trust_pem(), StoreKind::Pem))
}

#[tokio::test]
async fn presents_organization_certificate() {
    let _ = tracing_subscriber::fmt::try_init();

    let pki = Pki::new();
    let addr = server(&pki).await;
    let keys = pki.client_pem("org-a");

    let options = trusting(&pki)
        .with_key_store(StoreOptions::new(keys, StoreKind::Pem))
        .per_organization(true);
    let resolver = TlsContextResolver::load(&options).unwrap();
    assert_eq!(resolver.organizations().collect::<Vec<_>>(), ["org-a"]);

    let uri = format!("https://localhost:{}/GetStatus", addr.port());
    let caller = HttpsSoapCaller::new();

    let response = caller
        .call(&uri, resolver.context_for("org-a").unwrap(), "<ping/>", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(response, "org-a|/GetStatus|true|text/xml;charset=UTF-8|<ping/>");

    // No organization: the default context presents no client certificate.
    let response = caller
        .call(&uri, resolver.context_for("").unwrap(), "<ping/>", Duration::from_secs(5))
        .await
        .unwrap();
    assert!(response.starts_with("anonymous|"), "{response}");

    assert!(matches!(
        resolver.context_for("org-z"),
        Err(bridge_transport::tls::Error::UnknownOrganization(_))
    ));
}

#[tokio::test]
async fn pkcs12_key_store() {
    let pki = Pki::new();
    let addr = server(&pki).await;
    let keys = pki.client_pkcs12("org-b", "changeit");

    let store = StoreOptions::new(keys, StoreKind::Pkcs12).with_password("changeit");
    let options = trusting(&pki).with_key_store(store).per_organization(true);
    let resolver = TlsContextResolver::load(&options).unwrap();

    let response = HttpsSoapCaller::new()
        .call(
            &format!("https://localhost:{}/Ping", addr.port()),
            resolver.context_for("org-b").unwrap(),
            "",
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert!(response.starts_with("org-b|/Ping|"), "{response}");
}

#[tokio::test]
async fn fault_body_is_returned() {
    let pki = Pki::new();
    let addr = server(&pki).await;
    let resolver = TlsContextResolver::load(&trusting(&pki)).unwrap();

    let response = HttpsSoapCaller::new()
        .call(
            &format!("https://localhost:{}/Fault", addr.port()),
            resolver.default_context(),
            "<bad/>",
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert!(response.ends_with("|<bad/>"), "{response}");
}

#[tokio::test]
async fn hostname_verification() {
    let pki = Pki::new();
    let addr = server(&pki).await;
    // The server certificate names `localhost` only.
    let uri = format!("https://127.0.0.1:{}/Ping", addr.port());
    let caller = HttpsSoapCaller::new();

    let standard = TlsContextResolver::load(&trusting(&pki)).unwrap();
    let err = caller
        .call(&uri, standard.default_context(), "", Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, SoapCallError::Tls(_)), "{err}");
    assert!(!err.is_transient());

    let accept_all = TlsContextResolver::load(
        &trusting(&pki).with_hostname_verification(HostnameVerification::AcceptAll),
    )
    .unwrap();
    caller.call(&uri, accept_all.default_context(), "", Duration::from_secs(5)).await.unwrap();

    // Accepting any host name still verifies the chain.
    let untrusting = TlsContextResolver::load(
        &TlsOptions::default().with_hostname_verification(HostnameVerification::AcceptAll),
    )
    .unwrap();
    let err = caller
        .call(&uri, untrusting.default_context(), "", Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, SoapCallError::Tls(_)), "{err}");
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let pki = Pki::new();
    let addr = server(&pki).await;
    let resolver = TlsContextResolver::load(&trusting(&pki)).unwrap();

    let err = HttpsSoapCaller::new()
        .call(
            &format!("https://localhost:{}/Slow", addr.port()),
            resolver.default_context(),
            "",
            Duration::from_millis(300),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SoapCallError::Timeout(_)));
    assert!(err.is_transient());
}
