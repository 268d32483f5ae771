//! Server-side TLS for inbound SOAP calls.

use std::path::PathBuf;

use openssl::{
    ssl::{SslAcceptor, SslMethod, SslVerifyMode},
    x509::store::X509StoreBuilder,
};
use tracing::info;

use super::{
    config::{StoreKind, StoreOptions},
    store, Error,
};

/// Inbound TLS configuration.
#[derive(Debug, Clone)]
pub struct InboundOptions {
    /// The server certificate and key, a PKCS#12 archive or a PEM certificate
    /// with a sibling `.key` file.
    pub identity: PathBuf,
    /// Encoding of the server identity.
    pub identity_kind: StoreKind,
    /// Password of a PKCS#12 identity.
    pub identity_password: String,
    /// Trust anchors for client certificates.
    pub trust_store: Option<StoreOptions>,
}

impl InboundOptions {
    /// Creates options for the server identity at `identity`.
    pub fn new(identity: impl Into<PathBuf>, kind: StoreKind) -> Self {
        Self {
            identity: identity.into(),
            identity_kind: kind,
            identity_password: String::new(),
            trust_store: None,
        }
    }

    /// Sets the password of the server identity.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.identity_password = password.into();
        self
    }

    /// Sets the trust anchors for client certificates.
    pub fn with_trust_store(mut self, store: StoreOptions) -> Self {
        self.trust_store = Some(store);
        self
    }
}

/// Builds the acceptor for inbound connections.
///
/// Client certificates are requested, and verified against the trust store
/// when presented, but not required: health checks are served without one.
/// Authorization of every other path happens per request.
pub fn acceptor(options: &InboundOptions) -> Result<SslAcceptor, Error> {
    let identity =
        store::load_identity(&options.identity, options.identity_kind, &options.identity_password)?;

    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server())?;
    builder.set_certificate(&identity.cert)?;
    builder.set_private_key(&identity.key)?;
    for cert in &identity.chain {
        builder.add_extra_chain_cert(cert.clone())?;
    }
    builder.check_private_key()?;

    if let Some(ref trust_store) = options.trust_store {
        let trusted = store::load_trust_store(trust_store)?;

        let mut store = X509StoreBuilder::new()?;
        for cert in &trusted {
            store.add_cert(cert.clone())?;
            builder.add_client_ca(cert)?;
        }
        builder.set_cert_store(store.build());
        builder.set_verify(SslVerifyMode::PEER);

        info!(trusted = trusted.len(), "inbound TLS requests client certificates");
    } else {
        builder.set_verify(SslVerifyMode::NONE);
    }

    Ok(builder.build())
}
