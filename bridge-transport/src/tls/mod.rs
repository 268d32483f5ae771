//! Client TLS contexts, selected by organization.

use std::{fmt, io, path::PathBuf};

use openssl::{
    error::ErrorStack,
    ssl::{Ssl, SslConnector, SslMethod},
    x509::{store::X509StoreBuilder, X509},
};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, info};

pub mod config;
pub mod inbound;
mod store;

use config::{HostnameVerification, TlsOptions};
use store::Identity;

/// Errors loading or selecting TLS material.
#[derive(Debug, Error)]
pub enum Error {
    /// A store file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// OpenSSL library error.
    #[error("openssl error: {0}")]
    OpenSsl(#[from] ErrorStack),
    /// A PEM store entry lacks its certificate or key.
    #[error("store entry {0} lacks a certificate or private key")]
    IncompleteEntry(PathBuf),
    /// Per-organization selection is enabled without a key store.
    #[error("per-organization TLS requires a key store")]
    MissingKeyStore,
    /// No client identity is provisioned for the requested organization.
    #[error("unknown organization {0:?}")]
    UnknownOrganization(String),
}

/// An outbound TLS client context.
///
/// Built once at startup and read-only afterwards.
#[derive(Clone)]
pub struct TlsContext {
    connector: SslConnector,
    organization: Option<String>,
    hostname_verification: HostnameVerification,
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("organization", &self.organization)
            .field("hostname_verification", &self.hostname_verification)
            .field("connector", &"SslConnector")
            .finish()
    }
}

impl TlsContext {
    /// Wraps a ready connector.
    pub fn new(
        connector: SslConnector,
        organization: Option<String>,
        hostname_verification: HostnameVerification,
    ) -> Self {
        Self { connector, organization, hostname_verification }
    }

    fn build(
        trusted: &[X509],
        identity: Option<(&str, &Identity)>,
        hostname_verification: HostnameVerification,
    ) -> Result<Self, Error> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())?;

        if !trusted.is_empty() {
            let mut store = X509StoreBuilder::new()?;
            for cert in trusted {
                store.add_cert(cert.clone())?;
            }
            builder.set_cert_store(store.build());
        }

        if let Some((_, identity)) = identity {
            builder.set_certificate(&identity.cert)?;
            builder.set_private_key(&identity.key)?;
            for cert in &identity.chain {
                builder.add_extra_chain_cert(cert.clone())?;
            }
            builder.check_private_key()?;
        }

        Ok(Self {
            connector: builder.build(),
            organization: identity.map(|(alias, _)| alias.to_string()),
            hostname_verification,
        })
    }

    /// The organization whose client certificate this context presents, if any.
    pub fn organization(&self) -> Option<&str> {
        self.organization.as_deref()
    }

    /// How the endpoint host name is checked.
    pub fn hostname_verification(&self) -> HostnameVerification {
        self.hostname_verification
    }

    /// Creates the TLS session state for a connection to `domain`, applying the
    /// hostname verification strategy.
    pub fn configure(&self, domain: &str) -> Result<Ssl, ErrorStack> {
        let mut config = self.connector.configure()?;
        if self.hostname_verification == HostnameVerification::AcceptAll {
            config.set_verify_hostname(false);
        }

        config.into_ssl(domain)
    }
}

/// Selects the outbound TLS context for an organization.
#[derive(Debug, Clone)]
pub struct TlsContextResolver {
    default: TlsContext,
    organizations: FxHashMap<String, TlsContext>,
    per_organization: bool,
}

impl TlsContextResolver {
    /// Loads all TLS material and builds every context eagerly.
    pub fn load(options: &TlsOptions) -> Result<Self, Error> {
        let trusted = match options.trust_store {
            Some(ref trust_store) => store::load_trust_store(trust_store)?,
            None => Vec::new(),
        };

        let default = TlsContext::build(&trusted, None, options.hostname_verification)?;

        let mut organizations = FxHashMap::default();
        if options.per_organization {
            let key_store = options.key_store.as_ref().ok_or(Error::MissingKeyStore)?;
            for (alias, identity) in store::load_key_store(key_store)? {
                let context = TlsContext::build(
                    &trusted,
                    Some((&alias, &identity)),
                    options.hostname_verification,
                )?;
                debug!(organization = %alias, "built TLS context");
                organizations.insert(alias, context);
            }
        }

        info!(
            per_organization = options.per_organization,
            organizations = organizations.len(),
            hostname_verification = ?options.hostname_verification,
            "TLS context resolver ready"
        );

        Ok(Self { default, organizations, per_organization: options.per_organization })
    }

    /// A resolver that hands out `context` for every organization.
    pub fn with_default(context: TlsContext) -> Self {
        Self { default: context, organizations: FxHashMap::default(), per_organization: false }
    }

    /// Registers a per-organization context and enables per-organization selection.
    pub fn with_organization(
        mut self,
        organization: impl Into<String>,
        context: TlsContext,
    ) -> Self {
        self.organizations.insert(organization.into(), context);
        self.per_organization = true;
        self
    }

    /// Returns the context for `organization`.
    ///
    /// An empty organization, or per-organization selection being disabled,
    /// yields the default context without a client certificate. An organization
    /// with no provisioned identity is an [`Error::UnknownOrganization`].
    pub fn context_for(&self, organization: &str) -> Result<&TlsContext, Error> {
        if !self.per_organization || organization.is_empty() {
            return Ok(&self.default);
        }

        self.organizations
            .get(organization)
            .ok_or_else(|| Error::UnknownOrganization(organization.to_string()))
    }

    /// The context used for calls without an organization.
    pub fn default_context(&self) -> &TlsContext {
        &self.default
    }

    /// The organizations with a provisioned client identity.
    pub fn organizations(&self) -> impl Iterator<Item = &str> {
        self.organizations.keys().map(String::as_str)
    }
}
