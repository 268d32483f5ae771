//! Options for loading TLS material.

use std::{fmt, path::PathBuf, str::FromStr};

/// Encoding of a key or trust store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreKind {
    /// PKCS#12 archives (`.pfx` / `.p12`), opened with the store password.
    #[default]
    Pkcs12,
    /// PEM certificates (`.crt`) with PEM private keys (`.key`).
    Pem,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PKCS12" | "PFX" | "P12" => Ok(Self::Pkcs12),
            "PEM" => Ok(Self::Pem),
            other => Err(format!("unknown store type {other:?}")),
        }
    }
}

/// Location and secret of a key or trust store.
#[derive(Clone, Default)]
pub struct StoreOptions {
    /// For key stores, a directory with one entry per organization alias.
    /// For trust stores and single identities, a file.
    pub location: PathBuf,
    /// Empty for unprotected stores.
    pub password: String,
    /// Encoding of the store.
    pub kind: StoreKind,
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("location", &self.location)
            .field("password", &"<redacted>")
            .field("kind", &self.kind)
            .finish()
    }
}

impl StoreOptions {
    /// Creates options for an unprotected store.
    pub fn new(location: impl Into<PathBuf>, kind: StoreKind) -> Self {
        Self { location: location.into(), password: String::new(), kind }
    }

    /// Sets the store password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }
}

/// How the host name of an outbound SOAP endpoint is checked against its
/// certificate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HostnameVerification {
    /// Skip the host name check. The chain is still verified.
    AcceptAll,
    /// Standard host name matching against the certificate's SANs.
    #[default]
    Standard,
}

impl FromStr for HostnameVerification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "accept-all" | "allow-all-hostnames" => Ok(Self::AcceptAll),
            "standard" | "browser-compatible-hostnames" => Ok(Self::Standard),
            other => Err(format!("unknown hostname verification {other:?}")),
        }
    }
}

/// Outbound TLS configuration.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Client identities, one per organization alias.
    pub key_store: Option<StoreOptions>,
    /// Certificates trusted for outbound endpoints. When absent the system
    /// default trust roots are used.
    pub trust_store: Option<StoreOptions>,
    /// Select the client identity by organization. When disabled every call
    /// uses the default context without a client certificate.
    pub per_organization: bool,
    /// How endpoint host names are checked.
    pub hostname_verification: HostnameVerification,
}

impl TlsOptions {
    /// Sets the store of client identities.
    pub fn with_key_store(mut self, store: StoreOptions) -> Self {
        self.key_store = Some(store);
        self
    }

    /// Sets the trusted certificates.
    pub fn with_trust_store(mut self, store: StoreOptions) -> Self {
        self.trust_store = Some(store);
        self
    }

    /// Enables selection of the client identity by organization.
    pub fn per_organization(mut self, enabled: bool) -> Self {
        self.per_organization = enabled;
        self
    }

    /// Sets how endpoint host names are checked.
    pub fn with_hostname_verification(mut self, verification: HostnameVerification) -> Self {
        self.hostname_verification = verification;
        self
    }
}
