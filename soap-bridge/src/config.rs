//! TOML configuration of a bridge process.
//!
//! ```toml
//! [soap]
//! timeout_secs = 45
//! call_endpoint = "https://platform:443"
//!
//! [soap.custom_timeouts]
//! SetScheduleRequest = 180
//!
//! [security]
//! per_organization = true
//!
//! [security.key_store]
//! location = "/etc/bridge/keystores"
//! password = "secret"
//! type = "PKCS12"
//!
//! [security.signing]
//! sign_key_file = "/etc/bridge/sign-key.der"
//! verify_key_file = "/etc/bridge/verify-key.der"
//! signature = "SHA256withRSA"
//!
//! [bus]
//! redelivery_attempts = 2
//! backoff_millis = 3000
//! ```

use std::{
    collections::BTreeMap,
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use bridge_core::{ClientOptions, ConsumerOptions, PlatformOptions, RetryPolicy, TimeoutTable};
use bridge_transport::{
    tls::inbound::InboundOptions, HostnameVerification, StoreKind, StoreOptions, TlsOptions,
};
use bridge_wire::{
    signing::{KeyType, SignatureAlgorithm},
    SigningOptions,
};
use serde::Deserialize;
use thiserror::Error;

use crate::endpoint::EndpointOptions;

/// A configuration that cannot be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range or not recognized.
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    /// A section the requested role needs is absent.
    #[error("missing {0}")]
    Missing(&'static str),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl ToString) -> Self {
        Self::Invalid { field, reason: reason.to_string() }
    }
}

/// Root of the configuration file. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// SOAP endpoints and deadlines.
    pub soap: SoapConfig,
    /// Key material.
    pub security: SecurityConfig,
    /// Topics and redelivery.
    pub bus: BusConfig,
}

/// The `[soap]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SoapConfig {
    /// Default caller deadline.
    pub timeout_secs: u64,
    /// Deadline overrides keyed by context or payload marker.
    pub custom_timeouts: BTreeMap<String, u64>,
    /// `accept-all` or `standard`.
    pub hostname_verification: String,
    /// Base URI of the real SOAP endpoint.
    pub call_endpoint: String,
    /// Bound on one outbound call.
    pub call_timeout_secs: u64,
    /// Path prefix of proxied calls.
    pub proxy_path: String,
    /// Path of the unauthenticated health check.
    pub health_path: String,
    /// Address of the inbound HTTPS server.
    pub listen: SocketAddr,
}

impl Default for SoapConfig {
    fn default() -> Self {
        let endpoint = EndpointOptions::default();
        let platform = PlatformOptions::default();

        Self {
            timeout_secs: bridge_core::timeouts::DEFAULT_TIMEOUT.as_secs(),
            custom_timeouts: BTreeMap::new(),
            hostname_verification: "standard".to_string(),
            call_endpoint: platform.call_endpoint,
            call_timeout_secs: platform.call_timeout.as_secs(),
            proxy_path: endpoint.proxy_path,
            health_path: endpoint.health_path,
            listen: SocketAddr::from(([0, 0, 0, 0], 8443)),
        }
    }
}

/// A key or trust store.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// File or directory of the store.
    pub location: PathBuf,
    /// Store password, empty when unprotected.
    #[serde(default)]
    pub password: String,
    /// `PKCS12` or `PEM`.
    #[serde(rename = "type", default = "default_store_type")]
    pub kind: String,
}

fn default_store_type() -> String {
    "PKCS12".to_string()
}

impl StoreConfig {
    fn options(&self, field: &'static str) -> Result<StoreOptions, ConfigError> {
        let kind: StoreKind = self.kind.parse().map_err(|e| ConfigError::invalid(field, e))?;
        Ok(StoreOptions::new(&self.location, kind).with_password(&self.password))
    }
}

/// The `[security]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    /// Client identities for outbound calls, one per organization.
    pub key_store: Option<StoreConfig>,
    /// Trust anchors for outbound endpoints and inbound clients.
    pub trust_store: Option<StoreConfig>,
    /// Certificate and key of the inbound HTTPS server.
    pub server_identity: Option<StoreConfig>,
    /// Select the outbound client identity by organization.
    pub per_organization: bool,
    /// Envelope signing keys.
    pub signing: SigningConfig,
}

/// The `[security.signing]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SigningConfig {
    /// `RSA` or `EC`.
    pub key_type: String,
    /// Private key, PKCS#8 DER or PEM.
    pub sign_key_file: PathBuf,
    /// Public key or certificate.
    pub verify_key_file: PathBuf,
    /// Provider name, logged only.
    pub provider: String,
    /// For example `SHA256withRSA`.
    pub signature: String,
}

impl Default for SigningConfig {
    fn default() -> Self {
        let defaults = SigningOptions::default();

        Self {
            key_type: defaults.key_type.to_string(),
            sign_key_file: defaults.sign_key_file,
            verify_key_file: defaults.verify_key_file,
            provider: defaults.provider,
            signature: defaults.signature.to_string(),
        }
    }
}

/// The `[bus]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    /// Topic of request envelopes.
    pub requests_topic: String,
    /// Topic of reply envelopes.
    pub replies_topic: String,
    /// Suffix of the dead-letter topics.
    pub dead_letter_suffix: String,
    /// Messages handled at the same time per topic.
    pub concurrency: usize,
    /// Total delivery attempts of a message, the first included.
    pub redelivery_attempts: usize,
    /// Delay before each redelivery.
    pub backoff_millis: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        let client = ClientOptions::default();
        let platform = PlatformOptions::default();
        let consumer = ConsumerOptions::default();

        Self {
            requests_topic: client.requests_topic,
            replies_topic: platform.replies_topic,
            dead_letter_suffix: consumer.dead_letter_suffix,
            concurrency: consumer.concurrency,
            redelivery_attempts: consumer.retry.attempts,
            backoff_millis: consumer.retry.backoff.as_millis() as u64,
        }
    }
}

impl BridgeConfig {
    /// Reads and parses the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;

        text.parse()
    }

    /// Caller deadlines, the default plus every custom timeout.
    pub fn timeouts(&self) -> TimeoutTable {
        self.soap.custom_timeouts.iter().fold(
            TimeoutTable::new(Duration::from_secs(self.soap.timeout_secs)),
            |table, (key, secs)| table.with_override(key.as_str(), Duration::from_secs(*secs)),
        )
    }

    /// Options of the envelope [`Signer`](bridge_wire::Signer).
    pub fn signing_options(&self) -> Result<SigningOptions, ConfigError> {
        let signing = &self.security.signing;

        let key_type: KeyType = signing
            .key_type
            .parse()
            .map_err(|e| ConfigError::invalid("security.signing.key_type", e))?;
        let signature: SignatureAlgorithm = signing
            .signature
            .parse()
            .map_err(|e| ConfigError::invalid("security.signing.signature", e))?;

        Ok(SigningOptions::default()
            .with_key_type(key_type)
            .with_sign_key_file(&signing.sign_key_file)
            .with_verify_key_file(&signing.verify_key_file)
            .with_provider(signing.provider.as_str())
            .with_signature(signature))
    }

    /// Outbound TLS options of the platform side.
    pub fn tls_options(&self) -> Result<TlsOptions, ConfigError> {
        let security = &self.security;
        let verification: HostnameVerification = self
            .soap
            .hostname_verification
            .parse()
            .map_err(|e| ConfigError::invalid("soap.hostname_verification", e))?;

        let mut options = TlsOptions::default()
            .per_organization(security.per_organization)
            .with_hostname_verification(verification);
        if let Some(ref store) = security.key_store {
            options = options.with_key_store(store.options("security.key_store.type")?);
        }
        if let Some(ref store) = security.trust_store {
            options = options.with_trust_store(store.options("security.trust_store.type")?);
        }

        Ok(options)
    }

    /// Inbound TLS options of the client side. Client certificates are
    /// verified against the trust store.
    pub fn inbound_options(&self) -> Result<InboundOptions, ConfigError> {
        let security = &self.security;
        let identity = security
            .server_identity
            .as_ref()
            .ok_or(ConfigError::Missing("security.server_identity"))?;
        let identity = identity.options("security.server_identity.type")?;

        let mut options = InboundOptions::new(identity.location, identity.kind)
            .with_password(identity.password);
        if let Some(ref store) = security.trust_store {
            options = options.with_trust_store(store.options("security.trust_store.type")?);
        }

        Ok(options)
    }

    /// Redelivery of transient failures.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_attempts(self.bus.redelivery_attempts)
            .with_backoff(Duration::from_millis(self.bus.backoff_millis))
    }

    /// Options shared by every topic consumer.
    pub fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions::default()
            .with_concurrency(self.bus.concurrency)
            .with_retry(self.retry_policy())
            .with_dead_letter_suffix(self.bus.dead_letter_suffix.as_str())
    }

    /// Options of the client side.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions::default()
            .with_requests_topic(self.bus.requests_topic.as_str())
            .with_timeouts(self.timeouts())
    }

    /// Options of the platform side.
    pub fn platform_options(&self) -> PlatformOptions {
        PlatformOptions::default()
            .with_call_endpoint(self.soap.call_endpoint.as_str())
            .with_replies_topic(self.bus.replies_topic.as_str())
            .with_call_timeout(Duration::from_secs(self.soap.call_timeout_secs))
    }

    /// Routing of inbound calls.
    pub fn endpoint_options(&self) -> EndpointOptions {
        EndpointOptions::default()
            .with_proxy_path(self.soap.proxy_path.as_str())
            .with_health_path(self.soap.health_path.as_str())
    }
}

impl std::str::FromStr for BridgeConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}
