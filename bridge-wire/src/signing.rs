//! Detached signatures over envelope content.
//!
//! Keys are loaded once at startup. A [`Signer`] that fails to load is a fatal
//! startup condition; a signature that fails to verify is just `false`.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use openssl::{
    error::ErrorStack,
    hash::MessageDigest,
    pkey::{Id, PKey, Private, Public},
    x509::X509,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::Envelope;

/// Errors loading keys or signing.
#[derive(Debug, Error)]
pub enum Error {
    /// A key file could not be read.
    #[error("failed to read key file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A key file holds no usable key.
    #[error("failed to decode key: {0}")]
    KeyDecode(#[source] ErrorStack),
    /// The keys or the algorithm belong to another key family.
    #[error("key type mismatch: expected {expected}, found {found}")]
    KeyTypeMismatch { expected: KeyType, found: String },
    /// The key family is neither RSA nor EC.
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),
    /// The signature algorithm is not supported.
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// OpenSSL failed to sign.
    #[error("signing failed: {0}")]
    Sign(#[source] ErrorStack),
}

/// The asymmetric key family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// RSA keys.
    Rsa,
    /// Elliptic curve keys.
    Ec,
}

impl KeyType {
    fn id(self) -> Id {
        match self {
            Self::Rsa => Id::RSA,
            Self::Ec => Id::EC,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa => f.write_str("RSA"),
            Self::Ec => f.write_str("EC"),
        }
    }
}

impl FromStr for KeyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RSA" => Ok(Self::Rsa),
            "EC" | "ECDSA" => Ok(Self::Ec),
            _ => Err(Error::UnsupportedKeyType(s.to_string())),
        }
    }
}

/// The message digest of a [`SignatureAlgorithm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Digest {
    /// SHA-1, for RSA only.
    Sha1,
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

impl Digest {
    fn message_digest(self) -> MessageDigest {
        match self {
            Self::Sha1 => MessageDigest::sha1(),
            Self::Sha256 => MessageDigest::sha256(),
            Self::Sha384 => MessageDigest::sha384(),
            Self::Sha512 => MessageDigest::sha512(),
        }
    }
}

/// A signature algorithm in `<DIGEST>with<KEY>` notation, e.g. `SHA256withRSA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureAlgorithm {
    /// Digest applied to the content.
    pub digest: Digest,
    /// Key family of the signing keys.
    pub key_type: KeyType,
}

impl Default for SignatureAlgorithm {
    fn default() -> Self {
        Self { digest: Digest::Sha256, key_type: KeyType::Rsa }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digest = match self.digest {
            Digest::Sha1 => "SHA1",
            Digest::Sha256 => "SHA256",
            Digest::Sha384 => "SHA384",
            Digest::Sha512 => "SHA512",
        };
        let key = match self.key_type {
            KeyType::Rsa => "RSA",
            KeyType::Ec => "ECDSA",
        };

        write!(f, "{digest}with{key}")
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = || Error::UnsupportedAlgorithm(s.to_string());

        let upper = s.to_ascii_uppercase();
        let (digest, key) = upper.split_once("WITH").ok_or_else(unsupported)?;

        let key_type = match key {
            "RSA" => KeyType::Rsa,
            "ECDSA" => KeyType::Ec,
            _ => return Err(unsupported()),
        };

        let digest = match (digest, key_type) {
            ("SHA1", KeyType::Rsa) => Digest::Sha1,
            ("SHA256", _) => Digest::Sha256,
            ("SHA384", _) => Digest::Sha384,
            ("SHA512", _) => Digest::Sha512,
            _ => return Err(unsupported()),
        };

        Ok(Self { digest, key_type })
    }
}

/// Where and how to load the signing material.
#[derive(Debug, Clone)]
pub struct SigningOptions {
    /// Expected key family of both keys.
    pub key_type: KeyType,
    /// Private key, PKCS#8 (DER or PEM).
    pub sign_key_file: PathBuf,
    /// Public key, X.509 SubjectPublicKeyInfo (DER or PEM) or a PEM certificate.
    pub verify_key_file: PathBuf,
    /// Name of the cryptographic provider. Only the default provider exists,
    /// the value is kept for logging.
    pub provider: String,
    /// Algorithm of produced and verified signatures.
    pub signature: SignatureAlgorithm,
}

impl Default for SigningOptions {
    fn default() -> Self {
        Self {
            key_type: KeyType::Rsa,
            sign_key_file: PathBuf::from("sign-key.der"),
            verify_key_file: PathBuf::from("verify-key.der"),
            provider: "default".to_string(),
            signature: SignatureAlgorithm::default(),
        }
    }
}

impl SigningOptions {
    /// Sets the expected key family.
    pub fn with_key_type(mut self, key_type: KeyType) -> Self {
        self.key_type = key_type;
        self
    }

    /// Sets the private key file.
    pub fn with_sign_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.sign_key_file = path.into();
        self
    }

    /// Sets the public key file.
    pub fn with_verify_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.verify_key_file = path.into();
        self
    }

    /// Sets the provider name.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Sets the signature algorithm.
    pub fn with_signature(mut self, signature: SignatureAlgorithm) -> Self {
        self.signature = signature;
        self
    }
}

/// Signs with the local private key and verifies with the peer's public key.
///
/// Immutable after construction and cheap to share behind an `Arc`.
pub struct Signer {
    private: PKey<Private>,
    public: PKey<Public>,
    algorithm: SignatureAlgorithm,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("algorithm", &self.algorithm.to_string())
            .field("bits", &self.private.bits())
            .finish_non_exhaustive()
    }
}

impl Signer {
    /// Loads both keys from disk.
    pub fn load(options: &SigningOptions) -> Result<Self, Error> {
        let private = read_key_file(&options.sign_key_file).and_then(|bytes| private_key(&bytes))?;
        let public = read_key_file(&options.verify_key_file).and_then(|bytes| public_key(&bytes))?;

        info!(
            provider = %options.provider,
            algorithm = %options.signature,
            sign_key = %options.sign_key_file.display(),
            verify_key = %options.verify_key_file.display(),
            "loaded signing keys"
        );

        Self::with_expected_type(private, public, options.signature, options.key_type)
    }

    /// Builds a signer from already loaded keys.
    pub fn from_keys(
        private: PKey<Private>,
        public: PKey<Public>,
        algorithm: SignatureAlgorithm,
    ) -> Result<Self, Error> {
        Self::with_expected_type(private, public, algorithm, algorithm.key_type)
    }

    fn with_expected_type(
        private: PKey<Private>,
        public: PKey<Public>,
        algorithm: SignatureAlgorithm,
        expected: KeyType,
    ) -> Result<Self, Error> {
        if algorithm.key_type != expected {
            return Err(Error::KeyTypeMismatch { expected, found: algorithm.to_string() });
        }

        for id in [private.id(), public.id()] {
            if id != expected.id() {
                return Err(Error::KeyTypeMismatch { expected, found: format!("{id:?}") });
            }
        }

        Ok(Self { private, public, algorithm })
    }

    /// The algorithm this signer uses.
    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Signs `content`, returning the signature as lowercase hex.
    pub fn sign(&self, content: &str) -> Result<String, Error> {
        let mut signer =
            openssl::sign::Signer::new(self.algorithm.digest.message_digest(), &self.private)
                .map_err(Error::Sign)?;
        signer.update(content.as_bytes()).map_err(Error::Sign)?;
        let signature = signer.sign_to_vec().map_err(Error::Sign)?;

        Ok(hex::encode(signature))
    }

    /// Checks `token` against `content`. Any failure, including a token that
    /// is not lowercase hex, yields `false`.
    pub fn verify(&self, content: &str, token: &str) -> bool {
        // Only the exact encoding produced by `sign` is accepted, so no two
        // tokens verify for the same signature.
        if !is_lowercase_hex(token) {
            debug!("signature token is not lowercase hex");
            return false;
        }
        let Ok(signature) = hex::decode(token) else {
            debug!("signature token is not valid hex");
            return false;
        };

        let verify = || -> Result<bool, ErrorStack> {
            let mut verifier = openssl::sign::Verifier::new(
                self.algorithm.digest.message_digest(),
                &self.public,
            )?;
            verifier.update(content.as_bytes())?;
            verifier.verify(&signature)
        };

        verify().unwrap_or_else(|e| {
            debug!(error = %e, "signature verification errored");
            false
        })
    }

    /// Signs the unsigned content of `envelope` and stores the signature in it.
    pub fn sign_envelope<E: Envelope>(&self, envelope: &mut E) -> Result<(), Error> {
        let signature = self.sign(&envelope.unsigned_string())?;
        envelope.set_signature(signature);
        Ok(())
    }

    /// Verifies the signature carried by `envelope`.
    pub fn verify_envelope<E: Envelope>(&self, envelope: &E) -> bool {
        self.verify(&envelope.unsigned_string(), envelope.signature())
    }
}

fn is_lowercase_hex(token: &str) -> bool {
    token.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn read_key_file(path: &Path) -> Result<Vec<u8>, Error> {
    fs::read(path).map_err(|source| Error::KeyFile { path: path.to_path_buf(), source })
}

fn is_pem(bytes: &[u8]) -> bool {
    bytes.trim_ascii_start().starts_with(b"-----BEGIN")
}

fn private_key(bytes: &[u8]) -> Result<PKey<Private>, Error> {
    let key = if is_pem(bytes) {
        PKey::private_key_from_pem(bytes)
    } else {
        PKey::private_key_from_pkcs8(bytes)
    };

    key.map_err(Error::KeyDecode)
}

fn public_key(bytes: &[u8]) -> Result<PKey<Public>, Error> {
    if !is_pem(bytes) {
        return PKey::public_key_from_der(bytes).map_err(Error::KeyDecode);
    }

    let key = if String::from_utf8_lossy(bytes).contains("BEGIN CERTIFICATE") {
        X509::from_pem(bytes).and_then(|cert| cert.public_key())
    } else {
        PKey::public_key_from_pem(bytes)
    };

    key.map_err(Error::KeyDecode)
}
