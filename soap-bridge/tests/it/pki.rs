//! Key material for a complete bridge, written to a temporary directory.

use std::{
    fs,
    path::{Path, PathBuf},
};

use openssl::{pkey::PKey, rsa::Rsa};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa,
    KeyUsagePurpose, SanType,
};
use tempfile::TempDir;

pub struct Pki {
    dir: TempDir,
    ca: Certificate,
}

impl Pki {
    pub fn new() -> Self {
        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, "bridge test ca");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let ca = Certificate::from_params(params).unwrap();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ca.pem"), ca.serialize_pem().unwrap()).unwrap();

        Self { dir, ca }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn trust_pem(&self) -> PathBuf {
        self.path().join("ca.pem")
    }

    fn issue(&self, cn: &str, sans: Vec<SanType>) -> (String, String) {
        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, cn);
        params.distinguished_name.push(DnType::OrganizationName, "GXF");
        params.subject_alt_names = sans;

        let cert = Certificate::from_params(params).unwrap();
        (cert.serialize_pem_with_signer(&self.ca).unwrap(), cert.serialize_private_key_pem())
    }

    /// Issues a `localhost` server certificate named `name` and returns its
    /// path. The key sits next to it with a `.key` extension.
    pub fn server(&self, name: &str) -> PathBuf {
        let (cert, key) = self.issue(name, vec![SanType::DnsName("localhost".to_string())]);
        let path = self.path().join(format!("{name}.crt"));
        fs::write(&path, cert).unwrap();
        fs::write(path.with_extension("key"), key).unwrap();
        path
    }

    /// Issues a client certificate for `cn` into the PEM key store `store`
    /// and returns the store directory.
    pub fn client(&self, store: &str, cn: &str) -> PathBuf {
        let (cert, key) = self.issue(cn, vec![]);
        let keys = self.path().join(store);
        fs::create_dir_all(&keys).unwrap();
        fs::write(keys.join(format!("{cn}.crt")), cert).unwrap();
        fs::write(keys.join(format!("{cn}.key")), key).unwrap();
        keys
    }

    /// Writes a DER encoded RSA key pair for envelope signing and returns the
    /// private and public key paths.
    pub fn signing_keys(&self) -> (PathBuf, PathBuf) {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let private = self.path().join("sign-key.der");
        let public = self.path().join("verify-key.der");
        fs::write(&private, key.private_key_to_pkcs8().unwrap()).unwrap();
        fs::write(&public, key.public_key_to_der().unwrap()).unwrap();
        (private, public)
    }
}
