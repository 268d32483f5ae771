//! Test certificate authority, written to a temporary directory.

use std::{fs, path::PathBuf};

use openssl::{pkcs12::Pkcs12, pkey::PKey, x509::X509};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa,
    KeyUsagePurpose, SanType,
};
use tempfile::TempDir;

pub struct Pki {
    pub dir: TempDir,
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

    /// The CA certificate as a PEM trust store.
    pub fn trust_pem(&self) -> PathBuf {
        self.dir.path().join("ca.pem")
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

    /// Issues a PEM certificate valid for `localhost` only and returns the
    /// certificate path. The key sits next to it with a `.key` extension.
    pub fn server(&self) -> PathBuf {
        let (cert, key) = self.issue("server", vec![SanType::DnsName("localhost".to_string())]);
        let path = self.dir.path().join("server.crt");
        fs::write(&path, cert).unwrap();
        fs::write(path.with_extension("key"), key).unwrap();
        path
    }

    /// Issues a client certificate for `cn` into the PEM key store directory.
    pub fn client_pem(&self, cn: &str) -> PathBuf {
        let (cert, key) = self.issue(cn, vec![]);
        let keys = self.dir.path().join("keys-pem");
        fs::create_dir_all(&keys).unwrap();
        fs::write(keys.join(format!("{cn}.crt")), cert).unwrap();
        fs::write(keys.join(format!("{cn}.key")), key).unwrap();
        keys
    }

    /// Issues a client certificate for `cn` into the PKCS#12 key store directory.
    pub fn client_pkcs12(&self, cn: &str, password: &str) -> PathBuf {
        let (cert, key) = self.issue(cn, vec![]);
        let cert = X509::from_pem(cert.as_bytes()).unwrap();
        let key = PKey::private_key_from_pem(key.as_bytes()).unwrap();
        let archive = Pkcs12::builder().name(cn).pkey(&key).cert(&cert).build2(password).unwrap();

        let keys = self.dir.path().join("keys-p12");
        fs::create_dir_all(&keys).unwrap();
        fs::write(keys.join(format!("{cn}.pfx")), archive.to_der().unwrap()).unwrap();
        keys
    }
}
