//! Loading of key and trust stores from disk.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use openssl::{
    pkcs12::Pkcs12,
    pkey::{PKey, Private},
    x509::X509,
};
use tracing::{debug, warn};

use super::{
    config::{StoreKind, StoreOptions},
    Error,
};

/// A certificate with its private key and optional intermediate chain.
pub(crate) struct Identity {
    pub(crate) cert: X509,
    pub(crate) key: PKey<Private>,
    pub(crate) chain: Vec<X509>,
}

fn read(path: &Path) -> Result<Vec<u8>, Error> {
    fs::read(path).map_err(|source| Error::Io { path: path.to_path_buf(), source })
}

/// Loads every certificate of a trust store file.
pub(crate) fn load_trust_store(options: &StoreOptions) -> Result<Vec<X509>, Error> {
    let bytes = read(&options.location)?;

    let certs = match options.kind {
        StoreKind::Pkcs12 => {
            let parsed = Pkcs12::from_der(&bytes)?.parse2(&options.password)?;
            parsed.cert.into_iter().chain(parsed.ca.into_iter().flatten()).collect()
        }
        StoreKind::Pem => X509::stack_from_pem(&bytes)?,
    };

    debug!(location = %options.location.display(), certs = certs.len(), "loaded trust store");
    Ok(certs)
}

/// Loads a single identity. For PKCS#12 `path` is the archive; for PEM it is
/// the certificate file and the key is read from the sibling `.key` file.
pub(crate) fn load_identity(
    path: &Path,
    kind: StoreKind,
    password: &str,
) -> Result<Identity, Error> {
    let incomplete = || Error::IncompleteEntry(path.to_path_buf());

    match kind {
        StoreKind::Pkcs12 => {
            let parsed = Pkcs12::from_der(&read(path)?)?.parse2(password)?;
            Ok(Identity {
                cert: parsed.cert.ok_or_else(incomplete)?,
                key: parsed.pkey.ok_or_else(incomplete)?,
                chain: parsed.ca.into_iter().flatten().collect(),
            })
        }
        StoreKind::Pem => {
            let mut certs = X509::stack_from_pem(&read(path)?)?.into_iter();
            let cert = certs.next().ok_or_else(incomplete)?;
            let key = PKey::private_key_from_pem(&read(&path.with_extension("key"))?)?;

            Ok(Identity { cert, key, chain: certs.collect() })
        }
    }
}

fn alias_of(path: &Path, kind: StoreKind) -> Option<String> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let accepted = match kind {
        StoreKind::Pkcs12 => matches!(extension.as_str(), "pfx" | "p12"),
        StoreKind::Pem => matches!(extension.as_str(), "crt" | "pem"),
    };

    accepted.then(|| path.file_stem()?.to_str().map(str::to_string)).flatten()
}

/// Loads a key store directory into identities keyed by alias, the file stem
/// of each entry.
pub(crate) fn load_key_store(options: &StoreOptions) -> Result<BTreeMap<String, Identity>, Error> {
    let entries = fs::read_dir(&options.location)
        .map_err(|source| Error::Io { path: options.location.clone(), source })?;

    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    paths.sort();

    let mut identities = BTreeMap::new();
    for path in paths {
        let Some(alias) = alias_of(&path, options.kind) else {
            continue;
        };

        let identity = load_identity(&path, options.kind, &options.password)?;
        if identities.insert(alias.clone(), identity).is_some() {
            warn!(%alias, path = %path.display(), "duplicate key store alias, last entry wins");
        }
    }

    debug!(location = %options.location.display(), entries = identities.len(), "loaded key store");
    Ok(identities)
}
