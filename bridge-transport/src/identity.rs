//! Organization identity from X.509 subjects.

use std::sync::OnceLock;

use openssl::{ssl::SslRef, x509::X509NameRef};
use regex::Regex;

fn cn_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"CN=(.*?)(?:,|$)").ok()).as_ref()
}

/// Extracts the common name from a rendered subject such as
/// `CN=org-a, O=Example, C=NL`. The value runs up to the next comma or the
/// end of the string.
pub fn common_name(subject: &str) -> Option<String> {
    let captures = cn_pattern()?.captures(subject)?;
    let cn = captures.get(1)?.as_str().trim();

    (!cn.is_empty()).then(|| cn.to_string())
}

/// Renders an X.509 name most-specific first, e.g. `CN=org-a, O=Example, C=NL`.
pub fn subject_string(name: &X509NameRef) -> String {
    let mut parts: Vec<String> = name
        .entries()
        .filter_map(|entry| {
            let key = entry.object().nid().short_name().ok()?;
            let value = entry.data().as_utf8().ok()?;
            Some(format!("{key}={value}"))
        })
        .collect();
    parts.reverse();

    parts.join(", ")
}

/// The identity of a verified TLS peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// The rendered subject of the peer certificate.
    pub subject: String,
    /// The organization identity.
    pub common_name: String,
}

/// Returns the identity of the peer of an established TLS session, or `None`
/// if the peer presented no certificate, it failed verification, or its
/// subject carries no common name.
pub fn peer_identity(ssl: &SslRef) -> Option<PeerIdentity> {
    let cert = ssl.peer_certificate()?;
    if ssl.verify_result() != openssl::x509::X509VerifyResult::OK {
        return None;
    }

    let subject = subject_string(cert.subject_name());
    let common_name = common_name(&subject)?;

    Some(PeerIdentity { subject, common_name })
}
