//! Transport layer of the SOAP bridge: TLS key and trust material, the
//! per-organization outbound TLS context resolver, the inbound TLS acceptor
//! and the outbound SOAP call.

pub mod identity;
pub mod soap;
pub mod tls;

pub use identity::common_name;
pub use soap::{HttpsSoapCaller, SoapCallError, SoapCaller};
pub use tls::{
    config::{HostnameVerification, StoreKind, StoreOptions, TlsOptions},
    TlsContext, TlsContextResolver,
};
