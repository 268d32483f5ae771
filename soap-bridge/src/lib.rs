//! Bridges mutually authenticated SOAP calls over an asynchronous message bus.
//!
//! The client side accepts SOAP calls over HTTPS, publishes them as signed
//! request envelopes and answers each caller with the correlated reply. The
//! platform side consumes the requests, makes the real SOAP call with the TLS
//! identity of the calling organization and publishes the signed reply.
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod config;
pub mod endpoint;
pub mod server;
pub mod wiring;

pub use bridge_core::*;
pub use bridge_transport::{
    common_name, HostnameVerification, HttpsSoapCaller, SoapCallError, SoapCaller, StoreKind,
    StoreOptions, TlsContext, TlsContextResolver, TlsOptions,
};
pub use bridge_wire::{
    ConnectionId, Envelope, ReplyEnvelope, RequestEnvelope, Signer, SigningOptions,
};

pub use config::{BridgeConfig, ConfigError};
pub use endpoint::{EndpointOptions, EndpointResponse, InboundCall, SoapEndpoint};
pub use server::SoapServer;
pub use wiring::{Bridge, BridgeError};
