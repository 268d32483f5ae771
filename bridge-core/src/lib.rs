//! Request/reply correlation over an asynchronous message bus, and the two
//! bridge roles built on it.
//!
//! The client side ([`ClientBridge`]) signs and publishes request envelopes
//! and suspends each caller in the [`CorrelationRegistry`] until the matching
//! reply arrives. The platform side ([`PlatformBridge`]) consumes those
//! envelopes, performs the real SOAP call and publishes a signed reply.
//! Both sides consume through a [`ConsumerDriver`].

pub mod client;
pub mod consumer;
pub mod memory;
pub mod platform;
pub mod ports;
pub mod registry;
pub mod retry;
pub mod timeouts;

pub use client::{ClientBridge, ClientOptions, ForwardError, ForwardRequest, ReplyHandler};
pub use consumer::{ConsumerDriver, ConsumerOptions, ConsumerStats, DeadLetterLog};
pub use memory::InMemoryBus;
pub use platform::{PlatformBridge, PlatformOptions, ProcessError};
pub use ports::{MessageHandler, Outcome, PublishError, Publisher};
pub use registry::{
    CompletionHandle, CorrelationError, CorrelationRegistry, RegistryError, RegistryStats,
};
pub use retry::{FixedBackoff, RetryPolicy};
pub use timeouts::TimeoutTable;
