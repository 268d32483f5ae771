//! Assembly of a running bridge.

use std::{sync::Arc, time::Duration};

use bridge_core::{
    ClientBridge, ConsumerDriver, ConsumerStats, CorrelationRegistry, DeadLetterLog, InMemoryBus,
    MessageHandler, PlatformBridge,
};
use bridge_transport::{tls, HttpsSoapCaller, SoapCaller, TlsContextResolver};
use bridge_wire::{signing, Signer};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::{BridgeConfig, ConfigError},
    endpoint::SoapEndpoint,
};

/// Interval of the sweep over abandoned pending calls.
const REAPER_INTERVAL: Duration = Duration::from_secs(1);

/// A bridge that could not be started.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The signing keys could not be loaded.
    #[error("failed to load signing keys: {0}")]
    Signing(#[from] signing::Error),
    /// The TLS material could not be loaded.
    #[error("failed to load tls material: {0}")]
    Tls(#[from] tls::Error),
}

/// Both bridge roles in one process, connected by an [`InMemoryBus`].
#[derive(Debug)]
pub struct Bridge {
    bus: Arc<InMemoryBus>,
    client: ClientBridge,
    requests: Arc<ConsumerStats>,
    replies: Arc<ConsumerStats>,
    dead_letters: Arc<ConsumerStats>,
    endpoint: SoapEndpoint,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Bridge {
    /// Loads keys and TLS material and starts both roles, calling out over
    /// HTTPS. Must be called from within a Tokio runtime.
    pub fn loopback(config: &BridgeConfig) -> Result<Self, BridgeError> {
        Self::with_caller(config, Arc::new(HttpsSoapCaller::new()))
    }

    /// Like [`Self::loopback`], making outbound calls through `caller`.
    pub fn with_caller(
        config: &BridgeConfig,
        caller: Arc<dyn SoapCaller>,
    ) -> Result<Self, BridgeError> {
        let signer = Arc::new(Signer::load(&config.signing_options()?)?);
        let tls = Arc::new(TlsContextResolver::load(&config.tls_options()?)?);

        let bus = Arc::new(InMemoryBus::new());
        let registry = Arc::new(CorrelationRegistry::new());
        let shutdown = CancellationToken::new();
        let mut tasks = vec![registry.spawn_reaper(REAPER_INTERVAL)];

        let client = ClientBridge::new(
            config.client_options(),
            Arc::clone(&signer),
            registry,
            bus.clone(),
        );
        let platform =
            PlatformBridge::new(config.platform_options(), signer, tls, caller, bus.clone());

        let consumer = |topic: &str, stats: &Arc<ConsumerStats>| {
            ConsumerDriver::new(topic, bus.clone(), config.consumer_options())
                .with_stats(Arc::clone(stats))
                .with_shutdown(shutdown.clone())
        };

        let requests = Arc::new(ConsumerStats::default());
        let replies = Arc::new(ConsumerStats::default());
        let dead_letters = Arc::new(ConsumerStats::default());

        let request_driver = consumer(&config.bus.requests_topic, &requests);
        let reply_driver = consumer(&config.bus.replies_topic, &replies);
        // Dead letters of both topics are logged and dropped.
        for topic in [request_driver.dead_letter_topic(), reply_driver.dead_letter_topic()] {
            let driver = consumer(&topic, &dead_letters);
            tasks.extend(spawn_consumer(&bus, driver, DeadLetterLog::new(topic)));
        }
        tasks.extend(spawn_consumer(&bus, request_driver, platform));
        tasks.extend(spawn_consumer(&bus, reply_driver, client.reply_handler()));

        let endpoint = SoapEndpoint::new(config.endpoint_options(), client.clone());
        info!(
            requests = %config.bus.requests_topic,
            replies = %config.bus.replies_topic,
            "bridge started"
        );

        Ok(Self { bus, client, requests, replies, dead_letters, endpoint, shutdown, tasks })
    }

    /// The endpoint to serve inbound calls with.
    pub fn endpoint(&self) -> SoapEndpoint {
        self.endpoint.clone()
    }

    /// The client side.
    pub fn client(&self) -> &ClientBridge {
        &self.client
    }

    /// The bus connecting both sides.
    pub fn bus(&self) -> &Arc<InMemoryBus> {
        &self.bus
    }

    /// Stats of the platform-side consumer.
    pub fn request_stats(&self) -> &Arc<ConsumerStats> {
        &self.requests
    }

    /// Stats of the client-side consumer.
    pub fn reply_stats(&self) -> &Arc<ConsumerStats> {
        &self.replies
    }

    /// Stats of the consumers that drop dead letters.
    pub fn dead_letter_stats(&self) -> &Arc<ConsumerStats> {
        &self.dead_letters
    }

    /// A token cancelled when the bridge shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops both consumers and waits for them.
    pub async fn shutdown(self) {
        self.shutdown.cancel();

        let Self { tasks, .. } = self;
        let mut tasks = tasks.into_iter();
        // The reaper runs until the registry is gone.
        if let Some(reaper) = tasks.next() {
            reaper.abort();
        }
        for task in tasks {
            let _ = task.await;
        }

        info!("bridge stopped");
    }
}

/// Runs `driver` over its topic on a new task, unless the topic is already
/// consumed.
fn spawn_consumer<H: MessageHandler>(
    bus: &Arc<InMemoryBus>,
    driver: ConsumerDriver,
    handler: H,
) -> Option<JoinHandle<()>> {
    let Some(stream) = bus.subscribe(driver.topic()) else {
        warn!(topic = driver.topic(), "topic already consumed");
        return None;
    };

    Some(tokio::spawn(async move { driver.run(stream, &handler).await }))
}
