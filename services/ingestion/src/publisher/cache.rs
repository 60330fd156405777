//! Publisher client cache.
//!
//! One broker client per subject, built lazily on first publish and valid only
//! for the configuration generation it was built under. A configuration change
//! bumps the generation and drops every cached client; in-flight publishes on
//! old clients finish on their own.
//!
//! The cache lock covers lookup and insert only. Connecting, provisioning and
//! sending run outside it under timeouts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use admit_events::EventEnvelope;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::broker::{
    BrokerClient, BrokerConnector, BrokerError, OutboundEvent, StreamBinding, StreamDefaults,
};
use crate::settings::{BrokerSettings, LiveSettings};

/// Default bound on connect plus stream provisioning.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default bound on a single send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct PublisherOptions {
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub stream_defaults: StreamDefaults,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            stream_defaults: StreamDefaults::default(),
        }
    }
}

struct CachedClient {
    client: Arc<dyn BrokerClient>,
    generation: u64,
}

struct CacheState {
    generation: u64,
    settings: Arc<BrokerSettings>,
    clients: HashMap<String, CachedClient>,
}

pub struct PublisherClientCache {
    connector: Arc<dyn BrokerConnector>,
    options: PublisherOptions,
    state: Mutex<CacheState>,
}

impl PublisherClientCache {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        settings: BrokerSettings,
        options: PublisherOptions,
    ) -> Self {
        Self {
            connector,
            options,
            state: Mutex::new(CacheState {
                generation: 0,
                settings: Arc::new(settings),
                clients: HashMap::new(),
            }),
        }
    }

    /// Publish an accepted envelope. Failures are logged, never raised.
    pub async fn publish(&self, envelope: &EventEnvelope) -> bool {
        let binding = StreamBinding::for_envelope(envelope);
        let event = OutboundEvent::from_envelope(envelope);
        self.publish_event(&binding, &event).await
    }

    pub async fn publish_event(&self, binding: &StreamBinding, event: &OutboundEvent) -> bool {
        let client = match self.client_for(binding).await {
            Ok(client) => client,
            Err(e) => {
                error!(
                    stream = %binding.stream,
                    subject = %binding.subject,
                    event_id = %event.id,
                    acknowledged = false,
                    error = %e,
                    "unable to create publisher client"
                );
                return false;
            }
        };

        let sent = timeout(self.options.send_timeout, client.send(event))
            .await
            .unwrap_or(Err(BrokerError::Timeout {
                operation: "send",
                elapsed: self.options.send_timeout,
            }));

        match sent {
            Ok(receipt) if receipt.acknowledged => {
                debug!(
                    stream = %binding.stream,
                    subject = %binding.subject,
                    event_id = %event.id,
                    acknowledged = true,
                    duplicate = receipt.duplicate,
                    "sent event"
                );
                true
            }
            Ok(_) => {
                error!(
                    stream = %binding.stream,
                    subject = %binding.subject,
                    event_id = %event.id,
                    acknowledged = false,
                    "broker did not acknowledge event"
                );
                false
            }
            Err(e) => {
                error!(
                    stream = %binding.stream,
                    subject = %binding.subject,
                    event_id = %event.id,
                    acknowledged = false,
                    error = %e,
                    "unable to publish event"
                );
                false
            }
        }
    }

    /// Swap in new broker settings and discard every cached client.
    pub async fn on_configuration_changed(&self, settings: BrokerSettings) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.settings = Arc::new(settings);
        let dropped = std::mem::take(&mut state.clients).len();

        info!(
            generation = state.generation,
            broker = %state.settings.base_url(),
            dropped_clients = dropped,
            "broker configuration changed"
        );
    }

    /// Apply broker changes from a settings subscription until it closes.
    pub async fn follow(self: Arc<Self>, mut changes: watch::Receiver<Arc<LiveSettings>>) {
        while changes.changed().await.is_ok() {
            let broker = changes.borrow_and_update().broker.clone();
            if *self.current_settings().await == broker {
                continue;
            }
            self.on_configuration_changed(broker).await;
        }
    }

    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    pub async fn current_settings(&self) -> Arc<BrokerSettings> {
        self.state.lock().await.settings.clone()
    }

    /// Subjects with a client cached for the current generation, sorted.
    pub async fn cached_subjects(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut subjects: Vec<String> = state
            .clients
            .iter()
            .filter(|(_, cached)| cached.generation == state.generation)
            .map(|(subject, _)| subject.clone())
            .collect();
        subjects.sort();
        subjects
    }

    async fn client_for(&self, binding: &StreamBinding) -> Result<Arc<dyn BrokerClient>, BrokerError> {
        let (generation, settings) = {
            let state = self.state.lock().await;
            if let Some(cached) = state.clients.get(&binding.subject) {
                if cached.generation == state.generation {
                    return Ok(cached.client.clone());
                }
            }
            (state.generation, state.settings.clone())
        };

        let client = timeout(self.options.connect_timeout, self.provision(&settings, binding))
            .await
            .map_err(|_| BrokerError::Timeout {
                operation: "connect",
                elapsed: self.options.connect_timeout,
            })??;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(
                subject = %binding.subject,
                built_under = generation,
                current = state.generation,
                "configuration changed while connecting; using client once"
            );
            return Ok(client);
        }

        if let Some(existing) = state
            .clients
            .get(&binding.subject)
            .filter(|cached| cached.generation == generation)
        {
            return Ok(existing.client.clone());
        }

        state.clients.insert(
            binding.subject.clone(),
            CachedClient {
                client: client.clone(),
                generation,
            },
        );
        Ok(client)
    }

    async fn provision(
        &self,
        settings: &BrokerSettings,
        binding: &StreamBinding,
    ) -> Result<Arc<dyn BrokerClient>, BrokerError> {
        let client = self.connector.connect(settings, binding).await?;

        let current = client.stream_info().await?;
        if let Some(update) = self
            .options
            .stream_defaults
            .reconcile(binding, current.as_ref())
        {
            client.update_stream(&update).await?;
            info!(
                stream = %update.name,
                subjects = ?update.subjects,
                created = current.is_none(),
                "stream configured for subject"
            );
        }

        Ok(client)
    }
}
