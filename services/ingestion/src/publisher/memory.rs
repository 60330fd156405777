//! In-process broker for testing and development.
//!
//! Behaves like a stream broker closely enough to exercise provisioning and
//! dedupe: sends fail unless a stream routes the subject, and a repeated
//! event id within a stream is acknowledged as a duplicate.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::broker::{
    BrokerClient, BrokerConnector, BrokerError, OutboundEvent, SendReceipt, StreamBinding,
    StreamConfig,
};
use crate::settings::BrokerSettings;

/// A message accepted by the in-memory broker.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub stream: String,
    pub subject: String,
    pub event: OutboundEvent,
}

#[derive(Default)]
struct BrokerState {
    streams: Mutex<BTreeMap<String, StreamConfig>>,
    messages: Mutex<Vec<StoredMessage>>,
    seen: Mutex<HashSet<(String, String)>>,
    connected_to: Mutex<Vec<String>>,
    connects: AtomicUsize,
    stream_updates: AtomicUsize,
    fail_connects: AtomicBool,
    fail_sends: AtomicBool,
    connect_delay_ms: AtomicU64,
}

/// In-memory broker. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

fn subject_matches(pattern: &str, subject: &str) -> bool {
    match pattern.strip_suffix(".*") {
        Some(prefix) => subject
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|token| !token.is_empty() && !token.contains('.')),
        None => pattern == subject,
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every connect fail.
    pub fn fail_connects(&self, fail: bool) {
        self.state.fail_connects.store(fail, Ordering::SeqCst);
    }

    /// Make every send fail.
    pub fn fail_sends(&self, fail: bool) {
        self.state.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Delay every connect by `delay`.
    pub fn stall_connects(&self, delay: Duration) {
        self.state
            .connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn stream_update_count(&self) -> usize {
        self.state.stream_updates.load(Ordering::SeqCst)
    }

    /// Broker base URLs clients connected to, in order.
    pub async fn connected_to(&self) -> Vec<String> {
        self.state.connected_to.lock().await.clone()
    }

    pub async fn messages(&self) -> Vec<StoredMessage> {
        self.state.messages.lock().await.clone()
    }

    pub async fn stream(&self, name: &str) -> Option<StreamConfig> {
        self.state.streams.lock().await.get(name).cloned()
    }

    /// Register a stream directly.
    pub async fn insert_stream(&self, config: StreamConfig) {
        self.state
            .streams
            .lock()
            .await
            .insert(config.name.clone(), config);
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect(
        &self,
        settings: &BrokerSettings,
        binding: &StreamBinding,
    ) -> Result<Arc<dyn BrokerClient>, BrokerError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        let delay = self.state.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.state.fail_connects.load(Ordering::SeqCst) {
            return Err(BrokerError::Connect(
                "in-memory broker configured to fail".to_string(),
            ));
        }

        let url = settings.base_url();
        info!(
            broker = %url,
            stream = %binding.stream,
            subject = %binding.subject,
            "[MEMORY] client connected"
        );
        self.state.connected_to.lock().await.push(url);

        Ok(Arc::new(InMemoryClient {
            state: self.state.clone(),
            binding: binding.clone(),
        }))
    }
}

struct InMemoryClient {
    state: Arc<BrokerState>,
    binding: StreamBinding,
}

#[async_trait]
impl BrokerClient for InMemoryClient {
    async fn stream_info(&self) -> Result<Option<StreamConfig>, BrokerError> {
        Ok(self
            .state
            .streams
            .lock()
            .await
            .get(&self.binding.stream)
            .cloned())
    }

    async fn update_stream(&self, config: &StreamConfig) -> Result<(), BrokerError> {
        self.state.stream_updates.fetch_add(1, Ordering::SeqCst);
        self.state
            .streams
            .lock()
            .await
            .insert(config.name.clone(), config.clone());
        debug!(stream = %config.name, subjects = ?config.subjects, "[MEMORY] stream updated");
        Ok(())
    }

    async fn send(&self, event: &OutboundEvent) -> Result<SendReceipt, BrokerError> {
        if self.state.fail_sends.load(Ordering::SeqCst) {
            return Err(BrokerError::Send(
                "in-memory broker configured to fail".to_string(),
            ));
        }

        let routed = self
            .state
            .streams
            .lock()
            .await
            .get(&self.binding.stream)
            .is_some_and(|s| s.subjects.iter().any(|p| subject_matches(p, &self.binding.subject)));
        if !routed {
            return Err(BrokerError::Stream {
                stream: self.binding.stream.clone(),
                message: format!("no stream routes subject {}", self.binding.subject),
            });
        }

        let fresh = self
            .state
            .seen
            .lock()
            .await
            .insert((self.binding.stream.clone(), event.id.clone()));
        if !fresh {
            return Ok(SendReceipt {
                acknowledged: true,
                duplicate: true,
            });
        }

        self.state.messages.lock().await.push(StoredMessage {
            stream: self.binding.stream.clone(),
            subject: self.binding.subject.clone(),
            event: event.clone(),
        });

        Ok(SendReceipt {
            acknowledged: true,
            duplicate: false,
        })
    }
}
