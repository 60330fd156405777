//! Broker publishing.
//!
//! ```text
//! envelope -> StreamBinding (stream, subject) -> PublisherClientCache
//!                                                  |  miss / stale generation
//!                                                  v
//!                                BrokerConnector::connect + stream provisioning
//! ```

mod broker;
mod cache;
mod http;
mod memory;

pub use broker::{
    BrokerClient, BrokerConnector, BrokerError, OutboundEvent, Retention, SendReceipt,
    StreamBinding, StreamConfig, StreamDefaults, DEFAULT_DUPLICATE_WINDOW, DEFAULT_MAX_AGE,
};
pub use cache::{
    PublisherClientCache, PublisherOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_SEND_TIMEOUT,
};
pub use http::{HttpBrokerConnector, MSG_ID_HEADER, SUBJECT_HEADER};
pub use memory::{InMemoryBroker, StoredMessage};
