//! admit ingestion gateway.
//!
//! Accepts event envelopes over HTTP and runs each one through:
//! - the [`schema::SchemaRegistry`], validating the payload against the
//!   registered event type
//! - the [`policy::PolicyDecisionEngine`], aggregating ingestion policies into
//!   one allow/deny verdict
//! - the [`publisher::PublisherClientCache`], publishing accepted events to the
//!   broker stream derived from the event type
//!
//! Event types and policies arrive from the definition source ([`sync`]);
//! broker coordinates and the API key reload at runtime ([`settings`]).

pub mod api;
pub mod config;
pub mod pipeline;
pub mod policy;
pub mod publisher;
pub mod schema;
pub mod settings;
pub mod state;
pub mod sync;

pub use pipeline::{Accepted, IngestError, IngestionPipeline};
pub use state::AppState;
