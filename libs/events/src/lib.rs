//! # admit-events
//!
//! Wire types shared by the admit ingestion gateway.
//!
//! ## Event Envelope
//!
//! Producers submit one envelope per event:
//! - `metadata`: who sent it (`source`), what it is (`type`, `subType`, `version`),
//!   and optional `eventTime` / `eventUUID`
//! - `payload`: opaque JSON, validated against the registered schema for the
//!   event type and never interpreted otherwise
//!
//! Parsing is staged so every failure maps to exactly one stable reason
//! (`request-body`, `metadata-missing`, `payload-missing`, `metadata`).
//!
//! ## Definitions
//!
//! Event-type definitions and ingestion policies arrive from the definition
//! source as typed resources. Shape mismatches fail locally on the item that
//! carries them.

mod definitions;
mod envelope;
mod error;
mod metadata;

pub use definitions::*;
pub use envelope::*;
pub use error::{EventError, ValidationCause};
pub use metadata::MetadataValidator;
