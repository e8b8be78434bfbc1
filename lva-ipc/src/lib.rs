//! Shared envelope framing, entity model, and socket constants for the three
//! processes that make up the linux-voice-assistant satellite (core, vision
//! daemon, front-panel daemon). See `Envelope` for the wire shape and
//! `framing` for the newline-delimited-JSON transport over UNIX sockets.

pub mod entity;
pub mod envelope;
pub mod error;
pub mod framing;
pub mod metrics;
pub mod sockets;

pub use entity::{Entity, EntityValue, SensorValue};
pub use envelope::{message_type, Envelope, Source};
pub use error::{IpcError, Result};
pub use framing::{split, EnvelopeReader, EnvelopeWriter};
pub use metrics::{Metrics, MetricsSnapshot};
