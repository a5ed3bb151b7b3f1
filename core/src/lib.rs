//! Ingestion and fan-out core for the river monitor.
//!
//! Ensembles arrive from a live serial session or a replayed capture file,
//! pass through the codec stream, and are fanned out by the distributor to
//! the rolling-window projections that back the query surface.

pub mod ensemble;
pub mod math;
pub mod pipeline;
pub mod prelude;
pub mod projection;
pub mod recording;
pub mod session;
pub mod settings;
pub mod telemetry;

pub use ensemble::{CodecStream, Ensemble, EnsembleCodec, FrameCodec};
pub use pipeline::{EnsembleDistributor, ReplaySource, ReplaySummary};
pub use prelude::{Projection, Queryable};
