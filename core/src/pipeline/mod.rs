pub mod distributor;
pub mod replay;

pub use distributor::{EnsembleDistributor, DEFAULT_QUEUE_CAPACITY};
pub use replay::{ReplaySource, ReplaySummary, REPLAY_BLOCK_SIZE};
