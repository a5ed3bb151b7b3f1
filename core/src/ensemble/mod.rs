pub mod codec;
pub mod model;
pub mod stream;

#[cfg(test)]
pub(crate) mod fixtures;

pub use codec::{EnsembleCodec, FrameCodec, FrameHeader, DELIMITER};
pub use model::{
    is_bad_value, AncillaryData, BeamMatrix, BottomTrack, EarthVelocity, Ensemble, EnsembleData,
    GgaFix, NmeaData, BAD_VELOCITY,
};
pub use stream::{CodecStream, EnsembleSubscriber};
