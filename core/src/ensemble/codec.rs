use log::debug;

use crate::ensemble::model::Ensemble;
use crate::prelude::{CodecError, CodecResult};

/// Sixteen 0x80 bytes precede every frame in a capture or live stream.
pub const DELIMITER: [u8; 16] = [0x80; 16];

/// Delimiter plus four u32 header words.
pub const HEADER_LEN: usize = DELIMITER.len() + 16;

/// CRC-32 trailer.
pub const CHECKSUM_LEN: usize = 4;

/// Upper bound on a single payload; larger lengths are treated as corruption.
pub const MAX_PAYLOAD_LEN: usize = 4 * 1024 * 1024;

/// Turns delimiter-prefixed frames into ensembles.
pub trait EnsembleCodec: Send + Sync {
    /// Bytes needed before [`EnsembleCodec::frame_len`] can be answered.
    fn header_len(&self) -> usize;

    /// Total frame length announced by `header`, `None` if the header is corrupt.
    fn frame_len(&self, header: &[u8]) -> Option<usize>;

    /// Structural and checksum check. Bytes past the end of the frame are ignored.
    fn verify(&self, frame: &[u8]) -> bool;

    fn decode(&self, frame: &[u8]) -> Option<Ensemble>;
}

/// Parsed fixed-size header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub ensemble_number: u32,
    pub payload_len: usize,
}

impl FrameHeader {
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.payload_len + CHECKSUM_LEN
    }
}

/// Reference framing: delimiter, ensemble number and payload length each
/// followed by their bitwise inverse, JSON payload, CRC-32 of the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(word)
}

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn encode(&self, ensemble: &Ensemble) -> CodecResult<Vec<u8>> {
        let payload = serde_json::to_vec(ensemble)?;
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(CodecError::PayloadTooLarge(payload.len()));
        }
        let number = ensemble.number().unwrap_or(0);
        let len = payload.len() as u32;

        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
        frame.extend_from_slice(&DELIMITER);
        frame.extend_from_slice(&number.to_le_bytes());
        frame.extend_from_slice(&(!number).to_le_bytes());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&(!len).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        Ok(frame)
    }

    pub fn parse_header(&self, buf: &[u8]) -> CodecResult<FrameHeader> {
        if buf.len() < HEADER_LEN {
            return Err(CodecError::TooShort {
                have: buf.len(),
                need: HEADER_LEN,
            });
        }
        if buf[..DELIMITER.len()] != DELIMITER {
            return Err(CodecError::MissingDelimiter);
        }

        let mut i = DELIMITER.len();
        let number = read_u32(buf, i);
        let inv_number = read_u32(buf, i + 4);
        let len = read_u32(buf, i + 8);
        let inv_len = read_u32(buf, i + 12);
        i += 16;
        debug_assert_eq!(i, HEADER_LEN);

        if number != !inv_number {
            return Err(CodecError::HeaderMismatch("ensemble number"));
        }
        if len != !inv_len {
            return Err(CodecError::HeaderMismatch("payload length"));
        }
        let payload_len = len as usize;
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(CodecError::PayloadTooLarge(payload_len));
        }

        Ok(FrameHeader {
            ensemble_number: number,
            payload_len,
        })
    }

    /// Validates `frame` and returns its header and payload slice.
    pub fn check<'a>(&self, frame: &'a [u8]) -> CodecResult<(FrameHeader, &'a [u8])> {
        let header = self.parse_header(frame)?;
        let need = header.frame_len();
        if frame.len() < need {
            return Err(CodecError::TooShort {
                have: frame.len(),
                need,
            });
        }

        let payload = &frame[HEADER_LEN..HEADER_LEN + header.payload_len];
        let expected = read_u32(frame, HEADER_LEN + header.payload_len);
        let actual = crc32fast::hash(payload);
        if expected != actual {
            return Err(CodecError::ChecksumMismatch { expected, actual });
        }
        Ok((header, payload))
    }
}

impl EnsembleCodec for FrameCodec {
    fn header_len(&self) -> usize {
        HEADER_LEN
    }

    fn frame_len(&self, header: &[u8]) -> Option<usize> {
        self.parse_header(header).ok().map(|h| h.frame_len())
    }

    fn verify(&self, frame: &[u8]) -> bool {
        match self.check(frame) {
            Ok(_) => true,
            Err(err) => {
                debug!("frame rejected: {}", err);
                false
            }
        }
    }

    fn decode(&self, frame: &[u8]) -> Option<Ensemble> {
        let (header, payload) = self.check(frame).ok()?;
        match serde_json::from_slice::<Ensemble>(payload) {
            Ok(ensemble) => Some(ensemble),
            Err(err) => {
                debug!(
                    "ensemble {} payload did not decode: {}",
                    header.ensemble_number, err
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::fixtures::sample_ensemble;

    #[test]
    fn encoded_frame_verifies_and_decodes() {
        let codec = FrameCodec::new();
        let ensemble = sample_ensemble(7, 5);
        let frame = codec.encode(&ensemble).unwrap();

        assert!(frame.starts_with(&DELIMITER));
        assert!(codec.verify(&frame));
        assert_eq!(codec.frame_len(&frame), Some(frame.len()));
        assert_eq!(codec.decode(&frame).unwrap(), ensemble);
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let codec = FrameCodec::new();
        let mut frame = codec.encode(&sample_ensemble(1, 2)).unwrap();
        frame.extend_from_slice(b"trailing");
        assert!(codec.verify(&frame));
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let codec = FrameCodec::new();
        let mut frame = codec.encode(&sample_ensemble(1, 2)).unwrap();
        let mid = HEADER_LEN + 3;
        frame[mid] ^= 0xff;
        assert!(matches!(
            codec.check(&frame),
            Err(CodecError::ChecksumMismatch { .. })
        ));
        assert!(codec.decode(&frame).is_none());
    }

    #[test]
    fn garbage_after_delimiter_is_rejected() {
        let codec = FrameCodec::new();
        let mut frame = DELIMITER.to_vec();
        frame.extend_from_slice(&[0x13; 40]);
        assert!(matches!(
            codec.parse_header(&frame),
            Err(CodecError::HeaderMismatch(_))
        ));
        assert!(!codec.verify(&frame));
        assert!(!codec.verify(&DELIMITER));
    }
}
