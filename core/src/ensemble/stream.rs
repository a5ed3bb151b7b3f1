use std::sync::Arc;

use log::debug;

use crate::ensemble::codec::{EnsembleCodec, DELIMITER};
use crate::ensemble::model::Ensemble;

/// Callback invoked once per decoded ensemble.
pub type EnsembleSubscriber = Box<dyn Fn(Arc<Ensemble>) + Send + Sync>;

/// Incremental decoder for a live byte stream. Bytes arrive in arbitrary
/// pieces; complete, valid frames are decoded and handed to subscribers in
/// registration order.
pub struct CodecStream {
    codec: Arc<dyn EnsembleCodec>,
    buffer: Vec<u8>,
    subscribers: Vec<EnsembleSubscriber>,
    decoded: u64,
    rejected: u64,
}

impl CodecStream {
    pub fn new(codec: Arc<dyn EnsembleCodec>) -> Self {
        Self {
            codec,
            buffer: Vec::new(),
            subscribers: Vec::new(),
            decoded: 0,
            rejected: 0,
        }
    }

    pub fn subscribe<F>(&mut self, subscriber: F)
    where
        F: Fn(Arc<Ensemble>) + Send + Sync + 'static,
    {
        self.subscribers.push(Box::new(subscriber));
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        while let Some(frame) = self.next_frame() {
            self.emit(&frame);
        }
    }

    /// Drops any partially buffered frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let Some(start) = find_delimiter(&self.buffer, 0) else {
                // Keep a possible partial delimiter at the tail.
                let keep = self.buffer.len().min(DELIMITER.len() - 1);
                self.buffer.drain(..self.buffer.len() - keep);
                return None;
            };
            self.buffer.drain(..start);

            if self.buffer.len() < self.codec.header_len() {
                return None;
            }
            let Some(frame_len) = self.codec.frame_len(&self.buffer) else {
                self.skip_delimiter();
                continue;
            };
            if self.buffer.len() < frame_len {
                return None;
            }
            if !self.codec.verify(&self.buffer[..frame_len]) {
                self.skip_delimiter();
                continue;
            }
            return Some(self.buffer.drain(..frame_len).collect());
        }
    }

    fn skip_delimiter(&mut self) {
        self.rejected += 1;
        self.buffer.drain(..1);
    }

    fn emit(&mut self, frame: &[u8]) {
        match self.codec.decode(frame) {
            Some(ensemble) => {
                self.decoded += 1;
                let ensemble = Arc::new(ensemble);
                for subscriber in &self.subscribers {
                    subscriber(Arc::clone(&ensemble));
                }
            }
            None => {
                self.rejected += 1;
                debug!("verified frame of {} bytes did not decode", frame.len());
            }
        }
    }
}

/// Position of the first delimiter at or after `from`.
pub fn find_delimiter(haystack: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(DELIMITER.len())
        .position(|window| window == DELIMITER)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::codec::FrameCodec;
    use crate::ensemble::fixtures::sample_ensemble;
    use parking_lot::Mutex;

    fn collecting_stream() -> (CodecStream, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut stream = CodecStream::new(Arc::new(FrameCodec::new()));
        let sink = Arc::clone(&seen);
        stream.subscribe(move |ens| sink.lock().push(ens.number().unwrap_or(0)));
        (stream, seen)
    }

    #[test]
    fn frames_split_across_feeds_are_reassembled() {
        let codec = FrameCodec::new();
        let mut bytes = b"boot banner\r\n".to_vec();
        for n in 1..=3 {
            bytes.extend(codec.encode(&sample_ensemble(n, 4)).unwrap());
        }

        let (mut stream, seen) = collecting_stream();
        for piece in bytes.chunks(7) {
            stream.feed(piece);
        }

        assert_eq!(*seen.lock(), vec![1, 2, 3]);
        assert_eq!(stream.decoded(), 3);
    }

    #[test]
    fn corrupt_frame_is_skipped_and_stream_resyncs() {
        let codec = FrameCodec::new();
        let mut bad = codec.encode(&sample_ensemble(1, 4)).unwrap();
        let last = bad.len() - 1;
        bad[last] ^= 0x55;
        let good = codec.encode(&sample_ensemble(2, 4)).unwrap();

        let (mut stream, seen) = collecting_stream();
        stream.feed(&bad);
        stream.feed(&good);

        assert_eq!(*seen.lock(), vec![2]);
        assert!(stream.rejected() >= 1);
    }
}
