use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::Serialize;

use crate::ensemble::stream::find_delimiter;
use crate::ensemble::{EnsembleCodec, DELIMITER};
use crate::pipeline::distributor::EnsembleDistributor;
use crate::prelude::{PipelineError, PipelineResult};
use crate::telemetry::LogManager;

pub const REPLAY_BLOCK_SIZE: usize = 4096;

const THREAD_NAME: &str = "ensemble-replay";

/// Totals for one replay batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub files: usize,
    pub frames_seen: u64,
    pub frames_accepted: u64,
    pub frames_rejected: u64,
}

/// Feeds capture files through the same codec and distributor as live data.
#[derive(Clone)]
pub struct ReplaySource {
    codec: Arc<dyn EnsembleCodec>,
    distributor: Arc<EnsembleDistributor>,
    log: LogManager,
}

impl ReplaySource {
    pub fn new(codec: Arc<dyn EnsembleCodec>, distributor: Arc<EnsembleDistributor>) -> Self {
        Self {
            codec,
            distributor,
            log: LogManager::new("replay"),
        }
    }

    /// Resets every projection, then replays `paths` on a worker thread.
    /// Returns `None` for an empty batch.
    pub fn replay(&self, paths: Vec<PathBuf>) -> PipelineResult<Option<JoinHandle<ReplaySummary>>> {
        if paths.is_empty() {
            return Ok(None);
        }
        self.distributor.reset_all();

        let source = self.clone();
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || source.play_files(&paths))
            .map_err(|source| PipelineError::Spawn {
                name: THREAD_NAME,
                source,
            })?;
        Ok(Some(handle))
    }

    /// Same as [`ReplaySource::replay`] but on the calling thread.
    pub fn replay_blocking(&self, paths: &[PathBuf]) -> ReplaySummary {
        if paths.is_empty() {
            return ReplaySummary::default();
        }
        self.distributor.reset_all();
        self.play_files(paths)
    }

    fn play_files(&self, paths: &[PathBuf]) -> ReplaySummary {
        let mut summary = ReplaySummary::default();
        for path in paths {
            match self.play_file(path, &mut summary) {
                Ok(()) => summary.files += 1,
                Err(err) => self
                    .log
                    .error(&format!("skipping {}: {}", path.display(), err)),
            }
        }
        self.log.record(&format!(
            "replayed {} file(s): {} accepted, {} rejected",
            summary.files, summary.frames_accepted, summary.frames_rejected
        ));
        summary
    }

    fn play_file(&self, path: &Path, summary: &mut ReplaySummary) -> io::Result<()> {
        self.log.detail(&format!("loading {}", path.display()));
        let file = File::open(path)?;
        self.play_reader(file, summary)
    }

    /// Splits the byte stream on the delimiter, carrying the tail after the
    /// last delimiter into the next block. The final tail is flushed at EOF.
    pub fn play_reader<R: Read>(&self, mut reader: R, summary: &mut ReplaySummary) -> io::Result<()> {
        let mut block = vec![0u8; REPLAY_BLOCK_SIZE];
        let mut buffer: Vec<u8> = Vec::with_capacity(REPLAY_BLOCK_SIZE * 2);

        loop {
            let read = match reader.read(&mut block) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            buffer.extend_from_slice(&block[..read]);

            let mut chunk_start = 0;
            while let Some(pos) = find_delimiter(&buffer, chunk_start) {
                let run_end = pos
                    + DELIMITER.len()
                    + buffer[pos + DELIMITER.len()..]
                        .iter()
                        .take_while(|byte| **byte == DELIMITER[0])
                        .count();
                if run_end == buffer.len() {
                    break;
                }
                let frame_start = if run_end - pos > DELIMITER.len() {
                    // Every candidate needs a full header before choosing.
                    if buffer.len() < run_end - DELIMITER.len() + self.codec.header_len() {
                        break;
                    }
                    self.frame_start_in_run(&buffer, pos, run_end)
                } else {
                    pos
                };
                self.process_chunk(&buffer[chunk_start..frame_start], summary);
                chunk_start = frame_start + DELIMITER.len();
            }
            buffer.drain(..chunk_start);
        }

        self.process_chunk(&buffer, summary);
        Ok(())
    }

    /// A 0x80 run longer than the delimiter is shared with a neighbouring
    /// frame: either a checksum ending in 0x80 before it, or a header
    /// starting with 0x80 after it. The delimiter sits where a valid header
    /// follows; without one, the run's tail is taken.
    fn frame_start_in_run(&self, buffer: &[u8], run_start: usize, run_end: usize) -> usize {
        let last = run_end - DELIMITER.len();
        (run_start..=last)
            .find(|start| self.codec.frame_len(&buffer[*start..]).is_some())
            .unwrap_or(last)
    }

    fn process_chunk(&self, chunk: &[u8], summary: &mut ReplaySummary) {
        if chunk.is_empty() {
            return;
        }
        summary.frames_seen += 1;

        let mut frame = Vec::with_capacity(DELIMITER.len() + chunk.len());
        frame.extend_from_slice(&DELIMITER);
        frame.extend_from_slice(chunk);

        let decoded = if self.codec.verify(&frame) {
            self.codec.decode(&frame)
        } else {
            None
        };
        match decoded {
            Some(ensemble) => {
                summary.frames_accepted += 1;
                self.distributor.submit(ensemble);
            }
            None => {
                summary.frames_rejected += 1;
                self.log
                    .detail(&format!("dropped invalid chunk of {} bytes", frame.len()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::fixtures::sample_ensemble;
    use crate::ensemble::FrameCodec;
    use crate::prelude::{Projection, Queryable};
    use crate::projection::{AmplitudeProjection, TabularProjection};
    use std::io::{Cursor, Write};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn capture(numbers: impl IntoIterator<Item = u32>) -> Vec<u8> {
        let codec = FrameCodec::new();
        let mut bytes = Vec::new();
        for n in numbers {
            bytes.extend(codec.encode(&sample_ensemble(n, 6)).unwrap());
        }
        bytes
    }

    fn source() -> (ReplaySource, Arc<EnsembleDistributor>) {
        let distributor = Arc::new(EnsembleDistributor::default());
        let source = ReplaySource::new(Arc::new(FrameCodec::new()), Arc::clone(&distributor));
        (source, distributor)
    }

    #[test]
    fn trailing_garbage_after_delimiter_is_dropped() {
        let mut bytes = capture([1]);
        bytes.extend_from_slice(&DELIMITER);
        bytes.extend_from_slice(b"\x01\x02garbage that is not a frame");

        let (source, distributor) = source();
        let mut summary = ReplaySummary::default();
        source
            .play_reader(Cursor::new(bytes), &mut summary)
            .unwrap();

        assert_eq!(summary.frames_accepted, 1);
        assert_eq!(summary.frames_rejected, 1);
        assert_eq!(distributor.queued(), 1);
    }

    #[test]
    fn frames_spanning_block_boundaries_are_recovered() {
        let bytes = capture(1..=40);
        assert!(bytes.len() > REPLAY_BLOCK_SIZE * 2);

        let (source, distributor) = source();
        let mut summary = ReplaySummary::default();
        source
            .play_reader(Cursor::new(bytes), &mut summary)
            .unwrap();

        assert_eq!(summary.frames_accepted, 40);
        assert_eq!(summary.frames_rejected, 0);
        assert_eq!(distributor.metrics().submitted, 40);
    }

    #[test]
    fn header_starting_with_delimiter_byte_is_kept() {
        // 128 encodes as 0x80 0x00 0x00 0x00, extending the delimiter run.
        let (source, distributor) = source();
        let mut summary = ReplaySummary::default();
        source
            .play_reader(Cursor::new(capture(126..=130)), &mut summary)
            .unwrap();

        assert_eq!(summary.frames_accepted, 5);
        assert_eq!(summary.frames_rejected, 0);
        assert_eq!(distributor.queued(), 5);
    }

    #[test]
    fn queued_ensembles_do_not_survive_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("three.bin");
        std::fs::write(&path, capture(1..=3)).unwrap();

        let (source, distributor) = source();
        let tabular = Arc::new(TabularProjection::new());
        distributor.register(tabular.clone() as Arc<dyn Projection>);
        for n in 100..105 {
            distributor.submit(sample_ensemble(n, 6));
        }

        let summary = source.replay_blocking(&[path]);
        assert_eq!(summary.frames_accepted, 3);
        distributor.start().unwrap();
        assert!(distributor.wait_idle(WAIT));

        let snapshot = tabular.get_data(());
        assert_eq!(snapshot.num_ensembles, 3);
        assert_eq!(snapshot.latest.unwrap().ensemble_number, 3);
    }

    #[test]
    fn replaying_twice_gives_identical_snapshots() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&capture(1..=25)).unwrap();
        file.flush().unwrap();
        let paths = vec![file.path().to_path_buf()];

        let (source, distributor) = source();
        let tabular = Arc::new(TabularProjection::new());
        let amplitude = Arc::new(AmplitudeProjection::new());
        distributor.register(tabular.clone() as Arc<dyn Projection>);
        distributor.register(amplitude.clone() as Arc<dyn Projection>);
        distributor.start().unwrap();

        let first = source.replay_blocking(&paths);
        assert!(distributor.wait_idle(WAIT));
        let tabular_first = tabular.get_data(());
        let amplitude_first = amplitude.get_data(());

        let second = source.replay_blocking(&paths);
        assert!(distributor.wait_idle(WAIT));

        assert_eq!(first, second);
        assert_eq!(first.files, 1);
        assert_eq!(tabular_first.num_ensembles, 25);
        assert_eq!(tabular.get_data(()), tabular_first);
        assert_eq!(amplitude.get_data(()), amplitude_first);
    }

    #[test]
    fn unreadable_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.bin");
        std::fs::write(&good, capture([5, 6])).unwrap();
        let missing = dir.path().join("missing.bin");

        let (source, _distributor) = source();
        let handle = source.replay(vec![missing, good]).unwrap().unwrap();
        let summary = handle.join().unwrap();

        assert_eq!(summary.files, 1);
        assert_eq!(summary.frames_accepted, 2);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let (source, _distributor) = source();
        assert!(source.replay(Vec::new()).unwrap().is_none());
        assert_eq!(source.replay_blocking(&[]), ReplaySummary::default());
    }
}
