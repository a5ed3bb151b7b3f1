use anyhow::Context;
use parking_lot::Mutex;
use rivercore::ensemble::{CodecStream, EnsembleCodec, FrameCodec};
use rivercore::pipeline::{EnsembleDistributor, ReplaySource, ReplaySummary, DEFAULT_QUEUE_CAPACITY};
use rivercore::prelude::Queryable;
use rivercore::projection::{
    AmplitudeProjection, AmplitudeSnapshot, ContourKind, ContourProjection, ContourSnapshot,
    ShipTrackProjection, ShipTrackSnapshot, TabularProjection, TabularSnapshot,
    TimeSeriesOptions, TimeSeriesProjection, TimeSeriesSnapshot,
};
use rivercore::session::{LinkProvider, SerialSession, SessionTiming, TerminalState};
use rivercore::settings::SettingsStore;
use rivercore::telemetry::PipelineMetrics;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Pipeline counters plus the live decoder's frame counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsReport {
    pub pipeline: PipelineMetrics,
    pub frames_decoded: u64,
    pub frames_rejected: u64,
}

/// Owns the pipeline: live bytes and replayed files both end up in the
/// distributor, which feeds the projections queried by the bridge.
pub struct DataManager {
    settings: Arc<SettingsStore>,
    distributor: Arc<EnsembleDistributor>,
    stream: Arc<Mutex<CodecStream>>,
    session: SerialSession,
    replay: ReplaySource,
    tabular: Arc<TabularProjection>,
    amplitude: Arc<AmplitudeProjection>,
    contour: Arc<ContourProjection>,
    shiptrack: Arc<ShipTrackProjection>,
    timeseries: Arc<TimeSeriesProjection>,
}

impl DataManager {
    pub fn new(settings: Arc<SettingsStore>, provider: Arc<dyn LinkProvider>) -> Self {
        Self::with_timing(settings, provider, SessionTiming::default())
    }

    pub fn with_timing(
        settings: Arc<SettingsStore>,
        provider: Arc<dyn LinkProvider>,
        timing: SessionTiming,
    ) -> Self {
        let codec: Arc<dyn EnsembleCodec> = Arc::new(FrameCodec::new());
        let distributor = Arc::new(EnsembleDistributor::new(DEFAULT_QUEUE_CAPACITY));

        let tabular = Arc::new(TabularProjection::new());
        let amplitude = Arc::new(AmplitudeProjection::new());
        let contour = Arc::new(ContourProjection::new());
        let shiptrack = Arc::new(ShipTrackProjection::new());
        let timeseries = Arc::new(TimeSeriesProjection::new(
            settings.snapshot().timeseries,
        ));
        distributor.register(tabular.clone());
        distributor.register(amplitude.clone());
        distributor.register(contour.clone());
        distributor.register(shiptrack.clone());
        distributor.register(timeseries.clone());

        let mut stream = CodecStream::new(Arc::clone(&codec));
        let sink = Arc::clone(&distributor);
        stream.subscribe(move |ensemble| sink.submit(ensemble));
        let stream = Arc::new(Mutex::new(stream));

        let session = SerialSession::with_timing(provider, Arc::clone(&settings), timing);
        let feed = Arc::clone(&stream);
        session.subscribe(move |bytes| feed.lock().feed(bytes));

        let replay = ReplaySource::new(codec, Arc::clone(&distributor));

        Self {
            settings,
            distributor,
            stream,
            session,
            replay,
            tabular,
            amplitude,
            contour,
            shiptrack,
            timeseries,
        }
    }

    pub fn start(&self) -> anyhow::Result<()> {
        self.distributor
            .start()
            .context("starting ensemble distributor")?;
        log::info!(
            "pipeline running with projections {:?}",
            self.distributor.projection_names()
        );
        Ok(())
    }

    pub fn shutdown(&self) {
        self.session.disconnect();
        if let Err(err) = self.session.stop_recording() {
            log::error!("closing recording: {}", err);
        }
        self.distributor.shutdown();
    }

    pub fn session(&self) -> &SerialSession {
        &self.session
    }

    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.distributor.wait_idle(timeout)
    }

    pub fn tabular_data(&self) -> TabularSnapshot {
        self.tabular.get_data(())
    }

    pub fn amplitude_data(&self) -> AmplitudeSnapshot {
        self.amplitude.get_data(())
    }

    pub fn contour_data(&self, kind: ContourKind) -> ContourSnapshot {
        self.contour.get_data(kind)
    }

    pub fn shiptrack_data(&self) -> ShipTrackSnapshot {
        self.shiptrack.get_data(())
    }

    pub fn timeseries_data(&self) -> TimeSeriesSnapshot {
        self.timeseries.get_data(())
    }

    pub fn timeseries_options(&self) -> TimeSeriesOptions {
        self.timeseries.get_options()
    }

    /// Applies and persists new time-series options.
    pub fn set_timeseries_options(&self, options: TimeSeriesOptions) -> anyhow::Result<()> {
        self.timeseries.set_options(options);
        let applied = self.timeseries.get_options();
        self.settings
            .update(|settings| settings.timeseries = applied)
            .context("saving time-series options")?;
        Ok(())
    }

    pub fn replay(&self, files: Vec<PathBuf>) -> anyhow::Result<Option<JoinHandle<ReplaySummary>>> {
        self.replay.replay(files).context("starting replay")
    }

    pub fn replay_blocking(&self, files: &[PathBuf]) -> ReplaySummary {
        self.replay.replay_blocking(files)
    }

    /// Clears every projection and any partially buffered live frame.
    pub fn reset_all(&self) {
        self.stream.lock().clear();
        self.distributor.reset_all();
    }

    pub fn metrics(&self) -> MetricsReport {
        let stream = self.stream.lock();
        MetricsReport {
            pipeline: self.distributor.metrics(),
            frames_decoded: stream.decoded(),
            frames_rejected: stream.rejected(),
        }
    }

    pub fn terminal_state(&self) -> TerminalState {
        self.session.terminal_state()
    }

    pub fn connect(&self, port: &str, baud: u32) -> anyhow::Result<()> {
        self.session
            .connect(port, baud)
            .with_context(|| format!("connecting to {}", port))
    }

    pub fn disconnect(&self) -> anyhow::Result<()> {
        self.session.disconnect();
        Ok(())
    }

    pub fn send_command(&self, text: &str) -> anyhow::Result<()> {
        self.session.send_command(text).context("sending command")
    }

    pub fn send_break(&self) -> anyhow::Result<()> {
        let duration = self.session.timing().break_duration;
        self.session.send_break(duration).context("sending break")
    }

    pub fn send_bulk(&self, text: &str) -> anyhow::Result<()> {
        let sent = self.session.send_bulk(text).context("sending bulk commands")?;
        log::debug!("bulk sent {} line(s)", sent);
        Ok(())
    }

    pub fn recover(&self) -> anyhow::Result<()> {
        self.session.recover().context("recovering device link")
    }

    pub fn start_pinging(&self) -> anyhow::Result<()> {
        self.session.start_pinging().context("starting pinging")
    }

    pub fn stop_pinging(&self) -> anyhow::Result<()> {
        self.session.stop_pinging().context("stopping pinging")
    }

    pub fn clear_console(&self) -> anyhow::Result<()> {
        self.session.clear_console();
        Ok(())
    }

    pub fn set_recording(&self, enabled: bool) -> anyhow::Result<()> {
        if enabled {
            let path = self
                .session
                .start_recording()
                .context("starting recording")?;
            log::info!("recording to {}", path.display());
        } else if let Some(status) = self.session.stop_recording().context("stopping recording")? {
            log::info!(
                "recording stopped after {} bytes",
                status.total_bytes
            );
        }
        Ok(())
    }

    pub fn list_ports(&self) -> Vec<String> {
        self.session.list_ports()
    }

    pub fn list_baud_rates(&self) -> Vec<u32> {
        self.session.list_baud_rates()
    }
}

impl Drop for DataManager {
    fn drop(&mut self) {
        self.distributor.shutdown();
    }
}
