use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::prelude::{SessionError, SessionResult};
use crate::recording::{BinaryRecorder, RecordingStatus};
use crate::session::link::{Link, LinkProvider};
use crate::session::transcript::Transcript;
use crate::settings::SettingsStore;
use crate::telemetry::LogManager;

pub const BAUD_RATES: [u32; 9] = [921_600, 460_800, 230_400, 115_200, 38_400, 19_200, 9_600, 4_800, 2_400];

const READER_THREAD: &str = "serial-reader";
const MAX_READ: usize = 64 * 1024;
const COMMAND_TERMINATOR: &str = "\r";

/// Delays used by the reader loop and the command helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    pub poll_interval: Duration,
    pub bulk_delay: Duration,
    pub break_duration: Duration,
    pub recover_wait: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            bulk_delay: Duration::from_millis(250),
            break_duration: Duration::from_millis(1250),
            recover_wait: Duration::from_secs(1),
        }
    }
}

/// Receives every chunk read from the link, unmodified.
pub type SerialSubscriber = Box<dyn Fn(&[u8]) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminalState {
    pub connected: bool,
    pub port: Option<String>,
    pub baud: Option<u32>,
    pub console: String,
    pub recording: bool,
    pub current_file_bytes: u64,
    pub total_bytes: u64,
    pub recording_file: Option<PathBuf>,
}

struct Connection {
    link: Box<dyn Link>,
    port: String,
    baud: u32,
    alive: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

struct Inner {
    provider: Arc<dyn LinkProvider>,
    settings: Arc<SettingsStore>,
    timing: SessionTiming,
    lifecycle: Mutex<()>,
    connection: Mutex<Option<Connection>>,
    transcript: Mutex<Transcript>,
    recorder: Mutex<Option<BinaryRecorder>>,
    subscribers: RwLock<Vec<SerialSubscriber>>,
    log: LogManager,
}

impl Inner {
    fn read_loop(self: Arc<Self>, mut link: Box<dyn Link>, alive: Arc<AtomicBool>) {
        let mut buf = vec![0u8; 4096];
        while alive.load(Ordering::Acquire) {
            if let Err(err) = self.poll_once(link.as_mut(), &mut buf) {
                self.reader_failed(&alive, &err);
                break;
            }
            thread::sleep(self.timing.poll_interval);
        }
        self.log.detail("reader stopped");
    }

    fn poll_once(&self, link: &mut dyn Link, buf: &mut Vec<u8>) -> io::Result<()> {
        let available = link.bytes_available()?.min(MAX_READ);
        if available == 0 {
            return Ok(());
        }
        if buf.len() < available {
            buf.resize(available, 0);
        }
        let read = link.read(&mut buf[..available])?;
        if read > 0 {
            self.publish(&buf[..read]);
        }
        Ok(())
    }

    fn publish(&self, bytes: &[u8]) {
        self.transcript.lock().append_bytes(bytes);
        self.record(bytes);
        for subscriber in self.subscribers.read().iter() {
            if panic::catch_unwind(AssertUnwindSafe(|| subscriber(bytes))).is_err() {
                self.log.error("serial subscriber panicked");
            }
        }
    }

    fn record(&self, bytes: &[u8]) {
        let mut recorder = self.recorder.lock();
        let Some(active) = recorder.as_mut() else {
            return;
        };
        if let Err(err) = active.write(bytes) {
            self.log.error(&format!("recording stopped: {}", err));
            self.transcript
                .lock()
                .notice(&format!("Recording stopped. {}", err));
            *recorder = None;
        }
    }

    /// Drops the connection owned by this reader, leaving a newer one alone.
    fn reader_failed(&self, alive: &Arc<AtomicBool>, err: &io::Error) {
        alive.store(false, Ordering::Release);
        self.log.error(&format!("serial port error: {}", err));

        let stale = {
            let mut connection = self.connection.lock();
            let owned = connection
                .as_ref()
                .map_or(false, |current| Arc::ptr_eq(&current.alive, alive));
            if owned {
                connection.take()
            } else {
                None
            }
        };
        if stale.is_some() {
            let mut transcript = self.transcript.lock();
            transcript.notice(&format!("Error using the serial port. {}", err));
            transcript.notice("Serial Disconnect.");
        }
    }

    fn close_connection(&self) {
        let connection = self.connection.lock().take();
        let Some(mut connection) = connection else {
            return;
        };
        connection.alive.store(false, Ordering::Release);
        if let Some(reader) = connection.reader.take() {
            if reader.join().is_err() {
                self.log.error("reader thread panicked");
            }
        }
        drop(connection);
        self.transcript.lock().notice("Serial Disconnect.");
        self.log.record("disconnected");
    }

    fn with_link<T>(&self, op: impl FnOnce(&mut dyn Link) -> io::Result<T>) -> SessionResult<T> {
        let mut connection = self.connection.lock();
        let connection = connection.as_mut().ok_or(SessionError::NotConnected)?;
        Ok(op(connection.link.as_mut())?)
    }
}

/// One live instrument link: a reader thread publishes incoming bytes while
/// commands are written from the caller's thread.
pub struct SerialSession {
    inner: Arc<Inner>,
}

impl SerialSession {
    pub fn new(provider: Arc<dyn LinkProvider>, settings: Arc<SettingsStore>) -> Self {
        Self::with_timing(provider, settings, SessionTiming::default())
    }

    pub fn with_timing(
        provider: Arc<dyn LinkProvider>,
        settings: Arc<SettingsStore>,
        timing: SessionTiming,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                settings,
                timing,
                lifecycle: Mutex::new(()),
                connection: Mutex::new(None),
                transcript: Mutex::new(Transcript::default()),
                recorder: Mutex::new(None),
                subscribers: RwLock::new(Vec::new()),
                log: LogManager::new("serial"),
            }),
        }
    }

    pub fn timing(&self) -> SessionTiming {
        self.inner.timing
    }

    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.inner.subscribers.write().push(Box::new(subscriber));
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.lock().is_some()
    }

    /// Opens `port` and starts the reader. An existing link is closed first.
    pub fn connect(&self, port: &str, baud: u32) -> SessionResult<()> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock();
        inner.close_connection();

        inner
            .transcript
            .lock()
            .notice(&format!("Serial Connect: {} : {}", port, baud));
        inner.log.record(&format!("connecting {} at {} baud", port, baud));

        let link = inner.provider.open(port, baud).map_err(|source| {
            inner
                .transcript
                .lock()
                .notice(&format!("Error opening serial port. {}", source));
            inner
                .log
                .error(&format!("opening {}: {}", port, source));
            SessionError::Open {
                port: port.to_string(),
                baud,
                source,
            }
        })?;
        let reader_link = link.try_clone()?;

        let alive = Arc::new(AtomicBool::new(true));
        *inner.connection.lock() = Some(Connection {
            link,
            port: port.to_string(),
            baud,
            alive: Arc::clone(&alive),
            reader: None,
        });

        let reader_inner = Arc::clone(inner);
        let reader_alive = Arc::clone(&alive);
        let spawned = thread::Builder::new()
            .name(READER_THREAD.to_string())
            .spawn(move || reader_inner.read_loop(reader_link, reader_alive));
        match spawned {
            Ok(handle) => {
                let mut connection = inner.connection.lock();
                if let Some(current) = connection
                    .as_mut()
                    .filter(|current| Arc::ptr_eq(&current.alive, &alive))
                {
                    current.reader = Some(handle);
                }
            }
            Err(err) => {
                inner.connection.lock().take();
                return Err(SessionError::Spawn(err));
            }
        }

        if let Err(err) = inner.settings.update(|settings| {
            settings.comm.port = port.to_string();
            settings.comm.baud = baud;
        }) {
            inner.log.warn(&format!("saving comm settings: {}", err));
        }
        Ok(())
    }

    /// Stops the reader and releases the link. Safe to call when closed.
    pub fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock();
        self.inner.close_connection();
    }

    pub fn send_command(&self, text: &str) -> SessionResult<()> {
        let command = text.trim_end_matches(&['\r', '\n'][..]);
        if command.is_empty() {
            return Ok(());
        }
        let line = format!("{}{}", command, COMMAND_TERMINATOR);
        self.inner.with_link(|link| link.write_all(line.as_bytes()))?;
        self.inner.log.detail(&format!("write: {}", command));
        Ok(())
    }

    /// Clears the console, then holds the line in break for `duration`.
    /// The break runs on a cloned handle so state queries are not held up.
    pub fn send_break(&self, duration: Duration) -> SessionResult<()> {
        self.inner.transcript.lock().clear();
        let mut link = self.inner.with_link(|link| link.try_clone())?;
        link.send_break(duration)?;
        self.inner.log.record("BREAK sent");
        Ok(())
    }

    /// Sends each non-blank line with a fixed pause between lines.
    /// Returns the number of lines written.
    pub fn send_bulk(&self, text: &str) -> SessionResult<usize> {
        let mut sent = 0;
        for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            self.send_command(line)?;
            sent += 1;
            thread::sleep(self.inner.timing.bulk_delay);
        }
        Ok(sent)
    }

    pub fn start_pinging(&self) -> SessionResult<()> {
        self.send_command("START")?;
        self.inner.log.record("start pinging");
        Ok(())
    }

    pub fn stop_pinging(&self) -> SessionResult<()> {
        self.inner.transcript.lock().clear();
        self.send_command("STOP")?;
        self.inner.log.record("stop pinging");
        Ok(())
    }

    /// Break, stop, start: a best-effort nudge for a device that went quiet.
    pub fn recover(&self) -> SessionResult<()> {
        let timing = self.inner.timing;
        self.send_break(timing.break_duration)?;
        thread::sleep(timing.recover_wait);
        self.stop_pinging()?;
        thread::sleep(timing.recover_wait);
        self.start_pinging()
    }

    pub fn clear_console(&self) {
        self.inner.transcript.lock().clear();
    }

    /// Starts writing received bytes under the configured output folder.
    /// Returns the file being written.
    pub fn start_recording(&self) -> SessionResult<PathBuf> {
        let mut recorder = self.inner.recorder.lock();
        if let Some(active) = recorder.as_ref() {
            return Ok(active.file_path().to_path_buf());
        }
        let folder = self.inner.settings.snapshot().comm.output_dir;
        let active = BinaryRecorder::create(folder)?;
        let path = active.file_path().to_path_buf();
        *recorder = Some(active);
        Ok(path)
    }

    pub fn stop_recording(&self) -> SessionResult<Option<RecordingStatus>> {
        let active = self.inner.recorder.lock().take();
        match active {
            Some(active) => Ok(Some(active.close()?)),
            None => Ok(None),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.inner.recorder.lock().is_some()
    }

    pub fn terminal_state(&self) -> TerminalState {
        let (port, baud) = match self.inner.connection.lock().as_ref() {
            Some(connection) => (Some(connection.port.clone()), Some(connection.baud)),
            None => (None, None),
        };
        let status = self.inner.recorder.lock().as_ref().map(BinaryRecorder::status);
        TerminalState {
            connected: port.is_some(),
            port,
            baud,
            console: self.inner.transcript.lock().render(),
            recording: status.is_some(),
            current_file_bytes: status.as_ref().map_or(0, |s| s.current_file_bytes),
            total_bytes: status.as_ref().map_or(0, |s| s.total_bytes),
            recording_file: status.map(|s| s.file_path),
        }
    }

    pub fn list_ports(&self) -> Vec<String> {
        self.inner.provider.list_ports()
    }

    pub fn list_baud_rates(&self) -> Vec<u32> {
        BAUD_RATES.to_vec()
    }
}

impl Drop for SerialSession {
    fn drop(&mut self) {
        self.disconnect();
        if let Err(err) = self.stop_recording() {
            self.inner.log.error(&format!("closing recording: {}", err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::link::mock::MockProvider;
    use crate::settings::Settings;
    use std::time::Instant;

    fn fast_timing() -> SessionTiming {
        SessionTiming {
            poll_interval: Duration::from_millis(1),
            bulk_delay: Duration::ZERO,
            break_duration: Duration::from_millis(5),
            recover_wait: Duration::ZERO,
        }
    }

    fn session_with(provider: MockProvider) -> (SerialSession, Arc<MockProvider>, Arc<SettingsStore>) {
        let provider = Arc::new(provider);
        let settings = Arc::new(SettingsStore::in_memory(Settings::default()));
        let session = SerialSession::with_timing(provider.clone(), Arc::clone(&settings), fast_timing());
        (session, provider, settings)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    #[test]
    fn connect_persists_settings_and_publishes_bytes() {
        let (session, provider, settings) = session_with(MockProvider::default());
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        session.subscribe(move |bytes| sink.lock().extend_from_slice(bytes));

        session.connect("/dev/ttyMOCK0", 9600).unwrap();
        assert!(session.is_connected());
        assert_eq!(
            *provider.opened.lock(),
            vec![("/dev/ttyMOCK0".to_string(), 9600)]
        );
        assert_eq!(settings.snapshot().comm.port, "/dev/ttyMOCK0");
        assert_eq!(settings.snapshot().comm.baud, 9600);

        provider.device.push_inbound(b"CSHOW\r\n\x06");
        assert!(wait_for(|| received.lock().len() == 8));
        assert_eq!(received.lock().as_slice(), b"CSHOW\r\n\x06");

        let state = session.terminal_state();
        assert!(state.connected);
        assert_eq!(state.baud, Some(9600));
        assert!(state.console.contains("Serial Connect: /dev/ttyMOCK0 : 9600"));
        assert!(state.console.ends_with("CSHOW\r\n<span class=\"ack\">ACK</span>"));

        session.disconnect();
        session.disconnect();
        assert!(!session.is_connected());
        assert!(session.terminal_state().console.ends_with("Serial Disconnect.\n"));
    }

    #[test]
    fn failed_open_stays_disconnected() {
        let (session, _provider, settings) = session_with(MockProvider {
            missing: vec!["/dev/ttyGONE".to_string()],
            ..Default::default()
        });

        let err = session.connect("/dev/ttyGONE", 115_200).unwrap_err();
        assert!(matches!(err, SessionError::Open { .. }));
        assert!(!session.is_connected());
        assert_eq!(settings.snapshot().comm.port, "");
        assert!(session
            .terminal_state()
            .console
            .contains("Error opening serial port."));
    }

    #[test]
    fn commands_need_a_link() {
        let (session, provider, _settings) = session_with(MockProvider::default());
        assert!(matches!(
            session.send_command("CSHOW"),
            Err(SessionError::NotConnected)
        ));

        session.connect("/dev/ttyMOCK0", 115_200).unwrap();
        session.send_command("CSHOW\n").unwrap();
        session.send_command("").unwrap();
        assert_eq!(provider.device.written_text(), "CSHOW\r");
    }

    #[test]
    fn bulk_skips_blank_lines() {
        let (session, provider, _settings) = session_with(MockProvider::default());
        session.connect("/dev/ttyMOCK0", 115_200).unwrap();

        let sent = session.send_bulk("CEPO 3\n\n  CWPP 1  \r\nCSAVE\n").unwrap();
        assert_eq!(sent, 3);
        assert_eq!(provider.device.written_text(), "CEPO 3\rCWPP 1\rCSAVE\r");
    }

    #[test]
    fn recover_sends_break_stop_start() {
        let (session, provider, _settings) = session_with(MockProvider::default());
        session.connect("/dev/ttyMOCK0", 115_200).unwrap();

        session.recover().unwrap();
        assert_eq!(*provider.device.breaks.lock(), vec![Duration::from_millis(5)]);
        assert_eq!(provider.device.written_text(), "STOP\rSTART\r");
    }

    #[test]
    fn break_does_not_hold_up_state_queries() {
        let (session, provider, _settings) = session_with(MockProvider::default());
        let session = Arc::new(session);
        session.connect("/dev/ttyMOCK0", 115_200).unwrap();

        let breaker = Arc::clone(&session);
        let hold = Duration::from_millis(500);
        let handle = thread::spawn(move || breaker.send_break(hold));
        assert!(wait_for(|| !provider.device.breaks.lock().is_empty()));

        let started = Instant::now();
        assert!(session.terminal_state().connected);
        assert!(session.is_connected());
        assert!(started.elapsed() < Duration::from_millis(250));
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn link_error_forces_disconnect() {
        let (session, provider, _settings) = session_with(MockProvider::default());
        session.connect("/dev/ttyMOCK0", 115_200).unwrap();

        *provider.device.fail_reads.lock() = true;
        assert!(wait_for(|| !session.is_connected()));
        let console = session.terminal_state().console;
        assert!(console.contains("Error using the serial port. device unplugged"));
    }

    #[test]
    fn recording_captures_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let (session, provider, settings) = session_with(MockProvider::default());
        settings
            .update(|s| s.comm.output_dir = dir.path().to_path_buf())
            .unwrap();

        let path = session.start_recording().unwrap();
        session.connect("/dev/ttyMOCK0", 115_200).unwrap();
        provider.device.push_inbound(b"\x15raw\r\n");
        assert!(wait_for(|| session.terminal_state().total_bytes == 6));

        let state = session.terminal_state();
        assert!(state.recording);
        assert!(state.console.contains("<span class=\"nak\">NAK</span>"));
        let status = session.stop_recording().unwrap().unwrap();
        assert_eq!(status.total_bytes, 6);
        assert_eq!(std::fs::read(path).unwrap(), b"\x15raw\r\n");
        assert!(!session.is_recording());
    }

    #[test]
    fn lists_ports_and_bauds() {
        let (session, _provider, _settings) = session_with(MockProvider::default());
        assert_eq!(session.list_ports(), vec!["/dev/ttyMOCK0".to_string()]);
        let bauds = session.list_baud_rates();
        assert_eq!(bauds.first(), Some(&921_600));
        assert!(bauds.contains(&115_200));
        assert_eq!(bauds.len(), 9);
    }
}
