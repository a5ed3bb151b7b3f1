use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

use tokio_serial::SerialPort;

/// Read timeout for the underlying port; the reader polls `bytes_available`
/// first so this only bounds a read racing a disconnect.
const PORT_TIMEOUT: Duration = Duration::from_millis(100);

/// A byte link to the instrument. Handles returned by `try_clone` share the
/// same underlying device.
pub trait Link: Send {
    fn bytes_available(&mut self) -> io::Result<usize>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Holds the line in the break state for `duration`.
    fn send_break(&mut self, duration: Duration) -> io::Result<()>;

    fn try_clone(&self) -> io::Result<Box<dyn Link>>;
}

/// Opens links and enumerates the ports that can be opened.
pub trait LinkProvider: Send + Sync {
    fn open(&self, port: &str, baud: u32) -> io::Result<Box<dyn Link>>;

    fn list_ports(&self) -> Vec<String>;
}

pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl Link for SerialLink {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.port.bytes_to_read().map_err(io::Error::from)? as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(0),
            other => other,
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        Write::write_all(&mut self.port, bytes)?;
        self.port.flush()
    }

    fn send_break(&mut self, duration: Duration) -> io::Result<()> {
        self.port.set_break().map_err(io::Error::from)?;
        thread::sleep(duration);
        self.port.clear_break().map_err(io::Error::from)
    }

    fn try_clone(&self) -> io::Result<Box<dyn Link>> {
        let port = self.port.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(SerialLink { port }))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SerialLinkProvider;

impl LinkProvider for SerialLinkProvider {
    fn open(&self, port: &str, baud: u32) -> io::Result<Box<dyn Link>> {
        let port = tokio_serial::new(port, baud)
            .timeout(PORT_TIMEOUT)
            .open()
            .map_err(io::Error::from)?;
        Ok(Box::new(SerialLink { port }))
    }

    fn list_ports(&self) -> Vec<String> {
        match tokio_serial::available_ports() {
            Ok(ports) => ports.into_iter().map(|info| info.port_name).collect(),
            Err(err) => {
                log::warn!("listing serial ports: {}", err);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    /// Shared state behind every handle of an in-memory link.
    #[derive(Default)]
    pub struct MockDevice {
        pub inbound: Mutex<VecDeque<u8>>,
        pub written: Mutex<Vec<u8>>,
        pub breaks: Mutex<Vec<Duration>>,
        pub fail_reads: Mutex<bool>,
    }

    impl MockDevice {
        pub fn push_inbound(&self, bytes: &[u8]) {
            self.inbound.lock().extend(bytes.iter().copied());
        }

        pub fn written_text(&self) -> String {
            String::from_utf8_lossy(&self.written.lock()).into_owned()
        }
    }

    pub struct MockLink {
        device: Arc<MockDevice>,
    }

    impl Link for MockLink {
        fn bytes_available(&mut self) -> io::Result<usize> {
            if *self.device.fail_reads.lock() {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            Ok(self.device.inbound.lock().len())
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut inbound = self.device.inbound.lock();
            let count = buf.len().min(inbound.len());
            for (slot, byte) in buf.iter_mut().zip(inbound.drain(..count)) {
                *slot = byte;
            }
            Ok(count)
        }

        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.device.written.lock().extend_from_slice(bytes);
            Ok(())
        }

        fn send_break(&mut self, duration: Duration) -> io::Result<()> {
            self.device.breaks.lock().push(duration);
            thread::sleep(duration);
            Ok(())
        }

        fn try_clone(&self) -> io::Result<Box<dyn Link>> {
            Ok(Box::new(MockLink {
                device: Arc::clone(&self.device),
            }))
        }
    }

    /// Opens links onto one shared device; `port` names listed in
    /// `missing` fail to open.
    #[derive(Default)]
    pub struct MockProvider {
        pub device: Arc<MockDevice>,
        pub missing: Vec<String>,
        pub opened: Mutex<Vec<(String, u32)>>,
    }

    impl LinkProvider for MockProvider {
        fn open(&self, port: &str, baud: u32) -> io::Result<Box<dyn Link>> {
            if self.missing.iter().any(|name| name == port) {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such port"));
            }
            self.opened.lock().push((port.to_string(), baud));
            Ok(Box::new(MockLink {
                device: Arc::clone(&self.device),
            }))
        }

        fn list_ports(&self) -> Vec<String> {
            vec!["/dev/ttyMOCK0".to_string()]
        }
    }
}
