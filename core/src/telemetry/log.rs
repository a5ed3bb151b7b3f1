use log::{debug, error, info, warn};

/// Prefixes every record with the component that emitted it.
#[derive(Debug, Clone, Copy)]
pub struct LogManager {
    component: &'static str,
}

impl LogManager {
    pub fn new(component: &'static str) -> Self {
        Self { component }
    }

    pub fn record(&self, message: &str) {
        info!("{}: {}", self.component, message);
    }

    pub fn detail(&self, message: &str) {
        debug!("{}: {}", self.component, message);
    }

    pub fn warn(&self, message: &str) {
        warn!("{}: {}", self.component, message);
    }

    pub fn error(&self, message: &str) {
        error!("{}: {}", self.component, message);
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new("rivercore")
    }
}
