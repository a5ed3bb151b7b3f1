use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::ensemble::Ensemble;
use crate::prelude::{Projection, Queryable};
use crate::projection::window::RollingWindow;

pub const DEFAULT_MAX_ENS: usize = 20;

/// Metrics tracked by the time-series projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    BoatSpeed,
    BoatDir,
    Heading,
    Pitch,
    Roll,
    Temperature,
    GnssQual,
    GnssHdop,
    NumSats,
    WaterSpeed,
    WaterDir,
}

impl Metric {
    pub const ALL: [Metric; 11] = [
        Metric::BoatSpeed,
        Metric::BoatDir,
        Metric::Heading,
        Metric::Pitch,
        Metric::Roll,
        Metric::Temperature,
        Metric::GnssQual,
        Metric::GnssHdop,
        Metric::NumSats,
        Metric::WaterSpeed,
        Metric::WaterDir,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Visibility flags and history length. Flags only change what a snapshot
/// advertises; every metric is always accumulated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeSeriesOptions {
    pub is_boat_speed: bool,
    pub is_boat_dir: bool,
    pub is_heading: bool,
    pub is_pitch: bool,
    pub is_roll: bool,
    pub is_temperature: bool,
    pub is_gnss_qual: bool,
    pub is_gnss_hdop: bool,
    pub is_num_sats: bool,
    pub is_water_speed: bool,
    pub is_water_dir: bool,
    pub max_ens: usize,
}

impl Default for TimeSeriesOptions {
    fn default() -> Self {
        Self {
            is_boat_speed: false,
            is_boat_dir: false,
            is_heading: true,
            is_pitch: true,
            is_roll: true,
            is_temperature: false,
            is_gnss_qual: false,
            is_gnss_hdop: false,
            is_num_sats: false,
            is_water_speed: false,
            is_water_dir: false,
            max_ens: DEFAULT_MAX_ENS,
        }
    }
}

impl TimeSeriesOptions {
    pub fn is_visible(&self, metric: Metric) -> bool {
        match metric {
            Metric::BoatSpeed => self.is_boat_speed,
            Metric::BoatDir => self.is_boat_dir,
            Metric::Heading => self.is_heading,
            Metric::Pitch => self.is_pitch,
            Metric::Roll => self.is_roll,
            Metric::Temperature => self.is_temperature,
            Metric::GnssQual => self.is_gnss_qual,
            Metric::GnssHdop => self.is_gnss_hdop,
            Metric::NumSats => self.is_num_sats,
            Metric::WaterSpeed => self.is_water_speed,
            Metric::WaterDir => self.is_water_dir,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Series {
    pub visible: bool,
    /// `None` marks a cycle with no data for this metric.
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TimeSeriesSnapshot {
    pub max_ens: usize,
    /// Same length as every series; `None` where the ensemble had no header.
    pub timestamps: Vec<Option<DateTime<Utc>>>,
    pub boat_speed: Series,
    pub boat_dir: Series,
    pub heading: Series,
    pub pitch: Series,
    pub roll: Series,
    pub temperature: Series,
    pub gnss_qual: Series,
    pub gnss_hdop: Series,
    pub num_sats: Series,
    pub water_speed: Series,
    pub water_dir: Series,
}

struct TimeSeriesState {
    options: TimeSeriesOptions,
    timestamps: RollingWindow<Option<DateTime<Utc>>>,
    windows: Vec<RollingWindow<Option<f64>>>,
}

impl TimeSeriesState {
    fn new(options: TimeSeriesOptions) -> Self {
        let max_ens = options.max_ens.max(1);
        Self {
            options: TimeSeriesOptions { max_ens, ..options },
            timestamps: RollingWindow::with_capacity(max_ens),
            windows: vec![RollingWindow::with_capacity(max_ens); Metric::ALL.len()],
        }
    }

    fn resize(&mut self, max_ens: usize) {
        let max_ens = max_ens.max(1);
        self.options.max_ens = max_ens;
        self.timestamps.resize(max_ens);
        for window in &mut self.windows {
            window.resize(max_ens);
        }
    }

    fn series(&self, metric: Metric) -> Series {
        Series {
            visible: self.options.is_visible(metric),
            values: self.windows[metric.index()].to_vec(),
        }
    }
}

/// One value (or "no data") per metric for an ensemble.
fn sample(ensemble: &Ensemble) -> [Option<f64>; 11] {
    let mut values = [None; 11];
    let mut set = |metric: Metric, value: Option<f64>| values[metric.index()] = value;

    if let Some(anc) = ensemble.ancillary.as_ref() {
        set(Metric::Heading, Some(f64::from(anc.heading)));
        set(Metric::Pitch, Some(f64::from(anc.pitch)));
        set(Metric::Roll, Some(f64::from(anc.roll)));
        set(Metric::Temperature, Some(f64::from(anc.water_temp)));
    }
    if let Some((mag, dir)) = ensemble
        .earth_velocity
        .as_ref()
        .and_then(|vel| vel.average_mag_dir())
    {
        set(Metric::WaterSpeed, Some(f64::from(mag)));
        set(Metric::WaterDir, Some(f64::from(dir)));
    }
    if let Some(fix) = ensemble.position() {
        set(Metric::NumSats, Some(f64::from(fix.num_sats)));
        set(Metric::GnssQual, Some(f64::from(fix.fix_quality)));
        set(Metric::GnssHdop, Some(f64::from(fix.hdop)));
    }
    if let Some(bt) = ensemble.bottom_track.as_ref() {
        if let (Some(speed), Some(course)) = (bt.speed(), bt.course()) {
            set(Metric::BoatSpeed, Some(f64::from(speed)));
            set(Metric::BoatDir, Some(f64::from(course)));
        }
    }
    values
}

/// Rolling telemetry windows that always advance in lockstep.
pub struct TimeSeriesProjection {
    state: Mutex<TimeSeriesState>,
}

impl TimeSeriesProjection {
    pub fn new(options: TimeSeriesOptions) -> Self {
        Self {
            state: Mutex::new(TimeSeriesState::new(options)),
        }
    }

    pub fn get_options(&self) -> TimeSeriesOptions {
        self.state.lock().options.clone()
    }

    /// Applies new flags; a changed `max_ens` resizes every window together.
    pub fn set_options(&self, options: TimeSeriesOptions) {
        let mut state = self.state.lock();
        let max_ens = options.max_ens;
        state.options = TimeSeriesOptions {
            max_ens: state.options.max_ens,
            ..options
        };
        if max_ens.max(1) != state.options.max_ens {
            state.resize(max_ens);
        }
    }

    /// Current length of every window, timestamps first.
    pub fn window_lengths(&self) -> Vec<usize> {
        let state = self.state.lock();
        std::iter::once(state.timestamps.len())
            .chain(state.windows.iter().map(RollingWindow::len))
            .collect()
    }
}

impl Default for TimeSeriesProjection {
    fn default() -> Self {
        Self::new(TimeSeriesOptions::default())
    }
}

impl Projection for TimeSeriesProjection {
    fn name(&self) -> &'static str {
        "timeseries"
    }

    fn set_ens(&self, ensemble: &Arc<Ensemble>) {
        let values = sample(ensemble);
        let timestamp = ensemble.ensemble.as_ref().map(|data| data.timestamp);

        let mut state = self.state.lock();
        state.timestamps.push(timestamp);
        for (window, value) in state.windows.iter_mut().zip(values) {
            window.push(value);
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.timestamps.clear();
        for window in &mut state.windows {
            window.clear();
        }
    }
}

impl Queryable for TimeSeriesProjection {
    type Query = ();
    type Snapshot = TimeSeriesSnapshot;

    fn get_data(&self, _query: ()) -> TimeSeriesSnapshot {
        let state = self.state.lock();
        TimeSeriesSnapshot {
            max_ens: state.options.max_ens,
            timestamps: state.timestamps.to_vec(),
            boat_speed: state.series(Metric::BoatSpeed),
            boat_dir: state.series(Metric::BoatDir),
            heading: state.series(Metric::Heading),
            pitch: state.series(Metric::Pitch),
            roll: state.series(Metric::Roll),
            temperature: state.series(Metric::Temperature),
            gnss_qual: state.series(Metric::GnssQual),
            gnss_hdop: state.series(Metric::GnssHdop),
            num_sats: state.series(Metric::NumSats),
            water_speed: state.series(Metric::WaterSpeed),
            water_dir: state.series(Metric::WaterDir),
        }
    }
}
