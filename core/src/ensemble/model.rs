use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::math::stats::VelocityMath;

/// Instrument sentinel for a value that failed its validity check.
pub const BAD_VELOCITY: f32 = 88.888;

/// Returns true when the value is the bad-value sentinel or not a number.
pub fn is_bad_value(value: f32) -> bool {
    !value.is_finite() || (value - BAD_VELOCITY).abs() < 1e-3
}

/// Per-bin, per-beam matrix (rows are bins, columns are beams).
pub type BeamMatrix = Array2<f32>;

/// Column order of [`EarthVelocity::velocities`].
pub const EAST: usize = 0;
pub const NORTH: usize = 1;
pub const VERTICAL: usize = 2;
pub const ERROR: usize = 3;

/// Header data-set of an ensemble.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnsembleData {
    pub ensemble_number: u32,
    pub timestamp: DateTime<Utc>,
    pub num_bins: usize,
    pub num_beams: usize,
}

/// Scalar ancillary values reported alongside each ensemble.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AncillaryData {
    pub first_bin_range: f32,
    pub bin_size: f32,
    pub pitch: f32,
    pub roll: f32,
    pub heading: f32,
    pub water_temp: f32,
    pub transducer_depth: f32,
    pub is_upward: bool,
}

impl AncillaryData {
    /// Depth of the leading edge of `bin`.
    pub fn bin_depth(&self, bin: usize) -> f32 {
        self.first_bin_range + self.bin_size * bin as f32
    }
}

/// Earth-referenced water velocity, bins x {east, north, vertical, error}.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EarthVelocity {
    pub velocities: Array2<f32>,
}

impl EarthVelocity {
    pub fn num_bins(&self) -> usize {
        self.velocities.nrows()
    }

    fn component(&self, bin: usize, column: usize) -> Option<f32> {
        self.velocities
            .get((bin, column))
            .copied()
            .filter(|value| !is_bad_value(*value))
    }

    /// Water speed in `bin`, `None` if any component is bad.
    pub fn magnitude(&self, bin: usize) -> Option<f32> {
        let east = self.component(bin, EAST)?;
        let north = self.component(bin, NORTH)?;
        let vertical = self.component(bin, VERTICAL)?;
        Some(VelocityMath::magnitude(east, north, vertical))
    }

    /// Water direction in `bin`, degrees clockwise from north.
    pub fn direction(&self, bin: usize) -> Option<f32> {
        let east = self.component(bin, EAST)?;
        let north = self.component(bin, NORTH)?;
        Some(VelocityMath::direction(east, north))
    }

    /// Number of bins whose east/north/vertical components are all good.
    pub fn good_bins(&self) -> usize {
        (0..self.num_bins())
            .filter(|bin| self.magnitude(*bin).is_some())
            .count()
    }

    /// Magnitude and direction of the velocity averaged over all good bins.
    pub fn average_mag_dir(&self) -> Option<(f32, f32)> {
        let mut sums = [0.0f32; 3];
        let mut count = 0usize;
        for bin in 0..self.num_bins() {
            if let (Some(east), Some(north), Some(vertical)) = (
                self.component(bin, EAST),
                self.component(bin, NORTH),
                self.component(bin, VERTICAL),
            ) {
                sums[0] += east;
                sums[1] += north;
                sums[2] += vertical;
                count += 1;
            }
        }
        if count == 0 {
            return None;
        }
        let n = count as f32;
        let (east, north, vertical) = (sums[0] / n, sums[1] / n, sums[2] / n);
        Some((
            VelocityMath::magnitude(east, north, vertical),
            VelocityMath::direction(east, north),
        ))
    }
}

/// Bottom-track record: vessel velocity over ground and per-beam range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BottomTrack {
    /// East, north, vertical, error.
    pub earth_velocity: [f32; 4],
    pub range: Vec<f32>,
}

impl BottomTrack {
    /// Mean of the good, non-zero beam ranges; 0.0 when no beam has a range.
    pub fn avg_range(&self) -> f32 {
        let good: Vec<f32> = self
            .range
            .iter()
            .copied()
            .filter(|value| !is_bad_value(*value) && *value > 0.0)
            .collect();
        if good.is_empty() {
            0.0
        } else {
            good.iter().sum::<f32>() / good.len() as f32
        }
    }

    /// Boat speed over ground.
    pub fn speed(&self) -> Option<f32> {
        let [east, north, vertical, _] = self.earth_velocity;
        if [east, north, vertical].iter().any(|v| is_bad_value(*v)) {
            return None;
        }
        Some(VelocityMath::magnitude(east, north, vertical))
    }

    /// Boat course over ground, degrees clockwise from north.
    pub fn course(&self) -> Option<f32> {
        let [east, north, _, _] = self.earth_velocity;
        if is_bad_value(east) || is_bad_value(north) {
            return None;
        }
        Some(VelocityMath::direction(east, north))
    }
}

/// GGA position fix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GgaFix {
    pub latitude: f64,
    pub longitude: f64,
    pub fix_quality: u8,
    pub num_sats: u8,
    pub hdop: f32,
}

/// Positioning data-set; the fix is absent when the receiver sent no GGA.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NmeaData {
    pub gga: Option<GgaFix>,
}

/// One decoded measurement frame. Every data-set is independently optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Ensemble {
    pub ensemble: Option<EnsembleData>,
    pub ancillary: Option<AncillaryData>,
    pub amplitude: Option<BeamMatrix>,
    pub correlation: Option<BeamMatrix>,
    pub earth_velocity: Option<EarthVelocity>,
    pub bottom_track: Option<BottomTrack>,
    pub nmea: Option<NmeaData>,
}

impl Ensemble {
    pub fn number(&self) -> Option<u32> {
        self.ensemble.as_ref().map(|data| data.ensemble_number)
    }

    pub fn num_bins(&self) -> usize {
        self.ensemble.as_ref().map_or(0, |data| data.num_bins)
    }

    /// The GGA fix, if the positioning data-set carried one.
    pub fn position(&self) -> Option<&GgaFix> {
        self.nmea.as_ref().and_then(|nmea| nmea.gga.as_ref())
    }
}
