use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::ensemble::Ensemble;
use crate::math::geo::{destination, GeoPoint};
use crate::prelude::{Projection, Queryable};
use crate::projection::window::RollingWindow;

/// Metres of quiver length per m/s of average water speed.
pub const DEFAULT_MAG_SCALE: f64 = 20.0;
pub const DEFAULT_MAX_POINTS: usize = 5000;

/// Line from a track position toward the average water velocity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuiverSegment {
    pub start: GeoPoint,
    pub end: GeoPoint,
    pub magnitude: f32,
    pub direction: f32,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ShipTrackSnapshot {
    pub positions: Vec<GeoPoint>,
    pub quivers: Vec<QuiverSegment>,
    pub last_position: Option<GeoPoint>,
}

struct ShipTrackState {
    positions: RollingWindow<GeoPoint>,
    quivers: RollingWindow<QuiverSegment>,
    last_position: Option<GeoPoint>,
}

impl ShipTrackState {
    fn new(max_points: usize) -> Self {
        Self {
            positions: RollingWindow::with_capacity(max_points),
            quivers: RollingWindow::with_capacity(max_points),
            last_position: None,
        }
    }
}

/// Vessel track with water-velocity quivers.
pub struct ShipTrackProjection {
    state: Mutex<ShipTrackState>,
    mag_scale: f64,
    max_points: usize,
}

impl ShipTrackProjection {
    pub fn new() -> Self {
        Self::with_scale(DEFAULT_MAG_SCALE, DEFAULT_MAX_POINTS)
    }

    pub fn with_scale(mag_scale: f64, max_points: usize) -> Self {
        let max_points = max_points.max(1);
        Self {
            state: Mutex::new(ShipTrackState::new(max_points)),
            mag_scale,
            max_points,
        }
    }
}

impl Default for ShipTrackProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl Projection for ShipTrackProjection {
    fn name(&self) -> &'static str {
        "shiptrack"
    }

    fn set_ens(&self, ensemble: &Arc<Ensemble>) {
        let (Some(fix), Some(velocity)) = (ensemble.position(), ensemble.earth_velocity.as_ref())
        else {
            return;
        };
        let position = GeoPoint::new(fix.latitude, fix.longitude);
        let quiver = velocity.average_mag_dir().map(|(magnitude, direction)| {
            let end = destination(
                position,
                f64::from(magnitude) * self.mag_scale,
                f64::from(direction),
            );
            QuiverSegment {
                start: position,
                end,
                magnitude,
                direction,
                text: format!("Mag: {:.2} Dir: {:.2}", magnitude, direction),
            }
        });

        let mut state = self.state.lock();
        state.positions.push(position);
        state.last_position = Some(position);
        if let Some(quiver) = quiver {
            state.quivers.push(quiver);
        }
    }

    fn reset(&self) {
        *self.state.lock() = ShipTrackState::new(self.max_points);
    }
}

impl Queryable for ShipTrackProjection {
    type Query = ();
    type Snapshot = ShipTrackSnapshot;

    fn get_data(&self, _query: ()) -> ShipTrackSnapshot {
        let state = self.state.lock();
        ShipTrackSnapshot {
            positions: state.positions.to_vec(),
            quivers: state.quivers.to_vec(),
            last_position: state.last_position,
        }
    }
}
