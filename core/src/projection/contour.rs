use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::ensemble::{AncillaryData, Ensemble};
use crate::prelude::{Projection, Queryable};
use crate::projection::window::RollingWindow;

pub const DEFAULT_MAX_COLUMNS: usize = 2000;

/// Which per-bin water-velocity quantity the grid shows.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContourKind {
    #[default]
    Magnitude,
    Direction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContourSnapshot {
    pub kind: ContourKind,
    pub num_beams: usize,
    pub num_bins: usize,
    pub columns: usize,
    pub bin_numbers: Vec<usize>,
    /// `contour[bin][column]`; `None` marks a bad or missing sample.
    pub contour: Vec<Vec<Option<f32>>>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub bt_range: Vec<Option<f32>>,
    pub bt_range_to_bin: Vec<Option<f32>>,
    pub last_bin_range: Vec<Option<f32>>,
    pub is_upward: bool,
    pub min_bin_depth: f32,
    pub max_bin_depth: f32,
}

#[derive(Debug, Clone)]
struct ContourState {
    num_beams: usize,
    num_bins: usize,
    max_columns: usize,
    magnitude: Vec<RollingWindow<Option<f32>>>,
    direction: Vec<RollingWindow<Option<f32>>>,
    timestamps: RollingWindow<DateTime<Utc>>,
    bt_range: RollingWindow<Option<f32>>,
    bt_range_to_bin: RollingWindow<Option<f32>>,
    last_bin_range: RollingWindow<Option<f32>>,
    is_upward: bool,
    min_bin_depth: f32,
    max_bin_depth: f32,
}

impl ContourState {
    fn new(max_columns: usize) -> Self {
        Self {
            num_beams: 4,
            num_bins: 0,
            max_columns,
            magnitude: Vec::new(),
            direction: Vec::new(),
            timestamps: RollingWindow::with_capacity(max_columns),
            bt_range: RollingWindow::with_capacity(max_columns),
            bt_range_to_bin: RollingWindow::with_capacity(max_columns),
            last_bin_range: RollingWindow::with_capacity(max_columns),
            is_upward: false,
            min_bin_depth: 0.0,
            max_bin_depth: 0.0,
        }
    }

    /// A new bin count invalidates every existing column.
    fn reallocate(&mut self, num_bins: usize) {
        let mut fresh = Self::new(self.max_columns);
        fresh.num_beams = self.num_beams;
        fresh.num_bins = num_bins;
        fresh.magnitude = vec![RollingWindow::with_capacity(self.max_columns); num_bins];
        fresh.direction = vec![RollingWindow::with_capacity(self.max_columns); num_bins];
        *self = fresh;
    }

    fn columns(&self) -> usize {
        self.timestamps.len()
    }
}

/// Bottom-track range expressed as the nearest bin index.
fn range_to_bin(range: f32, ancillary: &AncillaryData) -> Option<f32> {
    if ancillary.bin_size <= 0.0 {
        return None;
    }
    Some(((range - ancillary.first_bin_range) / ancillary.bin_size).round())
}

/// Bin x time grid of water velocity with a bottom-track trace.
pub struct ContourProjection {
    state: Mutex<ContourState>,
}

impl ContourProjection {
    pub fn new() -> Self {
        Self::with_max_columns(DEFAULT_MAX_COLUMNS)
    }

    pub fn with_max_columns(max_columns: usize) -> Self {
        Self {
            state: Mutex::new(ContourState::new(max_columns.max(1))),
        }
    }
}

impl Default for ContourProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl Projection for ContourProjection {
    fn name(&self) -> &'static str {
        "contour"
    }

    fn set_ens(&self, ensemble: &Arc<Ensemble>) {
        let Some(data) = ensemble.ensemble.as_ref() else {
            return;
        };
        let ancillary = ensemble.ancillary.as_ref();
        let mut state = self.state.lock();

        state.num_beams = data.num_beams;
        if state.num_bins != data.num_bins {
            state.reallocate(data.num_bins);
        }
        if let Some(ancillary) = ancillary {
            state.is_upward = ancillary.is_upward;
            state.min_bin_depth = ancillary.bin_depth(0);
            state.max_bin_depth = ancillary.bin_depth(data.num_bins);
        }

        let velocity = ensemble.earth_velocity.as_ref();
        for bin in 0..state.num_bins {
            let magnitude = velocity.and_then(|vel| vel.magnitude(bin));
            let direction = velocity.and_then(|vel| vel.direction(bin));
            state.magnitude[bin].push(magnitude);
            state.direction[bin].push(direction);
        }

        let (bt_range, bt_bin) = match ensemble.bottom_track.as_ref() {
            Some(bottom_track) => {
                let range = bottom_track.avg_range();
                if range == 0.0 {
                    (None, None)
                } else {
                    (Some(range), ancillary.and_then(|anc| range_to_bin(range, anc)))
                }
            }
            None => (None, None),
        };
        state.bt_range.push(bt_range);
        state.bt_range_to_bin.push(bt_bin);
        state
            .last_bin_range
            .push(ancillary.map(|anc| anc.bin_depth(data.num_bins)));
        state.timestamps.push(data.timestamp);
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        *state = ContourState::new(state.max_columns);
    }
}

impl Queryable for ContourProjection {
    type Query = ContourKind;
    type Snapshot = ContourSnapshot;

    fn get_data(&self, kind: ContourKind) -> ContourSnapshot {
        let state = self.state.lock();
        let rows = match kind {
            ContourKind::Magnitude => &state.magnitude,
            ContourKind::Direction => &state.direction,
        };
        ContourSnapshot {
            kind,
            num_beams: state.num_beams,
            num_bins: state.num_bins,
            columns: state.columns(),
            bin_numbers: (0..state.num_bins).collect(),
            contour: rows.iter().map(RollingWindow::to_vec).collect(),
            timestamps: state.timestamps.to_vec(),
            bt_range: state.bt_range.to_vec(),
            bt_range_to_bin: state.bt_range_to_bin.to_vec(),
            last_bin_range: state.last_bin_range.to_vec(),
            is_upward: state.is_upward,
            min_bin_depth: state.min_bin_depth,
            max_bin_depth: state.max_bin_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::fixtures::{bare_ensemble, sample_ensemble};
    use crate::ensemble::BAD_VELOCITY;

    #[test]
    fn every_ensemble_appends_one_column() {
        let projection = ContourProjection::new();
        projection.set_ens(&Arc::new(sample_ensemble(1, 3)));
        projection.set_ens(&Arc::new(bare_ensemble(2, 3)));

        let snapshot = projection.get_data(ContourKind::Magnitude);
        assert_eq!(snapshot.columns, 2);
        assert!(snapshot.contour.iter().all(|row| row.len() == 2));
        let first = snapshot.contour[0][0].unwrap();
        assert!((first - 0.5).abs() < 1e-6);
        assert_eq!(snapshot.contour[0][1], None);
        assert_eq!(snapshot.bt_range.len(), 2);
        assert_eq!(snapshot.bt_range[1], None);
    }

    #[test]
    fn bad_velocity_is_invalid_not_zero() {
        let mut ensemble = sample_ensemble(1, 2);
        if let Some(vel) = ensemble.earth_velocity.as_mut() {
            vel.velocities[(1, 0)] = BAD_VELOCITY;
        }
        let projection = ContourProjection::new();
        projection.set_ens(&Arc::new(ensemble));

        let snapshot = projection.get_data(ContourKind::Magnitude);
        assert_eq!(snapshot.contour[1], vec![None]);
        let direction = projection.get_data(ContourKind::Direction);
        assert!(direction.contour[0][0].is_some());
    }

    #[test]
    fn bottom_track_range_maps_to_bin_index() {
        let projection = ContourProjection::new();
        projection.set_ens(&Arc::new(sample_ensemble(1, 20)));

        let snapshot = projection.get_data(ContourKind::Magnitude);
        // (4.0 - 0.5) / 0.25 = 14
        assert_eq!(snapshot.bt_range, vec![Some(4.0)]);
        assert_eq!(snapshot.bt_range_to_bin, vec![Some(14.0)]);
        assert_eq!(snapshot.last_bin_range, vec![Some(5.5)]);
    }

    #[test]
    fn zero_range_is_rejected() {
        let mut ensemble = sample_ensemble(1, 4);
        if let Some(bt) = ensemble.bottom_track.as_mut() {
            bt.range = vec![0.0; 4];
        }
        let projection = ContourProjection::new();
        projection.set_ens(&Arc::new(ensemble));

        let snapshot = projection.get_data(ContourKind::Magnitude);
        assert_eq!(snapshot.bt_range, vec![None]);
        assert_eq!(snapshot.bt_range_to_bin, vec![None]);
    }

    #[test]
    fn history_is_bounded_and_bin_change_clears() {
        let projection = ContourProjection::with_max_columns(3);
        for n in 0..5 {
            projection.set_ens(&Arc::new(sample_ensemble(n, 2)));
        }
        let snapshot = projection.get_data(ContourKind::Magnitude);
        assert_eq!(snapshot.columns, 3);
        assert_eq!(snapshot.timestamps.len(), 3);

        projection.set_ens(&Arc::new(sample_ensemble(9, 6)));
        let snapshot = projection.get_data(ContourKind::Magnitude);
        assert_eq!(snapshot.num_bins, 6);
        assert_eq!(snapshot.columns, 1);
        assert_eq!(snapshot.contour.len(), 6);
    }

    #[test]
    fn reset_clears_grid() {
        let projection = ContourProjection::new();
        projection.set_ens(&Arc::new(sample_ensemble(1, 4)));
        projection.reset();

        let snapshot = projection.get_data(ContourKind::Magnitude);
        assert_eq!(snapshot.num_bins, 0);
        assert_eq!(snapshot.columns, 0);
        assert!(snapshot.contour.is_empty());
        assert!(snapshot.timestamps.is_empty());
    }
}
