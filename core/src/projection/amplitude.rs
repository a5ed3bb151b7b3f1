use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::ensemble::{is_bad_value, Ensemble};
use crate::prelude::{Projection, Queryable};

const DEFAULT_BEAMS: usize = 4;

/// Latest amplitude profile, one array per beam indexed by bin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AmplitudeSnapshot {
    pub num_beams: usize,
    pub num_bins: usize,
    pub bin_numbers: Vec<usize>,
    /// `beams[beam][bin]`; `None` marks a bad sample.
    pub beams: Vec<Vec<Option<f32>>>,
    pub is_upward: bool,
    pub min_bin_depth: f32,
    pub max_bin_depth: f32,
}

impl Default for AmplitudeSnapshot {
    fn default() -> Self {
        Self {
            num_beams: DEFAULT_BEAMS,
            num_bins: 0,
            bin_numbers: Vec::new(),
            beams: vec![Vec::new(); DEFAULT_BEAMS],
            is_upward: false,
            min_bin_depth: 0.0,
            max_bin_depth: 0.0,
        }
    }
}

impl AmplitudeSnapshot {
    /// Reinitializes every per-bin array for a new geometry.
    fn reallocate(&mut self, num_bins: usize, num_beams: usize) {
        self.num_bins = num_bins;
        self.num_beams = num_beams;
        self.bin_numbers = (0..num_bins).collect();
        self.beams = vec![vec![None; num_bins]; num_beams];
    }
}

/// Amplitude-by-bin view: each update replaces the profile.
#[derive(Default)]
pub struct AmplitudeProjection {
    state: Mutex<AmplitudeSnapshot>,
}

impl AmplitudeProjection {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Projection for AmplitudeProjection {
    fn name(&self) -> &'static str {
        "amplitude"
    }

    fn set_ens(&self, ensemble: &Arc<Ensemble>) {
        let Some(data) = ensemble.ensemble.as_ref() else {
            return;
        };
        let mut state = self.state.lock();

        if state.num_bins != data.num_bins || state.num_beams != data.num_beams {
            state.reallocate(data.num_bins, data.num_beams);
        }

        if let Some(ancillary) = ensemble.ancillary.as_ref() {
            state.is_upward = ancillary.is_upward;
            state.min_bin_depth = ancillary.first_bin_range;
            state.max_bin_depth = ancillary.bin_depth(data.num_bins);
        }

        let Some(amplitude) = ensemble.amplitude.as_ref() else {
            return;
        };
        for bin in 0..state.num_bins {
            for beam in 0..state.num_beams {
                let value = amplitude
                    .get((bin, beam))
                    .copied()
                    .filter(|value| !is_bad_value(*value));
                state.beams[beam][bin] = value;
            }
        }
    }

    fn reset(&self) {
        *self.state.lock() = AmplitudeSnapshot::default();
    }
}

impl Queryable for AmplitudeProjection {
    type Query = ();
    type Snapshot = AmplitudeSnapshot;

    fn get_data(&self, _query: ()) -> AmplitudeSnapshot {
        self.state.lock().clone()
    }
}
