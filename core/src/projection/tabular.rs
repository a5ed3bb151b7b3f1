use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::ensemble::Ensemble;
use crate::prelude::{Projection, Queryable};

/// Scalar fields derived from the latest ensemble at read time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnsembleSummary {
    pub ensemble_number: u32,
    pub date_time: String,
    pub num_bins: usize,
    pub pitch: Option<f32>,
    pub roll: Option<f32>,
    pub heading: Option<f32>,
    pub temperature: Option<f32>,
    pub pressure: Option<f32>,
    pub good_bins: Option<usize>,
    pub percent_bad_bins: Option<f32>,
    pub boat_speed: Option<f32>,
    pub boat_course: Option<f32>,
    pub water_speed: Option<f32>,
    pub water_dir: Option<f32>,
    pub calc_depth: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TabularSnapshot {
    pub num_ensembles: u64,
    pub lost_ensembles: u64,
    /// Seconds between the two most recent ensembles.
    pub delta_time: f64,
    pub latest: Option<EnsembleSummary>,
}

#[derive(Default)]
struct TabularState {
    latest: Option<Arc<Ensemble>>,
    num_ensembles: u64,
    lost_ensembles: u64,
    previous: Option<(u32, DateTime<Utc>)>,
    delta_time: f64,
}

fn summarize(ensemble: &Ensemble) -> Option<EnsembleSummary> {
    let data = ensemble.ensemble.as_ref()?;
    let ancillary = ensemble.ancillary.as_ref();
    let velocity = ensemble.earth_velocity.as_ref();
    let bottom_track = ensemble.bottom_track.as_ref();

    let good_bins = velocity.map(|vel| vel.good_bins());
    let percent_bad_bins = good_bins.filter(|_| data.num_bins > 0).map(|good| {
        100.0 * (data.num_bins.saturating_sub(good)) as f32 / data.num_bins as f32
    });
    let average = velocity.and_then(|vel| vel.average_mag_dir());

    Some(EnsembleSummary {
        ensemble_number: data.ensemble_number,
        date_time: data.timestamp.to_rfc3339(),
        num_bins: data.num_bins,
        pitch: ancillary.map(|anc| anc.pitch),
        roll: ancillary.map(|anc| anc.roll),
        heading: ancillary.map(|anc| anc.heading),
        temperature: ancillary.map(|anc| anc.water_temp),
        pressure: ancillary.map(|anc| anc.transducer_depth),
        good_bins,
        percent_bad_bins,
        boat_speed: bottom_track.and_then(|bt| bt.speed()),
        boat_course: bottom_track.and_then(|bt| bt.course()),
        water_speed: average.map(|(mag, _)| mag),
        water_dir: average.map(|(_, dir)| dir),
        calc_depth: bottom_track
            .map(|bt| bt.avg_range())
            .filter(|range| *range > 0.0),
    })
}

/// Keeps the most recent ensemble plus arrival counters.
#[derive(Default)]
pub struct TabularProjection {
    state: Mutex<TabularState>,
}

impl TabularProjection {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Projection for TabularProjection {
    fn name(&self) -> &'static str {
        "tabular"
    }

    fn set_ens(&self, ensemble: &Arc<Ensemble>) {
        let mut state = self.state.lock();
        if let Some(data) = ensemble.ensemble.as_ref() {
            if let Some((number, timestamp)) = state.previous {
                if data.ensemble_number > number.saturating_add(1) {
                    state.lost_ensembles += u64::from(data.ensemble_number - number - 1);
                }
                state.delta_time =
                    (data.timestamp - timestamp).num_milliseconds() as f64 / 1000.0;
            }
            state.previous = Some((data.ensemble_number, data.timestamp));
        }
        state.latest = Some(Arc::clone(ensemble));
        state.num_ensembles += 1;
    }

    fn reset(&self) {
        *self.state.lock() = TabularState::default();
    }
}

impl Queryable for TabularProjection {
    type Query = ();
    type Snapshot = TabularSnapshot;

    fn get_data(&self, _query: ()) -> TabularSnapshot {
        let state = self.state.lock();
        TabularSnapshot {
            num_ensembles: state.num_ensembles,
            lost_ensembles: state.lost_ensembles,
            delta_time: state.delta_time,
            latest: state.latest.as_deref().and_then(summarize),
        }
    }
}
