use chrono::{Duration, TimeZone, Utc};
use ndarray::Array2;

use crate::ensemble::model::{
    AncillaryData, BottomTrack, EarthVelocity, Ensemble, EnsembleData, GgaFix, NmeaData,
};

/// Fully populated ensemble with `bins` bins and four beams.
pub fn sample_ensemble(number: u32, bins: usize) -> Ensemble {
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    Ensemble {
        ensemble: Some(EnsembleData {
            ensemble_number: number,
            timestamp: start + Duration::seconds(i64::from(number)),
            num_bins: bins,
            num_beams: 4,
        }),
        ancillary: Some(AncillaryData {
            first_bin_range: 0.5,
            bin_size: 0.25,
            pitch: 1.5,
            roll: -0.5,
            heading: 90.0 + number as f32,
            water_temp: 14.0,
            transducer_depth: 0.3,
            is_upward: false,
        }),
        amplitude: Some(Array2::from_shape_fn((bins, 4), |(bin, beam)| {
            60.0 - bin as f32 + beam as f32
        })),
        correlation: Some(Array2::from_elem((bins, 4), 0.9)),
        earth_velocity: Some(EarthVelocity {
            velocities: Array2::from_shape_fn((bins, 4), |(_, col)| match col {
                0 => 0.3,
                1 => 0.4,
                _ => 0.0,
            }),
        }),
        bottom_track: Some(BottomTrack {
            earth_velocity: [1.0, 0.0, 0.0, 0.0],
            range: vec![4.0; 4],
        }),
        nmea: Some(NmeaData {
            gga: Some(GgaFix {
                latitude: 32.7 + f64::from(number) * 1e-4,
                longitude: -117.2,
                fix_quality: 1,
                num_sats: 9,
                hdop: 0.8,
            }),
        }),
    }
}

/// Ensemble carrying only the header data-set.
pub fn bare_ensemble(number: u32, bins: usize) -> Ensemble {
    Ensemble {
        ensemble: sample_ensemble(number, bins).ensemble,
        ..Default::default()
    }
}
