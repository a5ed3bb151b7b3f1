use anyhow::Context;
use chrono::{DateTime, Duration, TimeZone, Utc};
use ndarray::Array2;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rivercore::ensemble::{
    AncillaryData, BottomTrack, EarthVelocity, Ensemble, EnsembleData, FrameCodec, GgaFix,
    NmeaData,
};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Configuration for generating a synthetic river transect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub count: usize,
    pub bins: usize,
    pub beams: usize,
    pub first_number: u32,
    pub interval_secs: i64,
    pub bin_size: f32,
    pub depth: f32,
    pub water_speed: f32,
    pub water_dir: f32,
    pub boat_speed: f32,
    pub start_latitude: f64,
    pub start_longitude: f64,
    pub noise: f32,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            count: 100,
            bins: 30,
            beams: 4,
            first_number: 1,
            interval_secs: 1,
            bin_size: 0.25,
            depth: 6.0,
            water_speed: 0.8,
            water_dir: 200.0,
            boat_speed: 1.2,
            start_latitude: 32.7157,
            start_longitude: -117.1611,
            noise: 0.05,
            seed: 0,
        }
    }
}

impl GeneratorConfig {
    fn normalized_bins(&self) -> usize {
        self.bins.max(1)
    }

    fn normalized_beams(&self) -> usize {
        self.beams.clamp(1, 4)
    }
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn jitter(rng: &mut StdRng, noise: f32) -> f32 {
    if noise > 0.0 {
        rng.gen_range(-noise..noise)
    } else {
        0.0
    }
}

/// Builds `config.count` ensembles crossing the river eastward while the
/// current flows along `water_dir`.
pub fn build_ensembles(config: &GeneratorConfig) -> Vec<Ensemble> {
    let bins = config.normalized_bins();
    let beams = config.normalized_beams();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let start = start_time();

    let (dir_sin, dir_cos) = config.water_dir.to_radians().sin_cos();
    // Metres of latitude per degree is close enough for a short transect.
    let metres_per_degree = 111_320.0;

    (0..config.count)
        .map(|index| {
            let number = config.first_number.saturating_add(index as u32);
            let elapsed = config.interval_secs * index as i64;
            let first_bin_range = 0.5;
            let valid_bins = ((config.depth - first_bin_range) / config.bin_size.max(0.01))
                .max(0.0) as usize;

            let mut velocities = Array2::<f32>::zeros((bins, 4));
            let mut amplitude = Array2::<f32>::zeros((bins, beams));
            let mut correlation = Array2::<f32>::zeros((bins, beams));
            for bin in 0..bins {
                let profile = 1.0 - 0.5 * (bin as f32 / bins as f32);
                let speed = config.water_speed * profile + jitter(&mut rng, config.noise);
                if bin < valid_bins {
                    velocities[(bin, 0)] = speed * dir_sin;
                    velocities[(bin, 1)] = speed * dir_cos;
                    velocities[(bin, 2)] = jitter(&mut rng, config.noise);
                    velocities[(bin, 3)] = jitter(&mut rng, config.noise);
                } else {
                    velocities.row_mut(bin).fill(rivercore::ensemble::BAD_VELOCITY);
                }
                for beam in 0..beams {
                    amplitude[(bin, beam)] =
                        (80.0 - 1.5 * bin as f32 + jitter(&mut rng, 2.0)).max(20.0);
                    correlation[(bin, beam)] = (0.95 - 0.01 * bin as f32).max(0.1);
                }
            }

            let east_offset_m = f64::from(config.boat_speed) * elapsed as f64;
            let latitude = config.start_latitude;
            let longitude = config.start_longitude
                + east_offset_m / (metres_per_degree * latitude.to_radians().cos());
            let depth = config.depth + jitter(&mut rng, config.noise);

            Ensemble {
                ensemble: Some(EnsembleData {
                    ensemble_number: number,
                    timestamp: start + Duration::seconds(elapsed),
                    num_bins: bins,
                    num_beams: beams,
                }),
                ancillary: Some(AncillaryData {
                    first_bin_range,
                    bin_size: config.bin_size,
                    pitch: jitter(&mut rng, 1.0),
                    roll: jitter(&mut rng, 1.0),
                    heading: 90.0 + jitter(&mut rng, 3.0),
                    water_temp: 15.0 + jitter(&mut rng, 0.2),
                    transducer_depth: 0.3,
                    is_upward: false,
                }),
                amplitude: Some(amplitude),
                correlation: Some(correlation),
                earth_velocity: Some(EarthVelocity { velocities }),
                bottom_track: Some(BottomTrack {
                    earth_velocity: [config.boat_speed, 0.0, 0.0, 0.0],
                    range: vec![depth; beams],
                }),
                nmea: Some(NmeaData {
                    gga: Some(GgaFix {
                        latitude,
                        longitude,
                        fix_quality: 1,
                        num_sats: 10,
                        hdop: 0.9,
                    }),
                }),
            }
        })
        .collect()
}

/// Writes a framed capture file and returns the number of ensembles written.
pub fn write_capture(path: &Path, config: &GeneratorConfig) -> anyhow::Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let codec = FrameCodec::new();

    let ensembles = build_ensembles(config);
    for ensemble in &ensembles {
        let frame = codec
            .encode(ensemble)
            .with_context(|| format!("encoding ensemble {:?}", ensemble.number()))?;
        writer
            .write_all(&frame)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(ensembles.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivercore::ensemble::CodecStream;
    use std::sync::Arc;

    #[test]
    fn generator_builds_sequential_ensembles() {
        let config = GeneratorConfig {
            count: 5,
            bins: 12,
            first_number: 40,
            ..Default::default()
        };
        let ensembles = build_ensembles(&config);
        assert_eq!(ensembles.len(), 5);
        let numbers: Vec<u32> = ensembles.iter().filter_map(Ensemble::number).collect();
        assert_eq!(numbers, vec![40, 41, 42, 43, 44]);
        assert_eq!(ensembles[0].num_bins(), 12);
        assert!(ensembles.iter().all(|e| e.position().is_some()));
    }

    #[test]
    fn bins_below_the_bottom_are_bad() {
        let config = GeneratorConfig {
            count: 1,
            bins: 40,
            depth: 3.0,
            noise: 0.0,
            ..Default::default()
        };
        let ensemble = &build_ensembles(&config)[0];
        let velocity = ensemble.earth_velocity.as_ref().unwrap();
        assert!(velocity.magnitude(0).is_some());
        assert!(velocity.magnitude(39).is_none());
        assert_eq!(velocity.good_bins(), 10);
    }

    #[test]
    fn same_seed_is_reproducible() {
        let config = GeneratorConfig {
            count: 3,
            seed: 7,
            ..Default::default()
        };
        assert_eq!(build_ensembles(&config), build_ensembles(&config));
    }

    #[test]
    fn capture_file_holds_one_frame_per_ensemble() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("capture.ens");
        let written = write_capture(&path, &GeneratorConfig {
            count: 4,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(written, 4);

        let bytes = fs::read(&path).unwrap();
        let mut stream = CodecStream::new(Arc::new(FrameCodec::new()));
        stream.feed(&bytes);
        assert_eq!(stream.decoded(), 4);
        assert_eq!(stream.rejected(), 0);
    }
}
