use anyhow::Context;
use doacore::interface::{MultilookSource, ProcessingInput};
use doacore::math::steering::{self, SPEED_OF_LIGHT};
use ndarray::{Array1, Array2, Array5};
use num_complex::Complex64;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// One synthetic plane-wave source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSpec {
    pub angle_deg: f64,
    pub power_db: f64,
}

impl Default for SourceSpec {
    fn default() -> Self {
        Self {
            angle_deg: 15.0,
            power_db: 0.0,
        }
    }
}

/// Configuration for generating a synthetic multichannel data cube: a
/// centered uniform linear array observing plane waves in additive
/// complex noise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub nchan: usize,
    pub nt: usize,
    pub nx: usize,
    pub nsub: usize,
    pub nbands: usize,
    pub carrier_freq_hz: f64,
    /// Element spacing as a multiple of the quarter wavelength (the
    /// half-wavelength equivalent for the two-way wavenumber).
    pub spacing_scale: f64,
    pub sources: Vec<SourceSpec>,
    pub noise_power: f64,
    pub seed: u64,
    pub time_start_s: f64,
    pub time_step_s: f64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            nchan: 8,
            nt: 32,
            nx: 16,
            nsub: 1,
            nbands: 1,
            carrier_freq_hz: 195e6,
            spacing_scale: 1.0,
            sources: vec![SourceSpec::default()],
            noise_power: 0.01,
            seed: 0,
            time_start_s: 2e-6,
            time_step_s: 1e-8,
        }
    }
}

/// Builds the engine input for one scene. Deterministic for a fixed seed.
pub fn build_processing_input(config: &SceneConfig) -> anyhow::Result<ProcessingInput> {
    if config.nchan == 0 || config.nt == 0 || config.nx == 0 {
        anyhow::bail!(
            "scene dimensions must be positive, got {}x{}x{} (nt x nx x nchan)",
            config.nt,
            config.nx,
            config.nchan
        );
    }
    let sample_count = config
        .nt
        .checked_mul(config.nx)
        .and_then(|n| n.checked_mul(config.nsub.max(1)))
        .and_then(|n| n.checked_mul(config.nbands.max(1)))
        .and_then(|n| n.checked_mul(config.nchan))
        .context("overflow computing sample count for scene generator")?;
    log::debug!("generating scene with {} complex samples", sample_count);

    let (nsub, nbands) = (config.nsub.max(1), config.nbands.max(1));
    let spacing = config.spacing_scale * SPEED_OF_LIGHT / config.carrier_freq_hz / 4.0;
    let y_row: Vec<f64> = (0..config.nchan)
        .map(|c| (c as f64 - (config.nchan as f64 - 1.0) / 2.0) * spacing)
        .collect();
    let mut y_positions = Array2::zeros((config.nx, config.nchan));
    let z_positions = Array2::zeros((config.nx, config.nchan));
    for x in 0..config.nx {
        for c in 0..config.nchan {
            y_positions[[x, c]] = y_row[c];
        }
    }

    let angles_rad: Vec<f64> = config
        .sources
        .iter()
        .map(|s| s.angle_deg.to_radians())
        .collect();
    let y_axis = Array1::from(y_row);
    let z_axis = Array1::zeros(config.nchan);
    let manifold = steering::generate(
        &angles_rad,
        config.carrier_freq_hz,
        y_axis.view(),
        z_axis.view(),
    );

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut samples = Array5::zeros((config.nt, config.nx, nsub, nbands, config.nchan));
    for t in 0..config.nt {
        for x in 0..config.nx {
            for sub in 0..nsub {
                for band in 0..nbands {
                    for (s, spec) in config.sources.iter().enumerate() {
                        let amplitude =
                            10f64.powf(spec.power_db / 20.0) * (config.nchan as f64).sqrt();
                        let phase = rng.gen::<f64>() * std::f64::consts::TAU;
                        let gain = Complex64::from_polar(amplitude, phase);
                        for c in 0..config.nchan {
                            samples[[t, x, sub, band, c]] += manifold[(c, s)] * gain;
                        }
                    }
                    for c in 0..config.nchan {
                        samples[[t, x, sub, band, c]] += Complex64::new(
                            config.noise_power * (rng.gen::<f64>() - 0.5),
                            config.noise_power * (rng.gen::<f64>() - 0.5),
                        );
                    }
                }
            }
        }
    }

    Ok(ProcessingInput {
        sources: vec![MultilookSource {
            samples,
            equalization: Array1::from_elem(config.nchan, Complex64::new(1.0, 0.0)),
            y_positions,
            z_positions,
        }],
        time: Array1::from_iter(
            (0..config.nt).map(|t| config.time_start_s + t as f64 * config.time_step_s),
        ),
        surface_twtt: None,
        layer_table: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_is_deterministic_for_a_fixed_seed() {
        let config = SceneConfig::default();
        let a = build_processing_input(&config).unwrap();
        let b = build_processing_input(&config).unwrap();
        assert_eq!(
            a.sources[0].samples[[3, 2, 0, 0, 1]],
            b.sources[0].samples[[3, 2, 0, 0, 1]]
        );
    }

    #[test]
    fn scene_shapes_follow_the_config() {
        let config = SceneConfig {
            nchan: 4,
            nt: 8,
            nx: 5,
            nsub: 2,
            nbands: 3,
            ..Default::default()
        };
        let input = build_processing_input(&config).unwrap();
        assert_eq!(input.sources[0].samples.shape(), [8, 5, 2, 3, 4]);
        assert_eq!(input.time.len(), 8);
        assert!(input.validate().is_ok());
    }

    #[test]
    fn empty_scene_is_rejected() {
        let config = SceneConfig {
            nchan: 0,
            ..Default::default()
        };
        assert!(build_processing_input(&config).is_err());
    }
}
