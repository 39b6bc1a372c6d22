use serde::{Deserialize, Serialize};

use crate::interface::ProcessingInput;
use crate::math::window::Window;
use crate::{ProcError, ProcResult};

/// Convergence budget for the constrained DOA minimizer. There is no
/// wall-clock cancellation; the sweep count bounds the work.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerOptions {
    pub tolerance_rad: f64,
    pub max_sweeps: usize,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            tolerance_rad: 1e-4,
            max_sweeps: 30,
        }
    }
}

/// DOA initialization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Initializer {
    /// Exhaustive search over valid angle-grid combinations.
    GridSearch,
    /// One source at a time with guard-band exclusion and quadratic refinement.
    AlternatingProjection,
}

/// Sequential MLE: the previous bin's angles, extrapolated flat-earth,
/// tighten the search bounds and add a Gaussian prior to the cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SequentialParams {
    pub half_width_rad: f64,
    pub prior_sigma_rad: f64,
}

/// Estimator family. Each variant carries only the parameters its
/// algorithm needs; dispatch is by pattern match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Method {
    Periodogram {
        window: Window,
    },
    Mvdr {
        diagonal_load: f64,
    },
    MvdrRobust {
        diagonal_load: f64,
        mismatch_fraction: f64,
    },
    Music,
    Risr {
        iterations: usize,
        diagonal_load: f64,
    },
    MusicDoa {
        optimizer: OptimizerOptions,
    },
    Mle {
        initializer: Initializer,
        optimizer: OptimizerOptions,
        sequential: Option<SequentialParams>,
    },
    WidebandDcm {
        taps: usize,
        registration_support: usize,
        optimizer: OptimizerOptions,
    },
    WidebandMle {
        subbands: usize,
        initializer: Initializer,
        optimizer: OptimizerOptions,
    },
    /// Legacy eigenvector weighting path. Not production-ready; selecting it
    /// is a fatal configuration error because no safe fallback exists.
    Eig,
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::Periodogram { .. } => "periodogram",
            Method::Mvdr { .. } => "mvdr",
            Method::MvdrRobust { .. } => "mvdr-robust",
            Method::Music => "music",
            Method::Risr { .. } => "risr",
            Method::MusicDoa { .. } => "music-doa",
            Method::Mle { .. } => "mle",
            Method::WidebandDcm { .. } => "wideband-dcm",
            Method::WidebandMle { .. } => "wideband-mle",
            Method::Eig => "eig",
        }
    }

    /// Parametric estimators produce per-source angle records; the rest
    /// produce a per-angle power spectrum.
    pub fn is_parametric(&self) -> bool {
        matches!(
            self,
            Method::MusicDoa { .. }
                | Method::Mle { .. }
                | Method::WidebandDcm { .. }
                | Method::WidebandMle { .. }
        )
    }

    fn needs_sources(&self) -> bool {
        matches!(self, Method::Music) || self.is_parametric()
    }
}

/// How one source's angle bounds are centered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintMethod {
    /// Symmetric configured limits about broadside.
    Fixed,
    /// Centered on the incidence angle implied by the surface round-trip
    /// time at the current range bin, negative-angle side.
    SurfaceLeft,
    SurfaceRight,
    /// Centered on the incidence angle interpolated from the layered-media
    /// delay table, negative-angle side.
    LayerLeft,
    LayerRight,
}

/// Per-source DOA constraint with separate initialization and optimization
/// half-widths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoaConstraint {
    pub method: ConstraintMethod,
    pub init_half_width_rad: f64,
    pub opt_half_width_rad: f64,
}

/// Model-order selection criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCriterion {
    Threshold,
    Aic,
    Mdl,
    Hq,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelOrderParams {
    pub criterion: OrderCriterion,
    /// Eigenvalue threshold above the noise floor, dB, for the simple test.
    pub threshold_db: f64,
    /// Retain every criterion's answer for offline comparison.
    pub log_all: bool,
}

/// User-supplied partial configuration. `resolve` validates it against the
/// input cube and freezes it into a [`ResolvedConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrayParams {
    pub method: Method,
    /// Symmetric fast-time neighborhood offsets, (lo, hi) with lo == -hi.
    pub bin_rng: (i64, i64),
    /// Symmetric along-track neighborhood offsets.
    pub line_rng: (i64, i64),
    /// Covariance-estimation neighborhood when it differs from the
    /// multilook-averaging neighborhood (two-stage MVDR).
    pub cov_bin_rng: Option<(i64, i64)>,
    pub cov_line_rng: Option<(i64, i64)>,
    pub dbin: usize,
    pub dline: usize,
    pub nsrc: usize,
    /// Steering-vector grid size.
    pub nsv: usize,
    /// Steering aperture half-angle; the grid is uniform in sine space
    /// over +/- sin(max_angle).
    pub max_angle_deg: f64,
    /// Angle-of-interest range for the image reduction; defaults to the
    /// whole grid.
    pub theta_rng_deg: Option<(f64, f64)>,
    pub doa_constraints: Vec<DoaConstraint>,
    /// Minimum angular separation guard between estimated sources.
    pub min_separation_rad: f64,
    pub tomography: bool,
    /// Bucket recovered DOAs by sign of the angle (left/right of nadir)
    /// instead of by source index.
    pub left_right_split: bool,
    pub model_order: Option<ModelOrderParams>,
    /// Explicit output lines for seamless stitching of adjacent chunks;
    /// overrides the full-support rule along track.
    pub output_lines: Option<Vec<usize>>,
    /// Restrict processing to a fast-time window of the output bins.
    pub bin_restriction: Option<(usize, usize)>,
    pub carrier_freq_hz: f64,
    /// Pixels with fewer valid snapshots than this degrade to NaN.
    pub min_snapshots: usize,
}

impl Default for ArrayParams {
    fn default() -> Self {
        Self {
            method: Method::Periodogram {
                window: Window::Hann,
            },
            bin_rng: (-1, 1),
            line_rng: (-5, 5),
            cov_bin_rng: None,
            cov_line_rng: None,
            dbin: 1,
            dline: 1,
            nsrc: 1,
            nsv: 64,
            max_angle_deg: 90.0,
            theta_rng_deg: None,
            doa_constraints: Vec::new(),
            min_separation_rad: 0.5f64.to_radians(),
            tomography: false,
            left_right_split: false,
            model_order: None,
            output_lines: None,
            bin_restriction: None,
            carrier_freq_hz: 195e6,
            min_snapshots: 1,
        }
    }
}

/// Frozen configuration: built once per invocation, read-only thereafter.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub method: Method,
    pub bin_rng: (i64, i64),
    pub line_rng: (i64, i64),
    pub cov_bin_rng: (i64, i64),
    pub cov_line_rng: (i64, i64),
    /// True when the covariance neighborhood differs from the multilook one.
    pub two_stage: bool,
    pub nsrc: usize,
    /// Steering grid, radians, ascending, uniform in sine space.
    pub sv_angles: Vec<f64>,
    pub theta_rng_rad: Option<(f64, f64)>,
    pub doa_constraints: Vec<DoaConstraint>,
    pub min_separation_rad: f64,
    pub tomography: bool,
    pub left_right_split: bool,
    pub model_order: Option<ModelOrderParams>,
    pub output_bins: Vec<usize>,
    pub output_lines: Vec<usize>,
    pub carrier_freq_hz: f64,
    pub min_snapshots: usize,
    pub nchan: usize,
    pub nt: usize,
    pub nx: usize,
}

fn check_symmetric(name: &str, rng: (i64, i64)) -> ProcResult<()> {
    if rng.0 != -rng.1 || rng.1 < 0 {
        return Err(ProcError::InvalidConfig(format!(
            "{} must be symmetric about zero, got ({}, {})",
            name, rng.0, rng.1
        )));
    }
    Ok(())
}

/// Coordinates with full neighborhood support under the decimation stride.
fn supported_indices(n: usize, half: usize, stride: usize) -> Vec<usize> {
    if n < 2 * half + 1 {
        return Vec::new();
    }
    (half..n - half).step_by(stride).collect()
}

impl ArrayParams {
    /// Validates everything tunable and freezes the configuration. Fatal
    /// errors surface here, before any data processing begins.
    pub fn resolve(&self, input: &ProcessingInput) -> ProcResult<ResolvedConfig> {
        let (nt, nx, nchan) = input.validate()?;

        if let Method::Eig = self.method {
            return Err(ProcError::UnsupportedMethod(
                "eig: legacy eigenvector weighting is not production-ready".into(),
            ));
        }
        check_symmetric("bin_rng", self.bin_rng)?;
        check_symmetric("line_rng", self.line_rng)?;
        if let Some(rng) = self.cov_bin_rng {
            check_symmetric("cov_bin_rng", rng)?;
        }
        if let Some(rng) = self.cov_line_rng {
            check_symmetric("cov_line_rng", rng)?;
        }
        if self.dbin == 0 || self.dline == 0 {
            return Err(ProcError::InvalidConfig("decimation must be >= 1".into()));
        }
        if self.nsv == 0 {
            return Err(ProcError::InvalidConfig("nsv must be >= 1".into()));
        }
        if !(self.carrier_freq_hz > 0.0) {
            return Err(ProcError::InvalidConfig(format!(
                "carrier frequency must be positive, got {}",
                self.carrier_freq_hz
            )));
        }
        if !(self.max_angle_deg > 0.0 && self.max_angle_deg <= 90.0) {
            return Err(ProcError::InvalidConfig(format!(
                "steering aperture must lie in (0, 90] degrees, got {}",
                self.max_angle_deg
            )));
        }
        if self.min_separation_rad < 0.0 {
            return Err(ProcError::InvalidConfig(
                "minimum angular separation must be non-negative".into(),
            ));
        }
        if let Some((lo, hi)) = self.theta_rng_deg {
            if lo > hi {
                return Err(ProcError::InvalidConfig(format!(
                    "theta_rng lower bound {} exceeds upper bound {}",
                    lo, hi
                )));
            }
        }
        if self.method.needs_sources() {
            if self.nsrc == 0 {
                return Err(ProcError::InvalidConfig(format!(
                    "{} requires nsrc >= 1",
                    self.method.name()
                )));
            }
            if self.nsrc >= nchan {
                return Err(ProcError::InvalidConfig(format!(
                    "{} requires nsrc < nchan ({} >= {})",
                    self.method.name(),
                    self.nsrc,
                    nchan
                )));
            }
        }
        match &self.method {
            Method::Risr { iterations, .. } if *iterations == 0 => {
                return Err(ProcError::InvalidConfig(
                    "risr requires at least one iteration".into(),
                ));
            }
            Method::WidebandDcm { taps, .. } if *taps < 2 => {
                return Err(ProcError::InvalidConfig(
                    "wideband-dcm requires at least two fast-time taps".into(),
                ));
            }
            Method::WidebandMle { subbands, .. } if *subbands < 2 => {
                return Err(ProcError::InvalidConfig(
                    "wideband-mle requires at least two subbands".into(),
                ));
            }
            _ => {}
        }

        // Per-source constraints: default to fixed bounds spanning the
        // steering aperture when the caller supplied none.
        let max_angle_rad = self.max_angle_deg.to_radians();
        let mut constraints = self.doa_constraints.clone();
        if self.method.is_parametric() {
            while constraints.len() < self.nsrc {
                constraints.push(DoaConstraint {
                    method: ConstraintMethod::Fixed,
                    init_half_width_rad: max_angle_rad,
                    opt_half_width_rad: max_angle_rad,
                });
            }
            constraints.truncate(self.nsrc);
            for constraint in &constraints {
                let needs_surface = matches!(
                    constraint.method,
                    ConstraintMethod::SurfaceLeft | ConstraintMethod::SurfaceRight
                );
                let needs_layer = matches!(
                    constraint.method,
                    ConstraintMethod::LayerLeft | ConstraintMethod::LayerRight
                );
                if needs_surface && input.surface_twtt.is_none() {
                    return Err(ProcError::InvalidConfig(
                        "surface constraint selected but no surface reference supplied".into(),
                    ));
                }
                if needs_layer && input.layer_table.is_none() {
                    return Err(ProcError::InvalidConfig(
                        "layer constraint selected but no delay table supplied".into(),
                    ));
                }
            }
        }

        let output_bins = supported_indices(nt, self.bin_rng.1 as usize, self.dbin);
        if output_bins.is_empty() {
            return Err(ProcError::InvalidConfig(format!(
                "bin_rng ({}, {}) leaves no fully supported output bins in {} range bins",
                self.bin_rng.0, self.bin_rng.1, nt
            )));
        }
        let output_lines = match &self.output_lines {
            Some(lines) => {
                if let Some(&bad) = lines.iter().find(|&&l| l >= nx) {
                    return Err(ProcError::InvalidConfig(format!(
                        "explicit output line {} outside {} along-track lines",
                        bad, nx
                    )));
                }
                lines.clone()
            }
            None => {
                let lines = supported_indices(nx, self.line_rng.1 as usize, self.dline);
                if lines.is_empty() {
                    return Err(ProcError::InvalidConfig(format!(
                        "line_rng ({}, {}) leaves no fully supported output lines in {} lines",
                        self.line_rng.0, self.line_rng.1, nx
                    )));
                }
                lines
            }
        };

        // Uniform sampling in sine space across the aperture.
        let sv_angles: Vec<f64> = if self.nsv == 1 {
            vec![0.0]
        } else {
            let smax = max_angle_rad.sin();
            (0..self.nsv)
                .map(|i| {
                    let s = -smax + 2.0 * smax * i as f64 / (self.nsv - 1) as f64;
                    s.clamp(-1.0, 1.0).asin()
                })
                .collect()
        };

        Ok(ResolvedConfig {
            method: self.method.clone(),
            bin_rng: self.bin_rng,
            line_rng: self.line_rng,
            cov_bin_rng: self.cov_bin_rng.unwrap_or(self.bin_rng),
            cov_line_rng: self.cov_line_rng.unwrap_or(self.line_rng),
            two_stage: self.cov_bin_rng.is_some() || self.cov_line_rng.is_some(),
            nsrc: self.nsrc,
            sv_angles,
            theta_rng_rad: self
                .theta_rng_deg
                .map(|(lo, hi)| (lo.to_radians(), hi.to_radians())),
            doa_constraints: constraints,
            min_separation_rad: self.min_separation_rad,
            tomography: self.tomography,
            left_right_split: self.left_right_split,
            model_order: self.model_order,
            output_bins,
            output_lines,
            carrier_freq_hz: self.carrier_freq_hz,
            min_snapshots: self.min_snapshots.max(1),
            nchan,
            nt,
            nx,
        })
    }
}

impl ResolvedConfig {
    /// Output bins surviving the optional fast-time restriction mask.
    pub fn restricted_bins<'a>(
        &'a self,
        restriction: &Option<(usize, usize)>,
    ) -> impl Iterator<Item = (usize, usize)> + 'a {
        let window = *restriction;
        self.output_bins
            .iter()
            .copied()
            .enumerate()
            .filter(move |&(_, bin)| match window {
                Some((lo, hi)) => bin >= lo && bin <= hi,
                None => true,
            })
    }
}
