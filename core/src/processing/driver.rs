use nalgebra::DMatrix;
use num_complex::Complex64;

use crate::config::{ArrayParams, Initializer, Method, ResolvedConfig};
use crate::interface::{
    ImageOutput, ModelOrderLog, ProcessingInput, ProcessorOutput, Tomography,
};
use crate::math::fft::FftHelper;
use crate::math::{linalg, steering};
use crate::processing::doa::{
    self, BoundContext, CostTerm, DoaOutcome, GaussianPrior, MusicCost, ProjectionCost,
    SteeringGeom, TermSteering,
};
use crate::processing::snapshot::{self, Neighborhood};
use crate::processing::{beamform, model_order, SnapshotPool};
use crate::telemetry::{LogManager, PixelMetrics};
use crate::{ProcError, ProcResult};

/// State threaded along the bin axis for sequential MLE: the previous
/// bin's angles and round-trip time. Scoped to one line of one
/// invocation, never module state.
type SequentialState = Option<(Vec<f64>, f64)>;

enum PixelOutcome {
    Spectrum {
        spectrum: Vec<f64>,
        value: f64,
    },
    Sources {
        outcome: DoaOutcome,
        orders: Option<[usize; 4]>,
    },
}

/// Pixel/Line driver: iterates output range-lines and range-bins,
/// handles neighborhood edge truncation, dispatches to the selected
/// estimator and assembles the output image and optional tomography
/// record. Numerical failures degrade single pixels to NaN; processing
/// continues.
pub struct ArrayProcessor {
    config: ResolvedConfig,
    bin_restriction: Option<(usize, usize)>,
    logger: LogManager,
}

impl ArrayProcessor {
    /// Resolves and freezes the configuration against the input cube.
    /// Every fatal configuration error surfaces here.
    pub fn new(params: &ArrayParams, input: &ProcessingInput) -> ProcResult<Self> {
        let config = params.resolve(input)?;
        Ok(Self {
            config,
            bin_restriction: params.bin_restriction,
            logger: LogManager::new(),
        })
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn run(&self, input: &ProcessingInput) -> ProcResult<ProcessorOutput> {
        let cfg = &self.config;
        let dims = input.validate()?;
        if dims != (cfg.nt, cfg.nx, cfg.nchan) {
            return Err(ProcError::DimensionMismatch(
                "input cube changed since configuration resolution".into(),
            ));
        }

        let nt_out = cfg.output_bins.len();
        let nx_out = cfg.output_lines.len();
        let second_dim = if cfg.method.is_parametric() {
            if cfg.left_right_split {
                2
            } else {
                cfg.nsrc
            }
        } else {
            cfg.sv_angles.len()
        };

        let mut image = ImageOutput::new(cfg.output_bins.clone(), cfg.output_lines.clone());
        let mut tomography = cfg
            .tomography
            .then(|| Tomography::new(nt_out, second_dim, nx_out));
        let mut order_log = match cfg.model_order {
            Some(params) if params.log_all && cfg.method.is_parametric() => Some(
                ModelOrderLog::new(nt_out, model_order::CRITERIA.to_vec(), nx_out),
            ),
            _ => None,
        };

        let metrics = PixelMetrics::new();
        let mut pool = SnapshotPool::with_capacity(input.sources.len() + 2);
        let dt = if input.time.len() > 1 {
            input.time[1] - input.time[0]
        } else {
            0.0
        };
        let fft = match &cfg.method {
            Method::WidebandMle { subbands, .. } => Some(FftHelper::new(*subbands)),
            _ => None,
        };

        for (li, &line) in cfg.output_lines.iter().enumerate() {
            // Sensor positions vary slowly along track: one steering table
            // per multilook source serves every bin in this line.
            let tables: Vec<DMatrix<Complex64>> = input
                .sources
                .iter()
                .map(|source| {
                    steering::generate(
                        &cfg.sv_angles,
                        cfg.carrier_freq_hz,
                        source.y_positions.row(line),
                        source.z_positions.row(line),
                    )
                })
                .collect();

            let mut sequential: SequentialState = None;
            for (bi, bin) in cfg.restricted_bins(&self.bin_restriction) {
                let result = self.process_pixel(
                    input,
                    &tables,
                    bin,
                    line,
                    dt,
                    fft.as_ref(),
                    &mut pool,
                    &mut sequential,
                );
                match result {
                    Ok(PixelOutcome::Spectrum { spectrum, value }) => {
                        image.power[[bi, li]] = value;
                        if let Some(tomo) = tomography.as_mut() {
                            for (a, &power) in spectrum.iter().enumerate() {
                                tomo.angle_rad[[bi, a, li]] = cfg.sv_angles[a];
                                tomo.power[[bi, a, li]] = power;
                            }
                        }
                        metrics.record_estimated();
                    }
                    Ok(PixelOutcome::Sources { outcome, orders }) => {
                        image.power[[bi, li]] = outcome
                            .powers
                            .iter()
                            .copied()
                            .fold(f64::NEG_INFINITY, f64::max);
                        if let Some(tomo) = tomography.as_mut() {
                            self.write_sources(tomo, bi, li, &outcome);
                        }
                        if let (Some(log), Some(orders)) = (order_log.as_mut(), orders) {
                            for (c, &order) in orders.iter().enumerate() {
                                log.orders[[bi, c, li]] = order;
                            }
                        }
                        metrics.record_estimated();
                    }
                    Err(ProcError::Degenerate(reason)) => {
                        self.logger.record_degenerate(bin, line, &reason);
                        metrics.record_degenerate();
                        sequential = None;
                    }
                    Err(fatal) => return Err(fatal),
                }
            }
            self.logger.record_line(line, nt_out);
        }

        let counts = metrics.snapshot();
        self.logger.record(&format!(
            "{}: {} pixels estimated, {} degenerate",
            cfg.method.name(),
            counts.estimated,
            counts.degenerate
        ));
        Ok(ProcessorOutput {
            image,
            tomography,
            model_order_log: order_log,
            estimated_pixels: counts.estimated,
            degenerate_pixels: counts.degenerate,
        })
    }

    /// Sources land in the tomography record either by index (ascending
    /// angle) or, in side-split mode, bucketed by sign of the angle with
    /// the stronger source winning each side.
    fn write_sources(&self, tomo: &mut Tomography, bi: usize, li: usize, outcome: &DoaOutcome) {
        tomo.cost[[bi, li]] = outcome.cost;
        if self.config.left_right_split {
            for s in 0..outcome.angles.len() {
                let slot = usize::from(outcome.angles[s] >= 0.0);
                let current = tomo.power[[bi, slot, li]];
                if current.is_nan() || outcome.powers[s] > current {
                    tomo.angle_rad[[bi, slot, li]] = outcome.angles[s];
                    tomo.power[[bi, slot, li]] = outcome.powers[s];
                    tomo.hessian[[bi, slot, li]] = outcome.hessian[s];
                }
            }
        } else {
            for s in 0..outcome.angles.len() {
                tomo.angle_rad[[bi, s, li]] = outcome.angles[s];
                tomo.power[[bi, s, li]] = outcome.powers[s];
                tomo.hessian[[bi, s, li]] = outcome.hessian[s];
            }
        }
    }

    fn extract_all(
        &self,
        input: &ProcessingInput,
        bin: usize,
        line: usize,
        bin_rng: (i64, i64),
        line_rng: (i64, i64),
        taper: Option<&[f64]>,
        pool: &mut SnapshotPool,
    ) -> ProcResult<Vec<DMatrix<Complex64>>> {
        let cfg = &self.config;
        let hood = Neighborhood::clip(bin, line, bin_rng, line_rng, cfg.nt, cfg.nx);
        input
            .sources
            .iter()
            .map(|source| snapshot::extract(source, &hood, taper, pool))
            .collect()
    }

    fn check_support(&self, snapshots: &[DMatrix<Complex64>]) -> ProcResult<usize> {
        let nsnap = snapshots.first().map_or(0, |s| s.ncols());
        if nsnap < self.config.min_snapshots {
            return Err(ProcError::Degenerate(format!(
                "{} snapshots below the minimum support of {}",
                nsnap, self.config.min_snapshots
            )));
        }
        Ok(nsnap)
    }

    fn spectrum_outcome(&self, spectrum: Vec<f64>) -> PixelOutcome {
        let value = beamform::reduce_spectrum(
            &spectrum,
            &self.config.sv_angles,
            self.config.theta_rng_rad,
        );
        PixelOutcome::Spectrum { spectrum, value }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_pixel(
        &self,
        input: &ProcessingInput,
        tables: &[DMatrix<Complex64>],
        bin: usize,
        line: usize,
        dt: f64,
        fft: Option<&FftHelper>,
        pool: &mut SnapshotPool,
        sequential: &mut SequentialState,
    ) -> ProcResult<PixelOutcome> {
        let cfg = &self.config;
        match &cfg.method {
            Method::Periodogram { window } => {
                let taper = window.weights(cfg.nchan);
                let ml = self.extract_all(
                    input,
                    bin,
                    line,
                    cfg.bin_rng,
                    cfg.line_rng,
                    Some(&taper),
                    pool,
                )?;
                self.check_support(&ml)?;
                Ok(self.spectrum_outcome(beamform::periodogram(&ml, tables)?))
            }
            Method::Mvdr { diagonal_load } => {
                let ml =
                    self.extract_all(input, bin, line, cfg.bin_rng, cfg.line_rng, None, pool)?;
                self.check_support(&ml)?;
                let spectrum = if cfg.two_stage {
                    let cov = self.extract_all(
                        input,
                        bin,
                        line,
                        cfg.cov_bin_rng,
                        cfg.cov_line_rng,
                        None,
                        pool,
                    )?;
                    beamform::mvdr(&ml, &cov, tables, *diagonal_load, true)?
                } else {
                    beamform::mvdr(&ml, &ml, tables, *diagonal_load, false)?
                };
                Ok(self.spectrum_outcome(spectrum))
            }
            Method::MvdrRobust {
                diagonal_load,
                mismatch_fraction,
            } => {
                let ml =
                    self.extract_all(input, bin, line, cfg.bin_rng, cfg.line_rng, None, pool)?;
                self.check_support(&ml)?;
                let spectrum = if cfg.two_stage {
                    let cov = self.extract_all(
                        input,
                        bin,
                        line,
                        cfg.cov_bin_rng,
                        cfg.cov_line_rng,
                        None,
                        pool,
                    )?;
                    beamform::robust_mvdr(&ml, &cov, tables, *diagonal_load, *mismatch_fraction)?
                } else {
                    beamform::robust_mvdr(&ml, &ml, tables, *diagonal_load, *mismatch_fraction)?
                };
                Ok(self.spectrum_outcome(spectrum))
            }
            Method::Music => {
                let cov = self.extract_all(
                    input,
                    bin,
                    line,
                    cfg.cov_bin_rng,
                    cfg.cov_line_rng,
                    None,
                    pool,
                )?;
                self.check_support(&cov)?;
                Ok(self.spectrum_outcome(beamform::music(&cov, tables, cfg.nsrc)?))
            }
            Method::Risr {
                iterations,
                diagonal_load,
            } => {
                let ml =
                    self.extract_all(input, bin, line, cfg.bin_rng, cfg.line_rng, None, pool)?;
                self.check_support(&ml)?;
                Ok(self.spectrum_outcome(beamform::risr(
                    &ml,
                    tables,
                    *iterations,
                    *diagonal_load,
                )?))
            }
            Method::MusicDoa { .. }
            | Method::Mle { .. }
            | Method::WidebandDcm { .. }
            | Method::WidebandMle { .. } => {
                self.process_doa(input, bin, line, dt, fft, pool, sequential)
            }
            // The resolver rejects this tag before a processor exists.
            Method::Eig => Err(ProcError::UnsupportedMethod(
                "eig: legacy eigenvector weighting is not production-ready".into(),
            )),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_doa(
        &self,
        input: &ProcessingInput,
        bin: usize,
        line: usize,
        dt: f64,
        fft: Option<&FftHelper>,
        pool: &mut SnapshotPool,
        sequential: &mut SequentialState,
    ) -> ProcResult<PixelOutcome> {
        let cfg = &self.config;
        let ml = self.extract_all(input, bin, line, cfg.bin_rng, cfg.line_rng, None, pool)?;
        let nsnap = self.check_support(&ml)?;
        let covariances: Vec<DMatrix<Complex64>> = ml
            .iter()
            .map(|snaps| {
                snapshot::sample_covariance(snaps)
                    .ok_or_else(|| ProcError::Degenerate("empty snapshot support".into()))
            })
            .collect::<ProcResult<_>>()?;
        let ml_weight = 1.0 / input.sources.len() as f64;

        // Model order, before any optimizer work.
        let mut nsrc = cfg.nsrc;
        let mut orders = None;
        if let Some(params) = &cfg.model_order {
            let mut pooled = covariances[0].clone();
            for cov in &covariances[1..] {
                pooled += cov;
            }
            let pooled = pooled.unscale(covariances.len() as f64);
            let (eigenvalues, _) = linalg::hermitian_eig(pooled);
            let descending: Vec<f64> = eigenvalues.iter().rev().copied().collect();
            let estimate = model_order::estimate_order(&descending, nsnap, cfg.nsrc, params);
            orders = Some(estimate.by_criterion);
            if estimate.order == 0 {
                return Err(ProcError::Degenerate("model order selected zero sources".into()));
            }
            nsrc = estimate.order;
        }

        let constraints = &cfg.doa_constraints[..nsrc];
        let ctx = BoundContext {
            twtt_bin: input.time[bin],
            surface_twtt: input.surface_twtt.as_ref().map(|s| s[line]),
            layer_table: input.layer_table.as_ref(),
        };
        let init_bounds = doa::source_bounds(constraints, &ctx, true)?;
        let mut opt_bounds = doa::source_bounds(constraints, &ctx, false)?;

        // Sequential MLE: extrapolate the previous bin's angles flat-earth
        // onto this bin, tighten the bounds and add the Gaussian prior.
        let mut prior = None;
        if let Method::Mle {
            sequential: Some(params),
            ..
        } = &cfg.method
        {
            if let Some((prev, twtt_prev)) = sequential.as_ref() {
                let extrapolated = doa::extrapolate_flat_earth(prev, *twtt_prev, ctx.twtt_bin);
                for (bound, &center) in opt_bounds.iter_mut().zip(&extrapolated) {
                    bound.0 = bound.0.max(center - params.half_width_rad);
                    bound.1 = bound.1.min(center + params.half_width_rad);
                }
                prior = Some(GaussianPrior {
                    mean: extrapolated,
                    sigma_rad: params.prior_sigma_rad,
                });
            }
        }

        let geoms: Vec<SteeringGeom<'_>> = input
            .sources
            .iter()
            .map(|source| SteeringGeom {
                carrier_freq_hz: cfg.carrier_freq_hz,
                y: source.y_positions.row(line),
                z: source.z_positions.row(line),
            })
            .collect();

        let outcome = match &cfg.method {
            Method::Mle {
                initializer,
                optimizer,
                ..
            } => {
                let cost = ProjectionCost {
                    terms: covariances
                        .iter()
                        .zip(&geoms)
                        .map(|(cov, geom)| CostTerm {
                            covariance: cov.clone(),
                            steering: TermSteering::Narrowband(geom.clone()),
                            weight: ml_weight,
                        })
                        .collect(),
                    prior,
                };
                doa::estimate_pixel(
                    &cost,
                    &cost,
                    &cfg.sv_angles,
                    &init_bounds,
                    &opt_bounds,
                    *initializer,
                    optimizer,
                    cfg.min_separation_rad,
                )?
            }
            Method::MusicDoa { optimizer } => {
                let objective = MusicCost {
                    terms: covariances
                        .iter()
                        .zip(&geoms)
                        .map(|(cov, geom)| {
                            doa::noise_subspace(cov.clone(), nsrc)
                                .map(|noise| (noise, geom.clone()))
                        })
                        .collect::<ProcResult<_>>()?,
                };
                let power_cost = ProjectionCost {
                    terms: covariances
                        .iter()
                        .zip(&geoms)
                        .map(|(cov, geom)| CostTerm {
                            covariance: cov.clone(),
                            steering: TermSteering::Narrowband(geom.clone()),
                            weight: ml_weight,
                        })
                        .collect(),
                    prior: None,
                };
                doa::estimate_pixel(
                    &objective,
                    &power_cost,
                    &cfg.sv_angles,
                    &init_bounds,
                    &opt_bounds,
                    Initializer::AlternatingProjection,
                    optimizer,
                    cfg.min_separation_rad,
                )?
            }
            Method::WidebandMle {
                subbands,
                initializer,
                optimizer,
            } => {
                let fft = fft.ok_or_else(|| {
                    ProcError::InvalidConfig("wideband-mle requires a planned DFT".into())
                })?;
                let hood =
                    Neighborhood::clip(bin, line, cfg.bin_rng, cfg.line_rng, cfg.nt, cfg.nx);
                let mut terms = Vec::new();
                for (source, geom) in input.sources.iter().zip(&geoms) {
                    let set = snapshot::subband_snapshots(
                        source,
                        &hood,
                        *subbands,
                        dt,
                        cfg.carrier_freq_hz,
                        fft,
                    );
                    for (band, freq) in set.snapshots.iter().zip(&set.center_freqs_hz) {
                        let cov = snapshot::sample_covariance(band).ok_or_else(|| {
                            ProcError::Degenerate("no wideband tap support".into())
                        })?;
                        terms.push(CostTerm {
                            covariance: cov,
                            steering: TermSteering::Narrowband(SteeringGeom {
                                carrier_freq_hz: *freq,
                                y: geom.y.view(),
                                z: geom.z.view(),
                            }),
                            weight: ml_weight,
                        });
                    }
                }
                let cost = ProjectionCost { terms, prior: None };
                doa::estimate_pixel(
                    &cost,
                    &cost,
                    &cfg.sv_angles,
                    &init_bounds,
                    &opt_bounds,
                    *initializer,
                    optimizer,
                    cfg.min_separation_rad,
                )?
            }
            Method::WidebandDcm {
                taps,
                registration_support,
                optimizer,
            } => {
                let hood =
                    Neighborhood::clip(bin, line, cfg.bin_rng, cfg.line_rng, cfg.nt, cfg.nx);
                let half = (*taps / 2) as i64;
                let df = if dt > 0.0 {
                    1.0 / (*taps as f64 * dt)
                } else {
                    0.0
                };
                let mut terms = Vec::new();
                for (source, geom) in input.sources.iter().zip(&geoms) {
                    let stacked =
                        snapshot::stacked_snapshots(source, &hood, *taps, *registration_support);
                    let cov = snapshot::sample_covariance(&stacked).ok_or_else(|| {
                        ProcError::Degenerate("no registration support for stacked snapshots".into())
                    })?;
                    let tap_geoms: Vec<SteeringGeom<'_>> = (0..*taps)
                        .map(|k| SteeringGeom {
                            carrier_freq_hz: cfg.carrier_freq_hz + (k as i64 - half) as f64 * df,
                            y: geom.y.view(),
                            z: geom.z.view(),
                        })
                        .collect();
                    terms.push(CostTerm {
                        covariance: cov,
                        steering: TermSteering::Stacked(tap_geoms),
                        weight: ml_weight,
                    });
                }
                let cost = ProjectionCost { terms, prior: None };
                doa::estimate_pixel(
                    &cost,
                    &cost,
                    &cfg.sv_angles,
                    &init_bounds,
                    &opt_bounds,
                    Initializer::GridSearch,
                    optimizer,
                    cfg.min_separation_rad,
                )?
            }
            other => {
                return Err(ProcError::UnsupportedMethod(format!(
                    "{} is not a parametric estimator",
                    other.name()
                )))
            }
        };

        if let Method::Mle {
            sequential: Some(_),
            ..
        } = &cfg.method
        {
            *sequential = Some((outcome.angles.clone(), ctx.twtt_bin));
        }

        Ok(PixelOutcome::Sources { outcome, orders })
    }
}
