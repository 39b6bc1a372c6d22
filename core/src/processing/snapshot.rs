use nalgebra::DMatrix;
use num_complex::Complex64;
use std::f64::consts::PI;

use crate::interface::MultilookSource;
use crate::math::fft::FftHelper;
use crate::math::linalg;
use crate::processing::pool::SnapshotPool;
use crate::ProcResult;

/// Inclusive neighborhood window after clipping at the cube boundary.
/// Truncation shrinks the support count; the cube is never wrapped or
/// padded with synthetic data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighborhood {
    pub bin_lo: usize,
    pub bin_hi: usize,
    pub line_lo: usize,
    pub line_hi: usize,
}

impl Neighborhood {
    pub fn clip(
        bin: usize,
        line: usize,
        bin_rng: (i64, i64),
        line_rng: (i64, i64),
        nt: usize,
        nx: usize,
    ) -> Self {
        Self {
            bin_lo: (bin as i64 + bin_rng.0).max(0) as usize,
            bin_hi: (bin as i64 + bin_rng.1).min(nt as i64 - 1) as usize,
            line_lo: (line as i64 + line_rng.0).max(0) as usize,
            line_hi: (line as i64 + line_rng.1).min(nx as i64 - 1) as usize,
        }
    }

    pub fn nbins(&self) -> usize {
        self.bin_hi - self.bin_lo + 1
    }

    pub fn nlines(&self) -> usize {
        self.line_hi - self.line_lo + 1
    }
}

/// Forms the spatial snapshot matrix (nchan x nsnap) for one neighborhood:
/// the (bin, line, subaperture, subband) axes flatten into the snapshot
/// axis, channel stays the feature axis. Channel equalization is applied
/// here; the optional amplitude taper serves the periodogram.
pub fn extract(
    source: &MultilookSource,
    hood: &Neighborhood,
    taper: Option<&[f64]>,
    pool: &mut SnapshotPool,
) -> ProcResult<DMatrix<Complex64>> {
    let (nsub, nbands, nchan) = (source.nsub(), source.nbands(), source.nchan());
    let nsnap = hood.nbins() * hood.nlines() * nsub * nbands;
    let mut buffer = pool.checkout(nsnap * nchan)?;

    let mut cursor = 0;
    for bin in hood.bin_lo..=hood.bin_hi {
        for line in hood.line_lo..=hood.line_hi {
            for sub in 0..nsub {
                for band in 0..nbands {
                    for chan in 0..nchan {
                        let mut value = source.samples[[bin, line, sub, band, chan]]
                            * source.equalization[chan];
                        if let Some(weights) = taper {
                            value *= weights[chan];
                        }
                        buffer[cursor] = value;
                        cursor += 1;
                    }
                }
            }
        }
    }

    let snapshots = DMatrix::from_column_slice(nchan, nsnap, &buffer);
    pool.release(buffer);
    Ok(snapshots)
}

/// Sample covariance `(1/Nsnap) * X * X^H`, Hermitian by construction.
/// Returns None when the snapshot set is empty so the caller can degrade
/// the pixel to NaN instead of raising.
pub fn sample_covariance(snapshots: &DMatrix<Complex64>) -> Option<DMatrix<Complex64>> {
    let nsnap = snapshots.ncols();
    if nsnap == 0 {
        return None;
    }
    let outer = snapshots * snapshots.adjoint();
    Some(linalg::hermitize(outer.unscale(nsnap as f64)))
}

/// Per-subband snapshot sets for the wideband estimators: each
/// neighborhood position contributes a DFT across `subbands` fast-time
/// taps centered on its bin. Tap windows that would cross the cube
/// boundary are dropped, shrinking the support count.
pub struct SubbandSet {
    /// One snapshot matrix (nchan x nsnap) per subband, ascending in
    /// frequency.
    pub snapshots: Vec<DMatrix<Complex64>>,
    pub center_freqs_hz: Vec<f64>,
}

pub fn subband_snapshots(
    source: &MultilookSource,
    hood: &Neighborhood,
    subbands: usize,
    dt: f64,
    carrier_freq_hz: f64,
    fft: &FftHelper,
) -> SubbandSet {
    debug_assert_eq!(fft.size(), subbands);
    let (nt, nsub, nbands, nchan) = (source.nt(), source.nsub(), source.nbands(), source.nchan());
    let half = (subbands / 2) as i64;
    let df = 1.0 / (subbands as f64 * dt);
    let center_freqs_hz: Vec<f64> = (0..subbands)
        .map(|k| carrier_freq_hz + (k as i64 - half) as f64 * df)
        .collect();

    let mut columns: Vec<Vec<Complex64>> = vec![Vec::new(); subbands];
    let mut taps = vec![Complex64::new(0.0, 0.0); subbands];
    for bin in hood.bin_lo..=hood.bin_hi {
        let t0 = bin as i64 - half;
        if t0 < 0 || t0 + subbands as i64 > nt as i64 {
            continue;
        }
        for line in hood.line_lo..=hood.line_hi {
            for sub in 0..nsub {
                for band in 0..nbands {
                    // One DFT per channel; subband k then reads the
                    // fftshifted bin so frequencies come out ascending.
                    let mut spectra: Vec<Vec<Complex64>> = Vec::with_capacity(nchan);
                    for chan in 0..nchan {
                        for (k, tap) in taps.iter_mut().enumerate() {
                            *tap = source.samples[[t0 as usize + k, line, sub, band, chan]]
                                * source.equalization[chan];
                        }
                        spectra.push(fft.forward(&taps));
                    }
                    for (k, column_set) in columns.iter_mut().enumerate() {
                        let dft_bin = (k + subbands - subbands / 2) % subbands;
                        for spectrum in &spectra {
                            column_set.push(spectrum[dft_bin]);
                        }
                    }
                }
            }
        }
    }

    let nsnap = columns[0].len() / nchan.max(1);
    let snapshots = columns
        .into_iter()
        .map(|flat| DMatrix::from_column_slice(nchan, nsnap, &flat))
        .collect();
    SubbandSet {
        snapshots,
        center_freqs_hz,
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Space-time snapshots for the wideband DCM estimator: `taps` fast-time
/// samples per channel, registered onto a grid centered on each
/// neighborhood bin by sinc interpolation, stacked into one
/// (taps*nchan) x nsnap matrix. Positions whose interpolation support
/// crosses the cube boundary are dropped.
pub fn stacked_snapshots(
    source: &MultilookSource,
    hood: &Neighborhood,
    taps: usize,
    support: usize,
) -> DMatrix<Complex64> {
    let (nt, nsub, nbands, nchan) = (source.nt(), source.nsub(), source.nbands(), source.nchan());
    let mut flat: Vec<Complex64> = Vec::new();
    let mut nsnap = 0usize;

    let offsets: Vec<(i64, f64)> = (0..taps)
        .map(|t| {
            let offset = t as f64 - (taps as f64 - 1.0) / 2.0;
            let int = offset.round();
            (int as i64, offset - int)
        })
        .collect();

    for bin in hood.bin_lo..=hood.bin_hi {
        // Registration support for the farthest tap.
        let reach = offsets
            .iter()
            .map(|&(int, frac)| int.unsigned_abs() as usize + if frac == 0.0 { 0 } else { support })
            .max()
            .unwrap_or(0) as i64;
        if (bin as i64 - reach) < 0 || (bin as i64 + reach) >= nt as i64 {
            continue;
        }
        for line in hood.line_lo..=hood.line_hi {
            for sub in 0..nsub {
                for band in 0..nbands {
                    for &(int, frac) in &offsets {
                        for chan in 0..nchan {
                            let value = if frac == 0.0 {
                                source.samples[[(bin as i64 + int) as usize, line, sub, band, chan]]
                            } else {
                                let mut acc = Complex64::new(0.0, 0.0);
                                for m in -(support as i64)..=(support as i64) {
                                    let idx = (bin as i64 + int + m) as usize;
                                    acc += source.samples[[idx, line, sub, band, chan]]
                                        * sinc(frac - m as f64);
                                }
                                acc
                            };
                            flat.push(value * source.equalization[chan]);
                        }
                    }
                    nsnap += 1;
                }
            }
        }
    }

    DMatrix::from_column_slice(taps * nchan, nsnap, &flat)
}
