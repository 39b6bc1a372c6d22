use ndarray::{Array1, Array2, Array5};
use num_complex::Complex64;

use crate::{ProcError, ProcResult};

/// One multilook source: a 5-D complex data cube indexed
/// (fast-time, slow-time, subaperture, subband, channel) together with the
/// geometry that produced it. Immutable input to the engine.
#[derive(Debug, Clone)]
pub struct MultilookSource {
    pub samples: Array5<Complex64>,
    /// Per-channel complex calibration weights applied before estimation.
    pub equalization: Array1<Complex64>,
    /// Cross-track sensor positions, one row per along-track line (nx x nchan), metres.
    pub y_positions: Array2<f64>,
    /// Elevation sensor positions, one row per along-track line (nx x nchan), metres.
    pub z_positions: Array2<f64>,
}

impl MultilookSource {
    pub fn nt(&self) -> usize {
        self.samples.shape()[0]
    }

    pub fn nx(&self) -> usize {
        self.samples.shape()[1]
    }

    pub fn nsub(&self) -> usize {
        self.samples.shape()[2]
    }

    pub fn nbands(&self) -> usize {
        self.samples.shape()[3]
    }

    pub fn nchan(&self) -> usize {
        self.samples.shape()[4]
    }

    /// Checks that the geometry arrays agree with the cube dimensions.
    pub fn validate(&self) -> ProcResult<()> {
        let (nx, nchan) = (self.nx(), self.nchan());
        if self.equalization.len() != nchan {
            return Err(ProcError::DimensionMismatch(format!(
                "equalization has {} weights for {} channels",
                self.equalization.len(),
                nchan
            )));
        }
        for (name, arr) in [("y_positions", &self.y_positions), ("z_positions", &self.z_positions)] {
            if arr.shape() != [nx, nchan] {
                return Err(ProcError::DimensionMismatch(format!(
                    "{} is {:?}, expected [{}, {}]",
                    name,
                    arr.shape(),
                    nx,
                    nchan
                )));
            }
        }
        Ok(())
    }
}

/// Precomputed delay-vs-incidence-angle table used by the layered-media
/// DOA constraints. Round-trip times must be strictly increasing.
#[derive(Debug, Clone)]
pub struct DelayTable {
    pub twtt: Vec<f64>,
    pub incidence_rad: Vec<f64>,
}

impl DelayTable {
    /// Linear interpolation of the incidence angle at a round-trip time,
    /// clamped to the table endpoints.
    pub fn incidence_at(&self, twtt: f64) -> f64 {
        match self.twtt.iter().position(|&t| t >= twtt) {
            None => *self.incidence_rad.last().unwrap_or(&0.0),
            Some(0) => self.incidence_rad[0],
            Some(i) => {
                let (t0, t1) = (self.twtt[i - 1], self.twtt[i]);
                let (a0, a1) = (self.incidence_rad[i - 1], self.incidence_rad[i]);
                let frac = (twtt - t0) / (t1 - t0);
                a0 + frac * (a1 - a0)
            }
        }
    }
}

/// Full input to one engine invocation: the multilook cubes plus the
/// references the DOA constraints need.
#[derive(Debug, Clone)]
pub struct ProcessingInput {
    pub sources: Vec<MultilookSource>,
    /// Fast-time axis, seconds, one entry per range bin.
    pub time: Array1<f64>,
    /// Surface round-trip time per along-track line, used by the surface
    /// DOA constraints.
    pub surface_twtt: Option<Array1<f64>>,
    /// Delay table for the layered-media DOA constraints.
    pub layer_table: Option<DelayTable>,
}

impl ProcessingInput {
    /// All sources must share dimensions; returns (nt, nx, nchan).
    pub fn validate(&self) -> ProcResult<(usize, usize, usize)> {
        let first = self
            .sources
            .first()
            .ok_or_else(|| ProcError::InvalidConfig("no multilook sources supplied".into()))?;
        let dims = (first.nt(), first.nx(), first.nchan());
        for (idx, source) in self.sources.iter().enumerate() {
            source.validate()?;
            if (source.nt(), source.nx(), source.nchan()) != dims
                || source.nsub() != first.nsub()
                || source.nbands() != first.nbands()
            {
                return Err(ProcError::DimensionMismatch(format!(
                    "multilook source {} disagrees with source 0 on cube dimensions",
                    idx
                )));
            }
        }
        if self.time.len() != dims.0 {
            return Err(ProcError::DimensionMismatch(format!(
                "time axis has {} entries for {} range bins",
                self.time.len(),
                dims.0
            )));
        }
        if let Some(surface) = &self.surface_twtt {
            if surface.len() != dims.1 {
                return Err(ProcError::DimensionMismatch(format!(
                    "surface reference has {} entries for {} lines",
                    surface.len(),
                    dims.1
                )));
            }
        }
        Ok(dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array5;

    fn source(nt: usize, nx: usize, nchan: usize) -> MultilookSource {
        MultilookSource {
            samples: Array5::zeros((nt, nx, 1, 1, nchan)),
            equalization: Array1::from_elem(nchan, Complex64::new(1.0, 0.0)),
            y_positions: Array2::zeros((nx, nchan)),
            z_positions: Array2::zeros((nx, nchan)),
        }
    }

    #[test]
    fn input_validation_accepts_consistent_sources() {
        let input = ProcessingInput {
            sources: vec![source(8, 4, 3), source(8, 4, 3)],
            time: Array1::linspace(0.0, 1e-6, 8),
            surface_twtt: None,
            layer_table: None,
        };
        assert_eq!(input.validate().unwrap(), (8, 4, 3));
    }

    #[test]
    fn input_validation_rejects_mismatched_geometry() {
        let mut bad = source(8, 4, 3);
        bad.y_positions = Array2::zeros((4, 2));
        let input = ProcessingInput {
            sources: vec![bad],
            time: Array1::linspace(0.0, 1e-6, 8),
            surface_twtt: None,
            layer_table: None,
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn delay_table_interpolates_and_clamps() {
        let table = DelayTable {
            twtt: vec![1.0e-6, 2.0e-6],
            incidence_rad: vec![0.1, 0.3],
        };
        assert!((table.incidence_at(1.5e-6) - 0.2).abs() < 1e-12);
        assert_eq!(table.incidence_at(0.0), 0.1);
        assert_eq!(table.incidence_at(9.0e-6), 0.3);
    }
}
