use ndarray::{Array2, Array3};

/// Best-angle power image, one entry per output (range-bin, range-line)
/// pixel. Pre-allocated NaN-filled and written pixel-by-pixel; entries that
/// never receive an estimate stay NaN to distinguish "no estimate" from
/// "zero power".
#[derive(Debug, Clone)]
pub struct ImageOutput {
    pub power: Array2<f64>,
    /// Fast-time indices of the image rows in cube coordinates.
    pub bins: Vec<usize>,
    /// Along-track indices of the image columns in cube coordinates.
    pub lines: Vec<usize>,
}

impl ImageOutput {
    pub fn new(bins: Vec<usize>, lines: Vec<usize>) -> Self {
        let power = Array2::from_elem((bins.len(), lines.len()), f64::NAN);
        Self { power, bins, lines }
    }
}

/// Per-source estimation record retained when tomography is enabled.
///
/// The second dimension is the source index for DOA estimators (sorted
/// ascending by angle, or left/right buckets in side-split mode) and the
/// steering-grid index for beamformers. The optimizer cost is a per-pixel
/// scalar so it is stored as a plane rather than a cube.
#[derive(Debug, Clone)]
pub struct Tomography {
    pub angle_rad: Array3<f64>,
    pub power: Array3<f64>,
    pub cost: Array2<f64>,
    pub hessian: Array3<f64>,
}

impl Tomography {
    pub fn new(nt_out: usize, nsrc_or_nsv: usize, nx_out: usize) -> Self {
        Self {
            angle_rad: Array3::from_elem((nt_out, nsrc_or_nsv, nx_out), f64::NAN),
            power: Array3::from_elem((nt_out, nsrc_or_nsv, nx_out), f64::NAN),
            cost: Array2::from_elem((nt_out, nx_out), f64::NAN),
            hessian: Array3::from_elem((nt_out, nsrc_or_nsv, nx_out), f64::NAN),
        }
    }
}

/// Per-criterion model-order answers kept for offline comparison when the
/// model-order log is enabled. Indexed (bin, criterion, line).
#[derive(Debug, Clone)]
pub struct ModelOrderLog {
    pub criteria: Vec<&'static str>,
    pub orders: Array3<usize>,
}

impl ModelOrderLog {
    pub fn new(nt_out: usize, criteria: Vec<&'static str>, nx_out: usize) -> Self {
        let orders = Array3::zeros((nt_out, criteria.len(), nx_out));
        Self { criteria, orders }
    }
}

/// Everything one engine invocation produces.
#[derive(Debug, Clone)]
pub struct ProcessorOutput {
    pub image: ImageOutput,
    pub tomography: Option<Tomography>,
    pub model_order_log: Option<ModelOrderLog>,
    /// Pixels that received an estimate vs. pixels degraded to NaN.
    pub estimated_pixels: usize,
    pub degenerate_pixels: usize,
}
