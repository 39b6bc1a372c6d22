pub mod fft;
pub mod linalg;
pub mod optim;
pub mod steering;
pub mod window;

pub use fft::FftHelper;
pub use optim::{Bounds, CostFunction, Minimum};
pub use window::Window;
