pub mod cube;
pub mod output;

pub use cube::{DelayTable, MultilookSource, ProcessingInput};
pub use output::{ImageOutput, ModelOrderLog, ProcessorOutput, Tomography};
