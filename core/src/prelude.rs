pub use crate::config::{
    ArrayParams, ConstraintMethod, DoaConstraint, Initializer, Method, ModelOrderParams,
    OptimizerOptions, OrderCriterion, ResolvedConfig, SequentialParams,
};
pub use crate::interface::{
    DelayTable, ImageOutput, ModelOrderLog, MultilookSource, ProcessingInput, ProcessorOutput,
    Tomography,
};
pub use crate::math::window::Window;
pub use crate::processing::ArrayProcessor;
pub use crate::{ProcError, ProcResult};
