//! Coregistration transform model.

mod cache;
mod coreg;
mod parameters;

pub use self::cache::{downstream_of, DerivedNode, Input, Upstream};
pub use self::coreg::CoregModel;
pub use self::parameters::{
    Axis, Direction, FiducialWeights, ParameterKind, ParameterSteps, RegistrationParameters,
    ScaleMode,
};
