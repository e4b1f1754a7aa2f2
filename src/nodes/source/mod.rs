//! Source nodes (generators with no audio inputs)

mod constant;
mod physical_input;
mod sine;

pub use constant::Constant;
pub use physical_input::PhysicalInput;
pub use sine::Sine;
