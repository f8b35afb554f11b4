pub mod operation;
pub mod sample;

pub use operation::{OpKind, Operation};
pub use sample::{ErrorClass, Outcome, Sample};
