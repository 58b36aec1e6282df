//! opalc-mir - Mid-level IR and HIR lowering.
//!
//! The MIR data model, the CFG builder with its drop-scope manager, the
//! expression lowering (including match lowering and the generator
//! transform), and the output validation pass.

pub mod builder;
pub mod lower;
pub mod mir;
pub mod scope;
pub mod validate;

pub use builder::MirBuilder;
pub use lower::{
    lower_function, lower_functions, GeneratorOutput, LowerConfig, LowerError, LowerErrorKind,
    LoweredFunction, TargetVersion,
};
pub use mir::*;
pub use scope::{ScopeId, ValState};
pub use validate::{validate, validate_full, validate_types, ValidateError};

#[cfg(test)]
mod tests;

#[cfg(test)]
mod edge_cases;
