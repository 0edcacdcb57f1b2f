pub mod error;
pub mod stack;

pub use error::SubstitutionError;
pub use stack::{check_unreplaced_variables, FunctionTemplate, Substitutions};
