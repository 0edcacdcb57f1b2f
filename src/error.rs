use thiserror::Error;

use crate::backend::BackendError;
use crate::codestream::CodeStreamError;
use crate::model::ModelError;
use crate::substitution::SubstitutionError;

/// Any failure the generator can report. Internal invariant violations
/// are bugs and surface as the corresponding subsystem error; input
/// problems are reported once, with context, and never retried.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Substitution(#[from] SubstitutionError),

    #[error(transparent)]
    CodeStream(#[from] CodeStreamError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
