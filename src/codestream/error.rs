use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodeStreamError {
    #[error("scope close id {found} does not match most recent open id {expected}")]
    UnbalancedScope { expected: usize, found: usize },

    #[error("scope close id {0} with no scope open")]
    NoOpenScope(usize),

    #[error("{0} scope(s) still open at end of stream")]
    UnclosedScopes(usize),
}
