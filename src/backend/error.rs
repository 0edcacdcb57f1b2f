use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no compatible presynaptic update strategy for synapse group '{0}'")]
    NoCompatibleStrategy(String),

    #[error("strategy registry is frozen once emission has started")]
    RegistryFrozen,

    #[error("not yet implemented: {0}")]
    NotYetImplemented(&'static str),
}
