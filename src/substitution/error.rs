use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubstitutionError {
    #[error("variable substitution '{0}' already defined in this frame")]
    DuplicateVariable(String),

    #[error("function substitution '{0}' already defined in this frame")]
    DuplicateFunction(String),

    #[error("undefined substitution '{0}'")]
    Undefined(String),

    #[error("unreplaced substitution token '{token}' in {context}")]
    Unreplaced { context: String, token: String },
}
