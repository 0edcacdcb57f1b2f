use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("duplicate neuron group name '{0}'")]
    DuplicateNeuronGroup(String),

    #[error("duplicate synapse group name '{0}'")]
    DuplicateSynapseGroup(String),

    #[error("synapse group '{0}' references an unknown neuron group")]
    UnknownNeuronGroup(String),

    #[error("neuron group '{group}': {what} count does not match the model ({expected} expected, {found} given)")]
    Mismatch { group: String, what: &'static str, expected: usize, found: usize },

    #[error("synapse group '{0}' has sparse connectivity but no max row length")]
    MissingMaxRowLength(String),
}
