pub mod error;
pub mod model;
pub mod neuron;
pub mod synapse;
pub mod types;

pub use error::ModelError;
pub use model::{ModelSpec, NeuronGroupId, SynapseGroupId};
pub use neuron::{AdditionalInputVar, CurrentSource, CurrentSourceModel, NeuronGroup, NeuronModel};
pub use synapse::{PostsynapticModel, SparseConnectivityInit, SynapseGroup, WeightUpdateModel};
pub use types::{ScalarType, SpanType, SynapseMatrixType, Var, VarInit, VarLocation};
