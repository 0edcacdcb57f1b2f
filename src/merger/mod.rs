pub mod fields;
pub mod merged;
pub mod model_merged;
pub mod support_code;

pub use fields::{Fold, MergedField, MergedStructLayout};
pub use merged::{MergedNeuronGroup, MergedSynapseGroup, NeuronRole, SynapseRole};
pub use model_merged::ModelMerged;
pub use support_code::SupportCodeMerged;
