use std::sync::Arc;

use super::types::{Var, VarInit, VarLocation};
use super::SynapseGroupId;

/// An additional per-thread input variable declared by a neuron model
/// (beyond the implicit `Isyn`): name, type and initial value.
#[derive(Debug, Clone, PartialEq)]
pub struct AdditionalInputVar {
    pub name: String,
    pub ty: String,
    pub init_value: String,
}

/// Value-typed description of a neuron model. Groups sharing a
/// structurally identical model can end up in the same merged group.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NeuronModel {
    pub vars: Vec<Var>,
    pub param_names: Vec<String>,
    pub derived_param_names: Vec<String>,
    pub extra_global_params: Vec<Var>,
    pub sim_code: String,
    pub threshold_condition_code: String,
    pub reset_code: String,
    pub support_code: String,
    pub additional_input_vars: Vec<AdditionalInputVar>,
    pub auto_refractory_required: bool,
}

impl NeuronModel {
    /// True when any of the model's code blocks draws from the
    /// simulation RNG.
    pub fn is_sim_rng_required(&self) -> bool {
        [&self.sim_code, &self.threshold_condition_code, &self.reset_code]
            .iter()
            .any(|c| c.contains("$(gennrand"))
    }
}

/// Value-typed description of a current source model.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CurrentSourceModel {
    pub vars: Vec<Var>,
    pub param_names: Vec<String>,
    pub injection_code: String,
}

/// A current source attached to a neuron group.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    pub name: String,
    pub model: Arc<CurrentSourceModel>,
    pub params: Vec<f64>,
    pub var_initialisers: Vec<VarInit>,
}

/// A population of structurally identical neurons.
#[derive(Debug, Clone)]
pub struct NeuronGroup {
    pub name: String,
    pub num_neurons: u32,
    pub model: Arc<NeuronModel>,
    pub params: Vec<f64>,
    pub derived_params: Vec<f64>,
    pub var_initialisers: Vec<VarInit>,
    /// Number of axonal delay slots; 1 means no delay line.
    pub num_delay_slots: u32,
    pub spike_location: VarLocation,
    pub current_sources: Vec<CurrentSource>,
    pub(crate) in_syn: Vec<SynapseGroupId>,
    pub(crate) out_syn: Vec<SynapseGroupId>,
}

impl NeuronGroup {
    pub fn is_delay_required(&self) -> bool {
        self.num_delay_slots > 1
    }

    pub fn is_sim_rng_required(&self) -> bool {
        self.model.is_sim_rng_required()
    }

    pub fn is_init_rng_required(&self) -> bool {
        self.var_initialisers.iter().any(|v| v.code.contains("$(gennrand"))
    }

    /// Incoming synapse groups, i.e. this group's postsynaptic inputs.
    pub fn in_syn(&self) -> &[SynapseGroupId] {
        &self.in_syn
    }

    /// Outgoing synapse groups.
    pub fn out_syn(&self) -> &[SynapseGroupId] {
        &self.out_syn
    }
}
