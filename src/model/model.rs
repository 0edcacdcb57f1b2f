use std::sync::Arc;

use tracing::debug;

use super::error::ModelError;
use super::neuron::{CurrentSource, NeuronGroup, NeuronModel};
use super::synapse::SynapseGroup;
use super::types::{ScalarType, SynapseMatrixType, VarInit, VarLocation};

/// Stable index of a neuron group within a `ModelSpec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NeuronGroupId(pub(crate) usize);

/// Stable index of a synapse group within a `ModelSpec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SynapseGroupId(pub(crate) usize);

/// The validated in-memory model the generator consumes. Groups live in
/// arenas and reference each other by stable index; the graph is only
/// mutated while it is being built.
pub struct ModelSpec {
    pub name: String,
    pub dt: f64,
    pub precision: ScalarType,
    pub time_precision: ScalarType,
    neuron_groups: Vec<NeuronGroup>,
    synapse_groups: Vec<SynapseGroup>,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, dt: f64, precision: ScalarType, time_precision: ScalarType) -> ModelSpec {
        ModelSpec {
            name: name.into(),
            dt,
            precision,
            time_precision,
            neuron_groups: Vec::new(),
            synapse_groups: Vec::new(),
        }
    }

    pub fn add_neuron_group(
        &mut self,
        name: impl Into<String>,
        num_neurons: u32,
        model: Arc<NeuronModel>,
        params: Vec<f64>,
        derived_params: Vec<f64>,
        var_initialisers: Vec<VarInit>,
    ) -> Result<NeuronGroupId, ModelError> {
        let name = name.into();
        if self.neuron_groups.iter().any(|ng| ng.name == name) {
            return Err(ModelError::DuplicateNeuronGroup(name));
        }
        if params.len() != model.param_names.len() {
            return Err(ModelError::Mismatch {
                group: name,
                what: "parameter",
                expected: model.param_names.len(),
                found: params.len(),
            });
        }
        if var_initialisers.len() != model.vars.len() {
            return Err(ModelError::Mismatch {
                group: name,
                what: "variable initialiser",
                expected: model.vars.len(),
                found: var_initialisers.len(),
            });
        }

        self.neuron_groups.push(NeuronGroup {
            name,
            num_neurons,
            model,
            params,
            derived_params,
            var_initialisers,
            num_delay_slots: 1,
            spike_location: VarLocation::HOST_DEVICE,
            current_sources: Vec::new(),
            in_syn: Vec::new(),
            out_syn: Vec::new(),
        });
        Ok(NeuronGroupId(self.neuron_groups.len() - 1))
    }

    pub fn add_current_source(&mut self, ng: NeuronGroupId, source: CurrentSource) {
        self.neuron_groups[ng.0].current_sources.push(source);
    }

    /// Wire a synapse group into the graph, recording the endpoint
    /// back-references and widening the source group's delay line.
    pub fn add_synapse_group(&mut self, sg: SynapseGroup) -> Result<SynapseGroupId, ModelError> {
        if self.synapse_groups.iter().any(|other| other.name == sg.name) {
            return Err(ModelError::DuplicateSynapseGroup(sg.name));
        }
        if sg.src.0 >= self.neuron_groups.len() || sg.trg.0 >= self.neuron_groups.len() {
            return Err(ModelError::UnknownNeuronGroup(sg.name));
        }
        if sg.matrix_type.contains(SynapseMatrixType::SPARSE) && sg.max_row_length.is_none() {
            return Err(ModelError::MissingMaxRowLength(sg.name));
        }
        if sg.wu_var_initialisers.len() != sg.wu_model.vars.len() {
            return Err(ModelError::Mismatch {
                group: sg.name,
                what: "weight update variable initialiser",
                expected: sg.wu_model.vars.len(),
                found: sg.wu_var_initialisers.len(),
            });
        }
        if sg.ps_var_initialisers.len() != sg.ps_model.vars.len() {
            return Err(ModelError::Mismatch {
                group: sg.name,
                what: "postsynaptic variable initialiser",
                expected: sg.ps_model.vars.len(),
                found: sg.ps_var_initialisers.len(),
            });
        }

        let id = SynapseGroupId(self.synapse_groups.len());
        self.neuron_groups[sg.src.0].out_syn.push(id);
        self.neuron_groups[sg.trg.0].in_syn.push(id);
        if sg.delay_steps > 0 {
            let src = &mut self.neuron_groups[sg.src.0];
            src.num_delay_slots = src.num_delay_slots.max(sg.delay_steps + 1);
        }
        debug!(name = %sg.name, "added synapse group");
        self.synapse_groups.push(sg);
        Ok(id)
    }

    pub fn neuron_group(&self, id: NeuronGroupId) -> &NeuronGroup {
        &self.neuron_groups[id.0]
    }

    pub fn synapse_group(&self, id: SynapseGroupId) -> &SynapseGroup {
        &self.synapse_groups[id.0]
    }

    pub fn neuron_group_ids(&self) -> impl Iterator<Item = NeuronGroupId> {
        (0..self.neuron_groups.len()).map(NeuronGroupId)
    }

    pub fn synapse_group_ids(&self) -> impl Iterator<Item = SynapseGroupId> {
        (0..self.synapse_groups.len()).map(SynapseGroupId)
    }

    pub fn num_neuron_groups(&self) -> usize {
        self.neuron_groups.len()
    }

    pub fn num_synapse_groups(&self) -> usize {
        self.synapse_groups.len()
    }

    /// Scalar literal in the model's precision.
    pub fn scalar_expr(&self, value: f64) -> String {
        self.precision.literal(value)
    }

    // ---------------------------------------------------------------
    // Derived capability queries
    // ---------------------------------------------------------------

    /// True spikes must be recorded for this group: some outgoing
    /// synapse group simulates them, or some incoming one learns from
    /// them.
    pub fn is_true_spike_required(&self, id: NeuronGroupId) -> bool {
        let ng = self.neuron_group(id);
        ng.out_syn.iter().any(|sg| self.synapse_group(*sg).is_true_spike_required())
            || ng.in_syn.iter().any(|sg| !self.synapse_group(*sg).wu_model.learn_post_code.is_empty())
    }

    /// Spike-like events must be detected for this group.
    pub fn is_spike_event_required(&self, id: NeuronGroupId) -> bool {
        self.neuron_group(id)
            .out_syn
            .iter()
            .any(|sg| self.synapse_group(*sg).is_spike_event_required())
    }

    /// A spike time array is needed when any attached weight update
    /// model reads it.
    pub fn is_spike_time_required(&self, id: NeuronGroupId) -> bool {
        let ng = self.neuron_group(id);
        let wu_reads = |sg: &SynapseGroup, token: &str| {
            [&sg.wu_model.sim_code, &sg.wu_model.event_code, &sg.wu_model.learn_post_code, &sg.wu_model.synapse_dynamics_code]
                .iter()
                .any(|c| c.contains(token))
        };
        ng.out_syn.iter().any(|sg| wu_reads(self.synapse_group(*sg), "$(sT_pre)"))
            || ng.in_syn.iter().any(|sg| wu_reads(self.synapse_group(*sg), "$(sT_post)"))
    }

    /// Distinct spike-event conditions contributed by outgoing synapse
    /// groups, paired with the contributing support code block.
    pub fn spike_event_conditions(&self, id: NeuronGroupId) -> Vec<(String, String)> {
        let mut conditions: Vec<(String, String)> = Vec::new();
        for sg_id in &self.neuron_group(id).out_syn {
            let sg = self.synapse_group(*sg_id);
            if sg.is_spike_event_required() {
                let entry = (
                    sg.wu_model.event_threshold_condition_code.clone(),
                    sg.wu_model.support_code.clone(),
                );
                if !conditions.contains(&entry) {
                    conditions.push(entry);
                }
            }
        }
        conditions
    }
}
