use tracing::debug;

use crate::model::{ModelSpec, NeuronGroupId, SynapseGroupId, SynapseMatrixType};

use super::merged::{create_merged_groups, MergedNeuronGroup, MergedSynapseGroup, NeuronRole, SynapseRole};
use super::support_code::SupportCodeMerged;

/// The model partitioned into merged groups, one vector per role, plus
/// the deduplicated support code for each kernel program. Built once,
/// immutable during emission.
pub struct ModelMerged<'m> {
    model: &'m ModelSpec,

    pub neuron_update_groups: Vec<MergedNeuronGroup>,
    pub neuron_spike_queue_update_groups: Vec<MergedNeuronGroup>,
    pub neuron_init_groups: Vec<MergedNeuronGroup>,

    pub presynaptic_update_groups: Vec<MergedSynapseGroup>,
    pub postsynaptic_update_groups: Vec<MergedSynapseGroup>,
    pub synapse_dynamics_groups: Vec<MergedSynapseGroup>,
    pub synapse_dense_init_groups: Vec<MergedSynapseGroup>,
    pub synapse_connectivity_init_groups: Vec<MergedSynapseGroup>,
    pub synapse_sparse_init_groups: Vec<MergedSynapseGroup>,
    pub synapse_dendritic_delay_update_groups: Vec<MergedSynapseGroup>,

    pub neuron_update_support_code: SupportCodeMerged,
    pub postsynaptic_dynamics_support_code: SupportCodeMerged,
    pub presynaptic_update_support_code: SupportCodeMerged,
    pub postsynaptic_update_support_code: SupportCodeMerged,
    pub synapse_dynamics_support_code: SupportCodeMerged,
}

impl<'m> ModelMerged<'m> {
    pub fn new(model: &'m ModelSpec) -> ModelMerged<'m> {
        let neuron_ids: Vec<NeuronGroupId> = model.neuron_group_ids().collect();
        let synapse_ids: Vec<SynapseGroupId> = model.synapse_group_ids().collect();

        let neuron_update_groups = build_neuron(
            model,
            neuron_ids.clone(),
            NeuronRole::Update,
            |_| true,
            can_merge_neuron_update,
        );
        let neuron_spike_queue_update_groups = build_neuron(
            model,
            neuron_ids.clone(),
            NeuronRole::SpikeQueueUpdate,
            |_| true,
            can_merge_neuron_spike_queue,
        );
        let neuron_init_groups =
            build_neuron(model, neuron_ids, NeuronRole::Init, |_| true, can_merge_neuron_init);

        let presynaptic_update_groups = build_synapse(
            model,
            synapse_ids.clone(),
            SynapseRole::PresynapticUpdate,
            |m, id| {
                let sg = m.synapse_group(id);
                sg.is_true_spike_required() || sg.is_spike_event_required()
            },
            can_merge_presynaptic,
        );
        let postsynaptic_update_groups = build_synapse(
            model,
            synapse_ids.clone(),
            SynapseRole::PostsynapticUpdate,
            |m, id| !m.synapse_group(id).wu_model.learn_post_code.is_empty(),
            can_merge_postsynaptic,
        );
        let synapse_dynamics_groups = build_synapse(
            model,
            synapse_ids.clone(),
            SynapseRole::SynapseDynamics,
            |m, id| !m.synapse_group(id).wu_model.synapse_dynamics_code.is_empty(),
            can_merge_synapse_dynamics,
        );
        let synapse_dense_init_groups = build_synapse(
            model,
            synapse_ids.clone(),
            SynapseRole::DenseInit,
            |m, id| {
                let sg = m.synapse_group(id);
                sg.matrix_type.contains(SynapseMatrixType::DENSE) && sg.is_wu_var_init_required()
            },
            can_merge_dense_init,
        );
        let synapse_connectivity_init_groups = build_synapse(
            model,
            synapse_ids.clone(),
            SynapseRole::ConnectivityInit,
            |m, id| m.synapse_group(id).is_sparse_connectivity_init_required(),
            can_merge_connectivity_init,
        );
        let synapse_sparse_init_groups = build_synapse(
            model,
            synapse_ids.clone(),
            SynapseRole::SparseInit,
            |m, id| is_sparse_init_required(m, id),
            can_merge_sparse_init,
        );
        let synapse_dendritic_delay_update_groups = build_synapse(
            model,
            synapse_ids,
            SynapseRole::DendriticDelayUpdate,
            |m, id| m.synapse_group(id).is_dendritic_delay_required(),
            |m, a, b| {
                m.synapse_group(a).max_dendritic_delay_timesteps
                    == m.synapse_group(b).max_dendritic_delay_timesteps
            },
        );

        // Deduplicate support code per kernel program.
        let mut neuron_update_support_code = SupportCodeMerged::new("NeuronUpdateSupportCode");
        let mut postsynaptic_dynamics_support_code =
            SupportCodeMerged::new("PostsynapticDynamicsSupportCode");
        for id in model.neuron_group_ids() {
            let ng = model.neuron_group(id);
            neuron_update_support_code.add_support_code(&ng.model.support_code);
            for sg_id in ng.in_syn() {
                postsynaptic_dynamics_support_code
                    .add_support_code(&model.synapse_group(*sg_id).ps_model.support_code);
            }
            // Spike-event conditions run inside the neuron kernel, so
            // their weight-update support code must live there too.
            for (_, support) in model.spike_event_conditions(id) {
                neuron_update_support_code.add_support_code(&support);
            }
        }

        let mut presynaptic_update_support_code =
            SupportCodeMerged::new("PresynapticUpdateSupportCode");
        let mut postsynaptic_update_support_code =
            SupportCodeMerged::new("PostsynapticUpdateSupportCode");
        let mut synapse_dynamics_support_code =
            SupportCodeMerged::new("SynapseDynamicsSupportCode");
        for id in model.synapse_group_ids() {
            let sg = model.synapse_group(id);
            if sg.is_true_spike_required() || sg.is_spike_event_required() {
                presynaptic_update_support_code.add_support_code(&sg.wu_model.support_code);
            }
            if !sg.wu_model.learn_post_code.is_empty() {
                postsynaptic_update_support_code.add_support_code(&sg.wu_model.support_code);
            }
            if !sg.wu_model.synapse_dynamics_code.is_empty() {
                synapse_dynamics_support_code.add_support_code(&sg.wu_model.support_code);
            }
        }

        debug!(
            neuron_update = neuron_update_groups.len(),
            presynaptic_update = presynaptic_update_groups.len(),
            "merged model built"
        );

        ModelMerged {
            model,
            neuron_update_groups,
            neuron_spike_queue_update_groups,
            neuron_init_groups,
            presynaptic_update_groups,
            postsynaptic_update_groups,
            synapse_dynamics_groups,
            synapse_dense_init_groups,
            synapse_connectivity_init_groups,
            synapse_sparse_init_groups,
            synapse_dendritic_delay_update_groups,
            neuron_update_support_code,
            postsynaptic_dynamics_support_code,
            presynaptic_update_support_code,
            postsynaptic_update_support_code,
            synapse_dynamics_support_code,
        }
    }

    pub fn model(&self) -> &ModelSpec {
        self.model
    }
}

fn build_neuron(
    model: &ModelSpec,
    ids: Vec<NeuronGroupId>,
    role: NeuronRole,
    filter: impl Fn(&crate::model::NeuronGroup) -> bool,
    can_merge: fn(&ModelSpec, NeuronGroupId, NeuronGroupId) -> bool,
) -> Vec<MergedNeuronGroup> {
    let ids = ids.into_iter().filter(|id| filter(model.neuron_group(*id))).collect();
    create_merged_groups(model, ids, |m, id| m.neuron_group(id).name.clone(), can_merge)
        .into_iter()
        .enumerate()
        .map(|(index, groups)| MergedNeuronGroup { index, role, groups })
        .collect()
}

fn build_synapse(
    model: &ModelSpec,
    ids: Vec<SynapseGroupId>,
    role: SynapseRole,
    filter: impl Fn(&ModelSpec, SynapseGroupId) -> bool,
    can_merge: impl Fn(&ModelSpec, SynapseGroupId, SynapseGroupId) -> bool,
) -> Vec<MergedSynapseGroup> {
    let ids = ids.into_iter().filter(|id| filter(model, *id)).collect();
    create_merged_groups(model, ids, |m, id| m.synapse_group(id).name.clone(), can_merge)
        .into_iter()
        .enumerate()
        .map(|(index, groups)| MergedSynapseGroup { index, role, groups })
        .collect()
}

/// Sparse initialisation is needed when the matrix is SPARSE and either
/// per-synapse variables must be filled or the remap structures for
/// postsynaptic learning / synapse dynamics must be built.
pub fn is_sparse_init_required(model: &ModelSpec, id: SynapseGroupId) -> bool {
    let sg = model.synapse_group(id);
    sg.matrix_type.contains(SynapseMatrixType::SPARSE)
        && (sg.is_wu_var_init_required()
            || !sg.wu_model.learn_post_code.is_empty()
            || !sg.wu_model.synapse_dynamics_code.is_empty())
}

// ---------------------------------------------------------------------
// Compatibility predicates. These compare everything that shapes the
// emitted code; numeric parameter values are deliberately excluded
// because heterogeneous values become merged-struct fields.
// ---------------------------------------------------------------------

pub fn can_merge_neuron_update(model: &ModelSpec, a: NeuronGroupId, b: NeuronGroupId) -> bool {
    let (nga, ngb) = (model.neuron_group(a), model.neuron_group(b));
    if nga.model != ngb.model
        || nga.num_delay_slots != ngb.num_delay_slots
        || model.is_true_spike_required(a) != model.is_true_spike_required(b)
        || model.is_spike_event_required(a) != model.is_spike_event_required(b)
        || model.is_spike_time_required(a) != model.is_spike_time_required(b)
        || nga.is_sim_rng_required() != ngb.is_sim_rng_required()
        || model.spike_event_conditions(a) != model.spike_event_conditions(b)
    {
        return false;
    }

    // Incoming postsynaptic inputs must line up pairwise.
    if nga.in_syn().len() != ngb.in_syn().len() {
        return false;
    }
    for (sa, sb) in nga.in_syn().iter().zip(ngb.in_syn()) {
        let (sga, sgb) = (model.synapse_group(*sa), model.synapse_group(*sb));
        if sga.ps_model != sgb.ps_model
            || sga.matrix_type.contains(SynapseMatrixType::INDIVIDUAL_PSM)
                != sgb.matrix_type.contains(SynapseMatrixType::INDIVIDUAL_PSM)
            || sga.is_dendritic_delay_required() != sgb.is_dendritic_delay_required()
            || sga.max_dendritic_delay_timesteps != sgb.max_dendritic_delay_timesteps
            || sga.ps_model_merged != sgb.ps_model_merged
        {
            return false;
        }
    }

    // Current sources must line up pairwise.
    if nga.current_sources.len() != ngb.current_sources.len() {
        return false;
    }
    nga.current_sources
        .iter()
        .zip(&ngb.current_sources)
        .all(|(ca, cb)| ca.model == cb.model)
}

pub fn can_merge_neuron_spike_queue(model: &ModelSpec, a: NeuronGroupId, b: NeuronGroupId) -> bool {
    let (nga, ngb) = (model.neuron_group(a), model.neuron_group(b));
    nga.num_delay_slots == ngb.num_delay_slots
        && model.is_true_spike_required(a) == model.is_true_spike_required(b)
        && model.is_spike_event_required(a) == model.is_spike_event_required(b)
}

pub fn can_merge_neuron_init(model: &ModelSpec, a: NeuronGroupId, b: NeuronGroupId) -> bool {
    if !can_merge_neuron_update(model, a, b) {
        return false;
    }
    let (nga, ngb) = (model.neuron_group(a), model.neuron_group(b));
    if nga.is_init_rng_required() != ngb.is_init_rng_required() {
        return false;
    }
    if !nga
        .var_initialisers
        .iter()
        .zip(&ngb.var_initialisers)
        .all(|(va, vb)| va.can_merge_with(vb))
    {
        return false;
    }
    for (sa, sb) in nga.in_syn().iter().zip(ngb.in_syn()) {
        let (sga, sgb) = (model.synapse_group(*sa), model.synapse_group(*sb));
        if sga.ps_var_initialisers.len() != sgb.ps_var_initialisers.len()
            || !sga
                .ps_var_initialisers
                .iter()
                .zip(&sgb.ps_var_initialisers)
                .all(|(va, vb)| va.can_merge_with(vb))
        {
            return false;
        }
    }
    nga.current_sources.iter().zip(&ngb.current_sources).all(|(ca, cb)| {
        ca.var_initialisers
            .iter()
            .zip(&cb.var_initialisers)
            .all(|(va, vb)| va.can_merge_with(vb))
    })
}

pub fn can_merge_presynaptic(model: &ModelSpec, a: SynapseGroupId, b: SynapseGroupId) -> bool {
    let (sga, sgb) = (model.synapse_group(a), model.synapse_group(b));
    sga.wu_model == sgb.wu_model
        && sga.matrix_type == sgb.matrix_type
        && sga.span_type == sgb.span_type
        && sga.is_dendritic_delay_required() == sgb.is_dendritic_delay_required()
        && sga.ps_model_merged == sgb.ps_model_merged
        && sga.event_threshold_retest_required == sgb.event_threshold_retest_required
        && model.neuron_group(sga.src).is_delay_required()
            == model.neuron_group(sgb.src).is_delay_required()
        && model.neuron_group(sga.trg).is_delay_required()
            == model.neuron_group(sgb.trg).is_delay_required()
}

pub fn can_merge_postsynaptic(model: &ModelSpec, a: SynapseGroupId, b: SynapseGroupId) -> bool {
    let (sga, sgb) = (model.synapse_group(a), model.synapse_group(b));
    sga.wu_model == sgb.wu_model
        && sga.matrix_type == sgb.matrix_type
        && model.neuron_group(sga.src).is_delay_required()
            == model.neuron_group(sgb.src).is_delay_required()
        && model.neuron_group(sga.trg).is_delay_required()
            == model.neuron_group(sgb.trg).is_delay_required()
        && model.is_true_spike_required(sga.trg) == model.is_true_spike_required(sgb.trg)
}

pub fn can_merge_synapse_dynamics(model: &ModelSpec, a: SynapseGroupId, b: SynapseGroupId) -> bool {
    let (sga, sgb) = (model.synapse_group(a), model.synapse_group(b));
    sga.wu_model == sgb.wu_model
        && sga.matrix_type == sgb.matrix_type
        && sga.is_dendritic_delay_required() == sgb.is_dendritic_delay_required()
        && model.neuron_group(sga.src).is_delay_required()
            == model.neuron_group(sgb.src).is_delay_required()
        && model.neuron_group(sga.trg).is_delay_required()
            == model.neuron_group(sgb.trg).is_delay_required()
}

pub fn can_merge_dense_init(model: &ModelSpec, a: SynapseGroupId, b: SynapseGroupId) -> bool {
    let (sga, sgb) = (model.synapse_group(a), model.synapse_group(b));
    sga.matrix_type == sgb.matrix_type
        && sga.wu_model.vars == sgb.wu_model.vars
        && sga
            .wu_var_initialisers
            .iter()
            .zip(&sgb.wu_var_initialisers)
            .all(|(va, vb)| va.can_merge_with(vb))
}

pub fn can_merge_connectivity_init(model: &ModelSpec, a: SynapseGroupId, b: SynapseGroupId) -> bool {
    let (sga, sgb) = (model.synapse_group(a), model.synapse_group(b));
    sga.matrix_type == sgb.matrix_type
        && match (&sga.connectivity_init, &sgb.connectivity_init) {
            (Some(ca), Some(cb)) => ca.can_merge_with(cb),
            _ => false,
        }
}

pub fn can_merge_sparse_init(model: &ModelSpec, a: SynapseGroupId, b: SynapseGroupId) -> bool {
    let (sga, sgb) = (model.synapse_group(a), model.synapse_group(b));
    sga.matrix_type == sgb.matrix_type
        && sga.wu_model.vars == sgb.wu_model.vars
        && sga.is_wu_var_init_required() == sgb.is_wu_var_init_required()
        && sga.wu_model.learn_post_code.is_empty() == sgb.wu_model.learn_post_code.is_empty()
        && sga.wu_model.synapse_dynamics_code.is_empty()
            == sgb.wu_model.synapse_dynamics_code.is_empty()
        && sga
            .wu_var_initialisers
            .iter()
            .zip(&sgb.wu_var_initialisers)
            .all(|(va, vb)| va.can_merge_with(vb))
}
