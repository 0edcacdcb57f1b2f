use crate::model::{ModelSpec, NeuronGroupId, SynapseGroupId};

/// Roles a merged neuron group can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeuronRole {
    Update,
    SpikeQueueUpdate,
    Init,
}

/// Roles a merged synapse group can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynapseRole {
    PresynapticUpdate,
    PostsynapticUpdate,
    SynapseDynamics,
    DenseInit,
    ConnectivityInit,
    SparseInit,
    DendriticDelayUpdate,
}

impl SynapseRole {
    /// Struct/array name component, e.g. `MergedPresynapticUpdateGroup0`.
    pub fn prefix(self) -> &'static str {
        match self {
            SynapseRole::PresynapticUpdate => "PresynapticUpdate",
            SynapseRole::PostsynapticUpdate => "PostsynapticUpdate",
            SynapseRole::SynapseDynamics => "SynapseDynamics",
            SynapseRole::DenseInit => "SynapseDenseInit",
            SynapseRole::ConnectivityInit => "SynapseConnectivityInit",
            SynapseRole::SparseInit => "SynapseSparseInit",
            SynapseRole::DendriticDelayUpdate => "SynapseDendriticDelayUpdate",
        }
    }
}

impl NeuronRole {
    pub fn prefix(self) -> &'static str {
        match self {
            NeuronRole::Update => "NeuronUpdate",
            NeuronRole::SpikeQueueUpdate => "NeuronSpikeQueueUpdate",
            NeuronRole::Init => "NeuronInit",
        }
    }
}

/// An equivalence class of neuron groups that share one kernel branch.
/// The first member is the archetype: all structural decisions during
/// emission are made from it.
#[derive(Debug, Clone)]
pub struct MergedNeuronGroup {
    pub index: usize,
    pub role: NeuronRole,
    pub groups: Vec<NeuronGroupId>,
}

impl MergedNeuronGroup {
    pub fn archetype(&self) -> NeuronGroupId {
        self.groups[0]
    }
}

/// An equivalence class of synapse groups sharing one kernel branch.
#[derive(Debug, Clone)]
pub struct MergedSynapseGroup {
    pub index: usize,
    pub role: SynapseRole,
    pub groups: Vec<SynapseGroupId>,
}

impl MergedSynapseGroup {
    pub fn archetype(&self) -> SynapseGroupId {
        self.groups[0]
    }
}

/// First-fit merge: each group joins the first proto-merged group whose
/// archetype it is compatible with, otherwise starts a new one. Input
/// is sorted by group name first so the partition (and therefore all
/// emitted text) is identical across runs.
pub fn create_merged_groups<Id: Copy>(
    model: &ModelSpec,
    mut ids: Vec<Id>,
    name: impl Fn(&ModelSpec, Id) -> String,
    can_merge: impl Fn(&ModelSpec, Id, Id) -> bool,
) -> Vec<Vec<Id>> {
    ids.sort_by_key(|id| name(model, *id));

    let mut proto: Vec<Vec<Id>> = Vec::new();
    for id in ids {
        match proto.iter_mut().find(|p| can_merge(model, p[0], id)) {
            Some(p) => p.push(id),
            None => proto.push(vec![id]),
        }
    }
    proto
}
