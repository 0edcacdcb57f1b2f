use std::sync::Arc;

use super::types::{SpanType, SynapseMatrixType, Var, VarInit};
use super::NeuronGroupId;

/// Value-typed description of a weight update model.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeightUpdateModel {
    pub vars: Vec<Var>,
    pub param_names: Vec<String>,
    pub derived_param_names: Vec<String>,
    pub sim_code: String,
    pub event_code: String,
    pub event_threshold_condition_code: String,
    pub learn_post_code: String,
    pub synapse_dynamics_code: String,
    pub support_code: String,
}

/// Value-typed description of a postsynaptic model.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PostsynapticModel {
    pub vars: Vec<Var>,
    pub param_names: Vec<String>,
    pub derived_param_names: Vec<String>,
    pub apply_input_code: String,
    pub decay_code: String,
    pub support_code: String,
}

/// Sparse/bitmask connectivity initialisation snippet: row build code
/// calling `$(addSynapse, j)` and `$(endRow)`, plus per-row state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SparseConnectivityInit {
    pub row_build_code: String,
    /// (name, type, initial value expression) per state variable.
    pub row_build_state_vars: Vec<(String, String, String)>,
    pub param_names: Vec<String>,
    pub params: Vec<f64>,
}

impl SparseConnectivityInit {
    pub fn can_merge_with(&self, other: &SparseConnectivityInit) -> bool {
        self.row_build_code == other.row_build_code
            && self.row_build_state_vars == other.row_build_state_vars
            && self.param_names == other.param_names
    }
}

/// A directed connection between two neuron groups.
#[derive(Debug, Clone)]
pub struct SynapseGroup {
    pub name: String,
    pub matrix_type: SynapseMatrixType,
    /// Axonal delay in timesteps; 0 means none.
    pub delay_steps: u32,
    /// Dendritic delay ring length; 1 means no dendritic delay.
    pub max_dendritic_delay_timesteps: u32,
    pub src: NeuronGroupId,
    pub trg: NeuronGroupId,
    pub wu_model: Arc<WeightUpdateModel>,
    pub wu_params: Vec<f64>,
    pub wu_derived_params: Vec<f64>,
    pub wu_var_initialisers: Vec<VarInit>,
    pub ps_model: Arc<PostsynapticModel>,
    pub ps_params: Vec<f64>,
    pub ps_derived_params: Vec<f64>,
    pub ps_var_initialisers: Vec<VarInit>,
    pub connectivity_init: Option<SparseConnectivityInit>,
    pub span_type: SpanType,
    /// Maximum row length (presynaptic fan-out) for SPARSE matrices.
    pub max_row_length: Option<u32>,
    /// Maximum column length (postsynaptic fan-in) for SPARSE matrices.
    pub max_col_length: Option<u32>,
    /// Postsynaptic model shares its `inSyn` target with other groups,
    /// so accumulation into it must be atomic.
    pub ps_model_merged: bool,
    /// Re-evaluate the event threshold on the postsynaptic side.
    pub event_threshold_retest_required: bool,
}

impl SynapseGroup {
    pub fn new(
        name: impl Into<String>,
        matrix_type: SynapseMatrixType,
        delay_steps: u32,
        src: NeuronGroupId,
        trg: NeuronGroupId,
        wu_model: Arc<WeightUpdateModel>,
        ps_model: Arc<PostsynapticModel>,
    ) -> SynapseGroup {
        SynapseGroup {
            name: name.into(),
            matrix_type,
            delay_steps,
            max_dendritic_delay_timesteps: 1,
            src,
            trg,
            wu_model,
            wu_params: Vec::new(),
            wu_derived_params: Vec::new(),
            wu_var_initialisers: Vec::new(),
            ps_model,
            ps_params: Vec::new(),
            ps_derived_params: Vec::new(),
            ps_var_initialisers: Vec::new(),
            connectivity_init: None,
            span_type: SpanType::Postsynaptic,
            max_row_length: None,
            max_col_length: None,
            ps_model_merged: false,
            event_threshold_retest_required: false,
        }
    }

    pub fn with_wu_params(mut self, params: Vec<f64>, derived: Vec<f64>) -> Self {
        self.wu_params = params;
        self.wu_derived_params = derived;
        self
    }

    pub fn with_wu_var_initialisers(mut self, inits: Vec<VarInit>) -> Self {
        self.wu_var_initialisers = inits;
        self
    }

    pub fn with_ps_params(mut self, params: Vec<f64>, derived: Vec<f64>) -> Self {
        self.ps_params = params;
        self.ps_derived_params = derived;
        self
    }

    pub fn with_ps_var_initialisers(mut self, inits: Vec<VarInit>) -> Self {
        self.ps_var_initialisers = inits;
        self
    }

    pub fn with_connectivity_init(mut self, init: SparseConnectivityInit) -> Self {
        self.connectivity_init = Some(init);
        self
    }

    pub fn with_span_type(mut self, span: SpanType) -> Self {
        self.span_type = span;
        self
    }

    pub fn with_max_row_length(mut self, n: u32) -> Self {
        self.max_row_length = Some(n);
        self
    }

    pub fn with_max_col_length(mut self, n: u32) -> Self {
        self.max_col_length = Some(n);
        self
    }

    pub fn with_max_dendritic_delay_timesteps(mut self, n: u32) -> Self {
        self.max_dendritic_delay_timesteps = n;
        self
    }

    pub fn is_true_spike_required(&self) -> bool {
        !self.wu_model.sim_code.is_empty()
    }

    pub fn is_spike_event_required(&self) -> bool {
        !self.wu_model.event_code.is_empty()
            && !self.wu_model.event_threshold_condition_code.is_empty()
    }

    pub fn is_dendritic_delay_required(&self) -> bool {
        self.max_dendritic_delay_timesteps > 1
    }

    pub fn is_wu_var_init_required(&self) -> bool {
        self.matrix_type.contains(SynapseMatrixType::INDIVIDUAL_G)
            && self.wu_var_initialisers.iter().any(|v| !v.code.is_empty())
    }

    pub fn is_sparse_connectivity_init_required(&self) -> bool {
        self.connectivity_init.is_some()
    }

    pub fn is_wu_init_rng_required(&self) -> bool {
        self.wu_var_initialisers.iter().any(|v| v.code.contains("$(gennrand"))
            || self
                .connectivity_init
                .as_ref()
                .map(|c| c.row_build_code.contains("$(gennrand"))
                .unwrap_or(false)
    }

    /// Name of the postsynaptic input target this group accumulates
    /// into (`inSyn<target>` and friends).
    pub fn ps_model_target_name(&self) -> &str {
        &self.name
    }
}
