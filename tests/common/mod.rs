//! Shared model builders for the generator tests: a LIF-like neuron
//! model, a static pulse weight update and an exponential-current
//! postsynaptic model.
#![allow(dead_code)]

use std::sync::Arc;

use spikegen::backend::{Backend, Preferences};
use spikegen::model::{
    ModelSpec, NeuronGroupId, NeuronModel, PostsynapticModel, ScalarType, SparseConnectivityInit,
    Var, VarInit, WeightUpdateModel,
};

pub fn lif_model() -> Arc<NeuronModel> {
    Arc::new(NeuronModel {
        vars: vec![Var::new("V", "scalar")],
        param_names: vec!["tau".into(), "Vthresh".into(), "Vreset".into()],
        sim_code: "$(V) += ($(Isyn) - $(V)) * (DT / $(tau));\n".into(),
        threshold_condition_code: "$(V) >= $(Vthresh)".into(),
        reset_code: "$(V) = $(Vreset);\n".into(),
        ..NeuronModel::default()
    })
}

/// A second, structurally different neuron model.
pub fn izhikevich_like_model() -> Arc<NeuronModel> {
    Arc::new(NeuronModel {
        vars: vec![Var::new("V", "scalar"), Var::new("U", "scalar")],
        param_names: vec!["a".into(), "b".into()],
        sim_code: "$(V) += (0.04f * $(V) * $(V)) + $(Isyn);\n$(U) += $(a) * (($(b) * $(V)) - $(U));\n".into(),
        threshold_condition_code: "$(V) >= 30.0f".into(),
        reset_code: "$(V) = -65.0f;\n".into(),
        ..NeuronModel::default()
    })
}

pub fn static_pulse_wu() -> Arc<WeightUpdateModel> {
    Arc::new(WeightUpdateModel {
        vars: vec![Var::new("g", "scalar")],
        sim_code: "$(addToInSyn, $(g));\n".into(),
        ..WeightUpdateModel::default()
    })
}

pub fn learning_wu() -> Arc<WeightUpdateModel> {
    Arc::new(WeightUpdateModel {
        vars: vec![Var::new("g", "scalar")],
        param_names: vec!["gMax".into()],
        sim_code: "$(addToInSyn, $(g));\n".into(),
        learn_post_code: "$(g) = fmin($(gMax), $(g) + 0.01f);\n".into(),
        ..WeightUpdateModel::default()
    })
}

pub fn event_wu() -> Arc<WeightUpdateModel> {
    Arc::new(WeightUpdateModel {
        vars: vec![Var::new("g", "scalar")],
        event_code: "$(addToInSyn, $(g));\n".into(),
        event_threshold_condition_code: "$(V_pre) >= -30.0f".into(),
        ..WeightUpdateModel::default()
    })
}

pub fn exp_curr_psm() -> Arc<PostsynapticModel> {
    Arc::new(PostsynapticModel {
        param_names: vec!["tauSyn".into()],
        derived_param_names: vec!["expDecay".into()],
        apply_input_code: "$(Isyn) += $(inSyn);\n".into(),
        decay_code: "$(inSyn) *= $(expDecay);\n".into(),
        ..PostsynapticModel::default()
    })
}

pub fn one_to_one_connectivity() -> SparseConnectivityInit {
    SparseConnectivityInit {
        row_build_code: "$(addSynapse, $(id_pre));\n$(endRow);\n".into(),
        ..SparseConnectivityInit::default()
    }
}

pub fn empty_model(name: &str) -> ModelSpec {
    ModelSpec::new(name, 0.1, ScalarType::Float, ScalarType::Float)
}

pub fn add_lif(model: &mut ModelSpec, name: &str, n: u32) -> NeuronGroupId {
    model
        .add_neuron_group(
            name,
            n,
            lif_model(),
            vec![20.0, -50.0, -60.0],
            vec![],
            vec![VarInit::constant(-60.0)],
        )
        .expect("failed to add LIF group")
}

pub fn default_backend() -> Backend {
    Backend::new(Preferences::default())
}

/// Count of unbalanced braces; zero means every `{` has a `}`.
pub fn brace_balance(code: &str) -> i64 {
    let mut depth = 0i64;
    for ch in code.chars() {
        match ch {
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
    }
    depth
}
