//! Coverage for the less common paths: presynaptic-span updates,
//! dendritic delay ring buffers, the synapse dynamics kernel and
//! current sources.

mod common;

use std::sync::Arc;

use common::{add_lif, default_backend, empty_model, exp_curr_psm, one_to_one_connectivity, static_pulse_wu};
use spikegen::model::{
    CurrentSource, CurrentSourceModel, SpanType, SynapseGroup, SynapseMatrixType, VarInit,
    WeightUpdateModel,
};
use spikegen::ModelMerged;

#[test]
fn presynaptic_span_uses_pre_span_strategy() {
    let mut model = empty_model("prespan");
    let pre = add_lif(&mut model, "Pre", 100);
    let post = add_lif(&mut model, "Post", 400);
    model
        .add_synapse_group(
            SynapseGroup::new(
                "Syn",
                SynapseMatrixType::SPARSE_GLOBALG,
                0,
                pre,
                post,
                static_pulse_wu(),
                exp_curr_psm(),
            )
            .with_span_type(SpanType::Presynaptic)
            .with_wu_var_initialisers(vec![VarInit::constant(0.1)])
            .with_ps_params(vec![5.0], vec![0.98])
            .with_connectivity_init(one_to_one_connectivity())
            .with_max_row_length(4),
        )
        .unwrap();

    let backend = default_backend();
    let sg = model.synapse_group_ids().next().unwrap();
    assert_eq!(backend.presynaptic_update_strategy(&model, sg).unwrap().name(), "PreSpan");

    let generated = spikegen::generate(&model, &backend).unwrap();
    let device = &generated.synapse_update.device_source;
    assert!(device.contains("const unsigned int preInd = group->srcSpk["));
    assert!(device.contains("for(unsigned int i = 0; i < npost; i++, synAddress++)"));
    assert!(
        device.contains("atomic_add_f_global(&group->inSyn[ipost], 0.1f);"),
        "PreSpan always accumulates atomically into global memory"
    );
}

#[test]
fn dendritic_delay_cycles_and_drains() {
    let mut model = empty_model("dendritic");
    let pre = add_lif(&mut model, "Pre", 30);
    let post = add_lif(&mut model, "Post", 30);
    let wu = Arc::new(WeightUpdateModel {
        vars: vec![spikegen::model::Var::new("g", "scalar")],
        sim_code: "$(addToInSynDelay, $(g), 1);\n".into(),
        ..WeightUpdateModel::default()
    });
    model
        .add_synapse_group(
            SynapseGroup::new("Syn", SynapseMatrixType::DENSE_GLOBALG, 0, pre, post, wu, exp_curr_psm())
                .with_wu_var_initialisers(vec![VarInit::constant(0.1)])
                .with_ps_params(vec![5.0], vec![0.98])
                .with_max_dendritic_delay_timesteps(10),
        )
        .unwrap();

    let merged = ModelMerged::new(&model);
    assert_eq!(merged.synapse_dendritic_delay_update_groups.len(), 1);

    let generated = spikegen::generate(&model, &default_backend()).unwrap();
    let device = &generated.synapse_update.device_source;
    assert!(device.contains("__kernel void preSynapseResetKernel"));
    assert!(device.contains("*group->denDelayPtr = (*group->denDelayPtr + 1) % 10;"));
    assert!(device.contains("atomic_add_f_global(&group->denDelay["));

    // The neuron kernel drains the current ring slot into inSyn.
    let neuron = &generated.neuron_update.device_source;
    assert!(neuron.contains("denDelayOffsetInSyn0"));
    assert!(neuron.contains("linSynInSyn0 += group->denDelayInSyn0[denDelayOffsetInSyn0];"));
}

#[test]
fn synapse_dynamics_kernel_walks_the_remap() {
    let mut model = empty_model("dynamics");
    let pre = add_lif(&mut model, "Pre", 64);
    let post = add_lif(&mut model, "Post", 64);
    let wu = Arc::new(WeightUpdateModel {
        vars: vec![spikegen::model::Var::new("g", "scalar")],
        sim_code: "$(addToInSyn, $(g));\n".into(),
        synapse_dynamics_code: "$(g) *= 0.999f;\n".into(),
        ..WeightUpdateModel::default()
    });
    model
        .add_synapse_group(
            SynapseGroup::new("Syn", SynapseMatrixType::SPARSE_INDIVIDUALG, 0, pre, post, wu, exp_curr_psm())
                .with_wu_var_initialisers(vec![VarInit::constant(0.5)])
                .with_ps_params(vec![5.0], vec![0.98])
                .with_connectivity_init(one_to_one_connectivity())
                .with_max_row_length(2),
        )
        .unwrap();

    let merged = ModelMerged::new(&model);
    assert_eq!(merged.synapse_dynamics_groups.len(), 1);

    let generated = spikegen::generate(&model, &default_backend()).unwrap();
    let device = &generated.synapse_update.device_source;
    assert!(device.contains("__kernel void updateSynapseDynamicsKernel"));
    assert!(device.contains(" < group->synRemap[0])"));
    assert!(device.contains("const unsigned int s = group->synRemap[1 + "));
    assert!(device.contains("group->g[s] *= 0.999f;"));

    // The sparse init pass builds the remap with a per-block prefix sum.
    let init = &generated.init.device_source;
    assert!(init.contains("shRowStart[i + 1] = rowStart;"));
    assert!(init.contains("group->synRemap[0] = shRowStart[numRowsInBlock];"));
}

#[test]
fn current_sources_inject_into_isyn() {
    let mut model = empty_model("current");
    let pop = add_lif(&mut model, "Pop", 25);
    let cs_model = Arc::new(CurrentSourceModel {
        vars: vec![],
        param_names: vec!["amp".into()],
        injection_code: "$(injectCurrent, $(amp));\n".into(),
    });
    model.add_current_source(
        pop,
        CurrentSource { name: "Stim".into(), model: cs_model, params: vec![1.5], var_initialisers: vec![] },
    );

    let generated = spikegen::generate(&model, &default_backend()).unwrap();
    let device = &generated.neuron_update.device_source;
    assert!(device.contains("// current source Stim"));
    assert!(device.contains("Isyn += 1.5f;"), "injectCurrent expands into an Isyn update");
}
