//! Dense connectivity with an individual postsynaptic model: dense
//! init parallelised over target neurons, PostSpan presynaptic update
//! with register accumulation and no sparse init pass.

mod common;

use common::{add_lif, default_backend, empty_model, exp_curr_psm, static_pulse_wu};
use spikegen::model::{SynapseGroup, SynapseMatrixType, VarInit};
use spikegen::ModelMerged;

fn dense_model() -> spikegen::ModelSpec {
    let mut model = empty_model("dense");
    let pre = add_lif(&mut model, "Pre", 10);
    let post = add_lif(&mut model, "Post", 20);
    model
        .add_synapse_group(
            SynapseGroup::new(
                "Syn",
                SynapseMatrixType::DENSE_INDIVIDUALG,
                0,
                pre,
                post,
                static_pulse_wu(),
                exp_curr_psm(),
            )
            .with_wu_var_initialisers(vec![VarInit::constant(0.5)])
            .with_ps_params(vec![5.0], vec![0.98]),
        )
        .unwrap();
    model
}

#[test]
fn dense_init_is_parallelised_over_target_neurons() {
    let model = dense_model();
    let merged = ModelMerged::new(&model);
    assert_eq!(merged.synapse_dense_init_groups.len(), 1);
    assert!(merged.synapse_sparse_init_groups.is_empty(), "dense matrices need no sparse init");
    assert!(merged.synapse_connectivity_init_groups.is_empty());

    let backend = default_backend();
    let generated = spikegen::generate(&model, &backend).unwrap();
    let device = &generated.init.device_source;
    assert!(device.contains("struct MergedSynapseDenseInitGroup0"));
    assert!(device.contains(" < group->numTrgNeurons)"), "one thread per postsynaptic neuron");
    assert!(!device.contains("MergedSynapseSparseInitGroup"));
}

#[test]
fn dense_presynaptic_update_accumulates_in_register() {
    let model = dense_model();
    let backend = default_backend();

    // PostSpan is the compatible strategy for postsynaptic-span groups.
    let sg = model.synapse_group_ids().next().unwrap();
    let strategy = backend.presynaptic_update_strategy(&model, sg).unwrap();
    assert_eq!(strategy.name(), "PostSpan");

    let generated = spikegen::generate(&model, &backend).unwrap();
    let device = &generated.synapse_update.device_source;
    assert!(device.contains("linSyn = 0;"), "register accumulation expected");
    assert!(device.contains("group->inSyn[id] += linSyn;"), "plain write-back for unmerged PSM");
    assert!(!device.contains("shLg"), "no shared-memory accumulation for dense matrices");
}
