//! A single neuron group and no synapses: one merged neuron update
//! group, padded launch dimensions and no synapse kernels.

mod common;

use common::{add_lif, brace_balance, default_backend, empty_model};

#[test]
fn single_population_generates_one_merged_group() {
    let mut model = empty_model("single");
    add_lif(&mut model, "Pop", 100);

    let backend = default_backend();
    let generated = spikegen::generate(&model, &backend).unwrap();

    let device = &generated.neuron_update.device_source;
    assert!(device.contains("struct MergedNeuronUpdateGroup0"), "merged group 0 struct expected");
    assert!(!device.contains("MergedNeuronUpdateGroup1"), "exactly one merged group expected");

    // 100 neurons at workgroup size 32 pad to 128 threads.
    assert!(device.contains("if(id < 128)"), "dispatcher should route the padded range");
    assert!(
        generated.neuron_update.host_source.contains("globalWorkSize(128, 1)"),
        "launch should cover the padded thread count"
    );
}

#[test]
fn no_synapse_kernels_without_synapse_groups() {
    let mut model = empty_model("single");
    add_lif(&mut model, "Pop", 100);

    let backend = default_backend();
    let generated = spikegen::generate(&model, &backend).unwrap();

    let device = &generated.synapse_update.device_source;
    assert!(!device.contains("__kernel void updatePresynapticKernel"));
    assert!(!device.contains("__kernel void updatePostsynapticKernel"));
    assert!(!device.contains("__kernel void preSynapseResetKernel"));
    assert!(!generated.init.device_source.contains("MergedSynapseDenseInitGroup"));
}

#[test]
fn generated_sources_are_well_formed() {
    let mut model = empty_model("single");
    add_lif(&mut model, "Pop", 100);

    let backend = default_backend();
    let generated = spikegen::generate(&model, &backend).unwrap();

    for source in [
        &generated.neuron_update.device_source,
        &generated.synapse_update.device_source,
        &generated.init.device_source,
    ] {
        assert_eq!(brace_balance(source), 0, "kernel source braces must balance");
        assert!(!source.contains("$("), "no unresolved substitution tokens");
    }
}
