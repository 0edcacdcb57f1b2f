//! The runner translation unit: stable entry point names, state
//! declarations, allocation and the push/pull helper family.

mod common;

use common::{add_lif, default_backend, empty_model, exp_curr_psm, static_pulse_wu};
use spikegen::backend::{Backend, Preferences};
use spikegen::model::{SynapseGroup, SynapseMatrixType, VarInit};

fn model_with_synapse() -> spikegen::ModelSpec {
    let mut model = empty_model("runner");
    let a = add_lif(&mut model, "Pop", 40);
    let b = add_lif(&mut model, "Target", 10);
    model
        .add_synapse_group(
            SynapseGroup::new("Syn", SynapseMatrixType::DENSE_INDIVIDUALG, 0, a, b, static_pulse_wu(), exp_curr_psm())
                .with_wu_var_initialisers(vec![VarInit::constant(0.1)])
                .with_ps_params(vec![5.0], vec![0.98]),
        )
        .unwrap();
    model
}

#[test]
fn stable_entry_points_are_emitted() {
    let model = model_with_synapse();
    let generated = spikegen::generate(&model, &default_backend()).unwrap();

    assert!(generated.init.host_source.contains("void buildInitializeProgram()"));
    assert!(generated.neuron_update.host_source.contains("void buildNeuronUpdateProgram()"));
    assert!(generated.synapse_update.host_source.contains("void buildSynapseUpdateProgram()"));
    assert!(generated.init.host_source.contains("void initialize()"));
    assert!(generated.init.host_source.contains("void initializeSparse()"));
    assert!(generated.neuron_update.host_source.contains("void updateNeurons(float t)"));
    assert!(generated.synapse_update.host_source.contains("void updateSynapses(float t)"));

    let runner = &generated.runner_source;
    assert!(runner.contains("void pushPopStateToDevice(bool uninitialisedOnly)"));
    assert!(runner.contains("void pullPopStateFromDevice()"));
    assert!(runner.contains("void pushCurrentPopSpikesToDevice()"));
    assert!(runner.contains("void pullCurrentPopSpikesFromDevice()"));
    assert!(runner.contains("void pushVPopToDevice(bool uninitialisedOnly)"));
    assert!(runner.contains("void allocateMem()"));
}

#[test]
fn state_arrays_are_declared_and_allocated() {
    let model = model_with_synapse();
    let generated = spikegen::generate(&model, &default_backend()).unwrap();
    let runner = &generated.runner_source;

    assert!(runner.contains("scalar* VPop;") || runner.contains("scalar* VPop;\n") || runner.contains("scalar* VPop;"));
    assert!(runner.contains("cl::Buffer d_VPop;"));
    assert!(runner.contains("cl::Buffer d_glbSpkCntPop;"));
    assert!(runner.contains("VPop = new scalar[40];"));
    assert!(runner.contains("gPop") == false, "weight variable belongs to the synapse group");
    assert!(runner.contains("cl::Buffer d_gSyn;"));
    assert!(runner.contains("gSyn = new scalar[400];"), "dense weight array spans src x trg");
}

#[test]
fn automatic_copy_suppresses_transfers() {
    let model = model_with_synapse();
    let backend = Backend::new(Preferences { automatic_copy: true, ..Preferences::default() });
    let generated = spikegen::generate(&model, &backend).unwrap();
    assert!(
        !generated.runner_source.contains("enqueueWriteBuffer"),
        "zero-copy configurations must not emit pushes"
    );
    assert!(!generated.runner_source.contains("enqueueReadBuffer"));
}

#[test]
fn spike_queue_pointer_update_is_serialised_before_neuron_update() {
    // Kernel enqueue order inside updateNeurons provides the ordering.
    let mut model = empty_model("queue");
    let a = add_lif(&mut model, "Src", 10);
    let b = add_lif(&mut model, "Dst", 10);
    model
        .add_synapse_group(
            SynapseGroup::new("D", SynapseMatrixType::DENSE_INDIVIDUALG, 3, a, b, static_pulse_wu(), exp_curr_psm())
                .with_wu_var_initialisers(vec![VarInit::constant(0.1)])
                .with_ps_params(vec![5.0], vec![0.98]),
        )
        .unwrap();

    let generated = spikegen::generate(&model, &default_backend()).unwrap();
    let host = &generated.neuron_update.host_source;
    let reset = host.find("enqueueNDRangeKernel(preNeuronResetKernel").expect("reset launch");
    let update = host.find("enqueueNDRangeKernel(updateNeuronsKernel").expect("update launch");
    assert!(reset < update, "spike queue cycling must be enqueued first");
}
