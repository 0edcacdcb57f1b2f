//! Generating the same model twice must produce byte-identical text
//! for every emitted stream.

mod common;

use common::{add_lif, default_backend, empty_model, exp_curr_psm, learning_wu, one_to_one_connectivity, static_pulse_wu};
use spikegen::model::{SynapseGroup, SynapseMatrixType, VarInit};

fn build_model() -> spikegen::ModelSpec {
    let mut model = empty_model("full");
    let a = add_lif(&mut model, "Exc", 200);
    let b = add_lif(&mut model, "Inh", 50);
    let c = add_lif(&mut model, "Out", 10);

    model
        .add_synapse_group(
            SynapseGroup::new("ExcInh", SynapseMatrixType::DENSE_INDIVIDUALG, 0, a, b, static_pulse_wu(), exp_curr_psm())
                .with_wu_var_initialisers(vec![VarInit::constant(0.1)])
                .with_ps_params(vec![5.0], vec![0.98]),
        )
        .unwrap();
    model
        .add_synapse_group(
            SynapseGroup::new("InhOut", SynapseMatrixType::SPARSE_INDIVIDUALG, 2, b, c, learning_wu(), exp_curr_psm())
                .with_wu_params(vec![1.0], vec![])
                .with_wu_var_initialisers(vec![VarInit::constant(0.3)])
                .with_ps_params(vec![10.0], vec![0.99])
                .with_connectivity_init(one_to_one_connectivity())
                .with_max_row_length(4)
                .with_max_col_length(16),
        )
        .unwrap();
    model
}

#[test]
fn repeated_generation_is_byte_identical() {
    let first = spikegen::generate(&build_model(), &default_backend()).unwrap();
    let second = spikegen::generate(&build_model(), &default_backend()).unwrap();

    assert_eq!(first.neuron_update.device_source, second.neuron_update.device_source);
    assert_eq!(first.neuron_update.host_source, second.neuron_update.host_source);
    assert_eq!(first.synapse_update.device_source, second.synapse_update.device_source);
    assert_eq!(first.synapse_update.host_source, second.synapse_update.host_source);
    assert_eq!(first.init.device_source, second.init.device_source);
    assert_eq!(first.init.host_source, second.init.host_source);
    assert_eq!(first.runner_source, second.runner_source);
}

#[test]
fn regenerating_from_the_same_instance_matches() {
    let model = build_model();
    let backend = default_backend();
    let first = spikegen::generate(&model, &backend).unwrap();
    let second = spikegen::generate(&model, &backend).unwrap();
    assert_eq!(first.neuron_update.device_source, second.neuron_update.device_source);
    assert_eq!(first.runner_source, second.runner_source);
}
