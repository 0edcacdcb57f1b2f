//! Universal properties of the emitted text: balanced braces, no
//! residual substitution tokens, contiguous disjoint dispatch ranges
//! covering the launch dimensions, and a compatible strategy for every
//! synapse group.

mod common;

use common::{add_lif, brace_balance, default_backend, empty_model, exp_curr_psm, learning_wu, one_to_one_connectivity, static_pulse_wu};
use spikegen::backend::backend::pad_size;
use spikegen::model::{SynapseGroup, SynapseMatrixType, VarInit};
use spikegen::ModelMerged;

fn build_model() -> spikegen::ModelSpec {
    let mut model = empty_model("invariants");
    let a = add_lif(&mut model, "A", 100);
    let b = add_lif(&mut model, "B", 250);
    let c = add_lif(&mut model, "C", 13);

    model
        .add_synapse_group(
            SynapseGroup::new("AB", SynapseMatrixType::DENSE_INDIVIDUALG, 0, a, b, static_pulse_wu(), exp_curr_psm())
                .with_wu_var_initialisers(vec![VarInit::constant(0.1)])
                .with_ps_params(vec![5.0], vec![0.98]),
        )
        .unwrap();
    model
        .add_synapse_group(
            SynapseGroup::new("BC", SynapseMatrixType::SPARSE_INDIVIDUALG, 1, b, c, learning_wu(), exp_curr_psm())
                .with_wu_params(vec![2.0], vec![])
                .with_wu_var_initialisers(vec![VarInit::constant(0.4)])
                .with_ps_params(vec![5.0], vec![0.98])
                .with_connectivity_init(one_to_one_connectivity())
                .with_max_row_length(4)
                .with_max_col_length(8),
        )
        .unwrap();
    model
}

#[test]
fn emitted_sources_have_balanced_braces_and_no_tokens() {
    let model = build_model();
    let generated = spikegen::generate(&model, &default_backend()).unwrap();

    let sources = [
        &generated.neuron_update.device_source,
        &generated.synapse_update.device_source,
        &generated.init.device_source,
        &generated.runner_source,
    ];
    for source in sources {
        assert_eq!(brace_balance(source), 0, "braces must balance");
        assert!(!source.contains("$("), "no unresolved substitution tokens");
    }
}

#[test]
fn dispatch_ranges_cover_the_launch_exactly() {
    let model = build_model();
    let backend = default_backend();
    let merged = ModelMerged::new(&model);

    // The neuron update launch must equal the sum of padded member
    // sizes over every merged group.
    let expected: usize = merged
        .neuron_update_groups
        .iter()
        .flat_map(|m| m.groups.iter())
        .map(|id| pad_size(model.neuron_group(*id).num_neurons as usize, 32))
        .sum();

    let generated = spikegen::generate(&model, &backend).unwrap();
    assert!(
        generated
            .neuron_update
            .host_source
            .contains(&format!("globalWorkSize({}, 1)", expected)),
        "launch dimensions must match the dispatcher's total ({} threads)",
        expected
    );
}

#[test]
fn start_ids_are_strictly_increasing_and_zero_based() {
    let model = build_model();
    let generated = spikegen::generate(&model, &default_backend()).unwrap();
    let device = &generated.neuron_update.device_source;

    // Collect every start id from the __constant arrays, in emission
    // order; ranges are contiguous so the sequence must rise from 0.
    let mut starts: Vec<usize> = Vec::new();
    for line in device.lines() {
        if let Some(open) = line.find("GroupStartID") {
            let body = &line[open..];
            let inner = body.split('{').nth(1).and_then(|s| s.split('}').next()).unwrap_or("");
            for part in inner.split(',') {
                let part = part.trim();
                if !part.is_empty() {
                    starts.push(part.parse().expect("start ids are integers"));
                }
            }
        }
    }
    assert!(!starts.is_empty(), "start id arrays must be emitted");
    assert_eq!(starts[0], 0, "thread ranges start at zero");
    for pair in starts.windows(2) {
        assert!(pair[0] < pair[1], "start ids must be strictly increasing: {:?}", starts);
    }
}

#[test]
fn every_synapse_group_has_a_compatible_strategy() {
    let model = build_model();
    let backend = default_backend();
    for sg in model.synapse_group_ids() {
        let strategy = backend
            .presynaptic_update_strategy(&model, sg)
            .expect("a compatible strategy must exist");
        assert!(strategy.is_compatible(&model, sg));
    }
}
