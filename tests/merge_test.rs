//! Merge partitioning: distinct models split, identical models join,
//! members always satisfy the compatibility predicate, and member
//! order is stable across runs.

mod common;

use common::{add_lif, default_backend, empty_model, izhikevich_like_model};
use spikegen::merger::model_merged::can_merge_neuron_update;
use spikegen::model::VarInit;
use spikegen::ModelMerged;

#[test]
fn distinct_models_stay_separate() {
    let mut model = empty_model("mixed");
    add_lif(&mut model, "Lif", 100);
    model
        .add_neuron_group(
            "Izhi",
            100,
            izhikevich_like_model(),
            vec![0.02, 0.2],
            vec![],
            vec![VarInit::constant(-65.0), VarInit::constant(-13.0)],
        )
        .unwrap();

    let merged = ModelMerged::new(&model);
    assert_eq!(merged.neuron_update_groups.len(), 2, "different sim code must not merge");

    let backend = default_backend();
    let generated = spikegen::generate(&model, &backend).unwrap();
    let device = &generated.neuron_update.device_source;
    assert!(device.contains("struct MergedNeuronUpdateGroup0"));
    assert!(device.contains("struct MergedNeuronUpdateGroup1"));
    assert_eq!(device.matches("// mergedNeuronUpdateGroup").count(), 2, "one dispatch branch each");
}

#[test]
fn every_merged_pair_is_compatible() {
    let mut model = empty_model("soundness");
    add_lif(&mut model, "A", 10);
    add_lif(&mut model, "B", 20);
    add_lif(&mut model, "C", 30);

    let merged = ModelMerged::new(&model);
    for group in &merged.neuron_update_groups {
        for a in &group.groups {
            for b in &group.groups {
                assert!(
                    can_merge_neuron_update(&model, *a, *b),
                    "merged members must be pairwise compatible"
                );
            }
        }
    }
}

#[test]
fn member_order_is_sorted_by_name() {
    // Insertion order differs from name order; the partition must not.
    let mut model = empty_model("order");
    add_lif(&mut model, "Zeta", 10);
    add_lif(&mut model, "Alpha", 20);
    add_lif(&mut model, "Mid", 30);

    let merged = ModelMerged::new(&model);
    assert_eq!(merged.neuron_update_groups.len(), 1);
    let names: Vec<&str> = merged.neuron_update_groups[0]
        .groups
        .iter()
        .map(|id| model.neuron_group(*id).name.as_str())
        .collect();
    assert_eq!(names, vec!["Alpha", "Mid", "Zeta"]);
}

#[test]
fn parameter_values_do_not_block_merging() {
    let mut model = empty_model("params");
    // Same model, different tau: still one merged group with a
    // heterogeneous parameter field.
    model
        .add_neuron_group("A", 10, common::lif_model(), vec![20.0, -50.0, -60.0], vec![], vec![VarInit::constant(-60.0)])
        .unwrap();
    model
        .add_neuron_group("B", 10, common::lif_model(), vec![10.0, -50.0, -60.0], vec![], vec![VarInit::constant(-60.0)])
        .unwrap();

    let merged = ModelMerged::new(&model);
    assert_eq!(merged.neuron_update_groups.len(), 1);

    let layout = spikegen::merger::fields::neuron_update_layout(&model, &merged.neuron_update_groups[0]);
    let tau = layout.fields.iter().find(|f| f.name == "tau");
    assert!(tau.is_some(), "heterogeneous parameter becomes a struct field");
    assert_eq!(tau.unwrap().host_values, vec!["20.0f", "10.0f"]);

    // Homogeneous parameters fold to literals instead.
    assert!(layout.fields.iter().all(|f| f.name != "Vthresh"));
}
