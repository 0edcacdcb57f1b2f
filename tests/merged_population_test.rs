//! Two structurally identical neuron groups share one merged group:
//! one struct type, a two-slot struct array and a per-member dispatch
//! ladder over the padded ranges.

mod common;

use common::{add_lif, default_backend, empty_model};
use spikegen::merger::fields::neuron_update_layout;
use spikegen::ModelMerged;

#[test]
fn identical_groups_share_a_merged_group() {
    let mut model = empty_model("pair");
    add_lif(&mut model, "PopA", 100);
    add_lif(&mut model, "PopB", 250);

    let merged = ModelMerged::new(&model);
    assert_eq!(merged.neuron_update_groups.len(), 1, "identical models must merge");
    assert_eq!(merged.neuron_update_groups[0].groups.len(), 2);
}

#[test]
fn dispatcher_routes_both_members() {
    let mut model = empty_model("pair");
    add_lif(&mut model, "PopA", 100);
    add_lif(&mut model, "PopB", 250);

    let backend = default_backend();
    let generated = spikegen::generate(&model, &backend).unwrap();
    let device = &generated.neuron_update.device_source;

    // padded(100) = 128, padded(250) = 256 at workgroup size 32.
    assert!(device.contains("if(id < 384)"), "outer branch spans both members");
    assert!(device.contains("if(id < 128)"), "first member range");
    assert!(device.contains("if(id >= 128 && id < 384)"), "second member range");
    assert!(device.contains("d_mergedNeuronUpdateGroupStartID0[] = {0, 128, }"));
    assert!(
        generated.neuron_update.host_source.contains("globalWorkSize(384, 1)"),
        "launch thread count is the sum of padded member sizes"
    );
}

#[test]
fn merged_struct_array_has_one_slot_per_member() {
    let mut model = empty_model("pair");
    add_lif(&mut model, "PopA", 100);
    add_lif(&mut model, "PopB", 250);

    let merged = ModelMerged::new(&model);
    let layout = neuron_update_layout(&model, &merged.neuron_update_groups[0]);
    assert_eq!(layout.num_members, 2);

    // Per-member values survive the merge in field order.
    let num_neurons = layout.fields.iter().find(|f| f.name == "numNeurons").unwrap();
    assert_eq!(num_neurons.host_values, vec!["100", "250"]);
    let v = layout.fields.iter().find(|f| f.name == "V").unwrap();
    assert_eq!(v.host_values, vec!["d_VPopA", "d_VPopB"]);

    // And the emitted build routine pushes them member by member.
    let backend = default_backend();
    let generated = spikegen::generate(&model, &backend).unwrap();
    let host = &generated.neuron_update.host_source;
    assert!(host.contains("setArg(2, 100)"), "member 0 numNeurons");
    assert!(host.contains("setArg(2, 250)"), "member 1 numNeurons");
    assert!(host.contains("d_VPopA") && host.contains("d_VPopB"));
}
