//! Axonal delays and spike-like events: both staging arrays in the
//! neuron kernel, delay-slot cycling in the pre-neuron-reset kernel and
//! read/write delay offsets at the top of the group handler.

mod common;

use common::{add_lif, default_backend, empty_model, event_wu, exp_curr_psm};
use spikegen::model::{SynapseGroup, SynapseMatrixType, VarInit};

fn delayed_event_model() -> spikegen::ModelSpec {
    let mut model = empty_model("delayed");
    let pre = add_lif(&mut model, "Pre", 50);
    let post = add_lif(&mut model, "Post", 50);
    model
        .add_synapse_group(
            SynapseGroup::new(
                "Syn",
                SynapseMatrixType::DENSE_GLOBALG,
                5,
                pre,
                post,
                event_wu(),
                exp_curr_psm(),
            )
            .with_wu_var_initialisers(vec![VarInit::constant(0.1)])
            .with_ps_params(vec![5.0], vec![0.98]),
        )
        .unwrap();
    model
}

#[test]
fn delay_gives_source_group_a_spike_queue() {
    let model = delayed_event_model();
    let pre = model.neuron_group_ids().next().unwrap();
    assert_eq!(model.neuron_group(pre).num_delay_slots, 6, "delay 5 needs 6 slots");
    assert!(model.is_spike_event_required(pre));
}

#[test]
fn neuron_kernel_stages_spikes_and_events() {
    let model = delayed_event_model();
    let backend = default_backend();
    let generated = spikegen::generate(&model, &backend).unwrap();

    let device = &generated.neuron_update.device_source;
    assert!(device.contains("volatile __local unsigned int shSpk["));
    assert!(device.contains("volatile __local unsigned int shSpkEvnt["));
    assert!(device.contains("spikeLikeEvent |= (lV >= -30.0f);"), "event condition uses pre-side state");
    assert!(device.contains("atomic_add(&shSpkEvntCount, 1)"));
}

#[test]
fn delay_pointer_cycles_in_pre_neuron_reset() {
    let model = delayed_event_model();
    let backend = default_backend();
    let generated = spikegen::generate(&model, &backend).unwrap();

    let device = &generated.neuron_update.device_source;
    assert!(device.contains("*group->spkQuePtr = (*group->spkQuePtr + 1) % 6;"));
    assert!(device.contains("const unsigned int readDelayOffset ="));
    assert!(device.contains("const unsigned int writeDelayOffset ="));
}

#[test]
fn presynaptic_update_reads_the_delayed_slot() {
    let model = delayed_event_model();
    let backend = default_backend();
    let generated = spikegen::generate(&model, &backend).unwrap();

    let device = &generated.synapse_update.device_source;
    assert!(device.contains("const unsigned int preReadDelaySlot = ((*group->srcSpkQuePtr + 1) % 6);"));
    assert!(device.contains("srcSpkCntEvnt[preReadDelaySlot]"));
}
