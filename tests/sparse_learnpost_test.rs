//! Sparse connectivity with postsynaptic learning: device connectivity
//! build over presynaptic rows, a sparse-init pass building the column
//! remap, a postsynaptic kernel and column lengths cleared before the
//! init kernel runs.

mod common;

use common::{add_lif, default_backend, empty_model, exp_curr_psm, learning_wu, one_to_one_connectivity};
use spikegen::model::{SynapseGroup, SynapseMatrixType, VarInit};
use spikegen::ModelMerged;

fn sparse_model() -> spikegen::ModelSpec {
    let mut model = empty_model("sparse");
    let pre = add_lif(&mut model, "Pre", 100);
    let post = add_lif(&mut model, "Post", 100);
    model
        .add_synapse_group(
            SynapseGroup::new(
                "Syn",
                SynapseMatrixType::SPARSE_INDIVIDUALG,
                0,
                pre,
                post,
                learning_wu(),
                exp_curr_psm(),
            )
            .with_wu_params(vec![1.0], vec![])
            .with_wu_var_initialisers(vec![VarInit::constant(0.2)])
            .with_ps_params(vec![5.0], vec![0.98])
            .with_connectivity_init(one_to_one_connectivity())
            .with_max_row_length(1)
            .with_max_col_length(1),
        )
        .unwrap();
    model
}

#[test]
fn connectivity_is_built_over_presynaptic_rows() {
    let model = sparse_model();
    let merged = ModelMerged::new(&model);
    assert_eq!(merged.synapse_connectivity_init_groups.len(), 1);
    assert_eq!(merged.synapse_sparse_init_groups.len(), 1, "learn-post needs the sparse pass");
    assert_eq!(merged.postsynaptic_update_groups.len(), 1);

    let backend = default_backend();
    let generated = spikegen::generate(&model, &backend).unwrap();
    let device = &generated.init.device_source;
    assert!(device.contains("struct MergedSynapseConnectivityInitGroup0"));
    assert!(device.contains(" < group->numSrcNeurons)"), "one thread per presynaptic row");
    // The addSynapse function substitution appends into the row.
    assert!(device.contains("group->ind[("));
    assert!(device.contains("group->rowLength["));
}

#[test]
fn sparse_init_builds_column_remap() {
    let model = sparse_model();
    let backend = default_backend();
    let generated = spikegen::generate(&model, &backend).unwrap();

    let device = &generated.init.device_source;
    assert!(device.contains("__kernel void initializeSparseKernel"));
    assert!(device.contains("shRowLength[localId] = group->rowLength["));
    assert!(device.contains("atomic_add(&group->colLength[postIndex], 1)"));
    assert!(device.contains("group->remap[colMajorIndex] = idx;"));
}

#[test]
fn column_lengths_are_cleared_before_initialize_returns() {
    let model = sparse_model();
    let backend = default_backend();
    let generated = spikegen::generate(&model, &backend).unwrap();

    let host = &generated.init.host_source;
    assert!(
        host.contains("enqueueFillBuffer(d_colLengthSyn, 0, 0, 100 * sizeof(unsigned int))"),
        "colLength must be zeroed inside initialize()"
    );
}

#[test]
fn postsynaptic_kernel_walks_incoming_spikes() {
    let model = sparse_model();
    let backend = default_backend();
    let generated = spikegen::generate(&model, &backend).unwrap();

    let device = &generated.synapse_update.device_source;
    assert!(device.contains("__kernel void updatePostsynapticKernel"));
    assert!(device.contains("shColLength[localId] = group->colLength[spk];"));
    assert!(device.contains("group->remap[(shSpk[j] * group->colStride)"));
    assert!(device.contains(" < group->colStride)"), "parallelised over max source connections");
}
