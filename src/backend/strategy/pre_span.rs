use crate::codestream::CodeStream;
use crate::error::GeneratorError;
use crate::merger::MergedSynapseGroup;
use crate::model::{ModelSpec, SpanType, SynapseGroupId, SynapseMatrixType};
use crate::substitution::Substitutions;

use super::{add_accumulation_substitution, AccumulationTarget, PresynapticUpdateStrategy, SynapseGroupHandler};
use crate::backend::backend::Backend;

/// One thread per presynaptic spike, each walking its row of the sparse
/// matrix. Accumulation is always atomic into global memory because
/// several rows can target the same postsynaptic neuron at once.
pub struct PreSpan;

impl PresynapticUpdateStrategy for PreSpan {
    fn name(&self) -> &'static str {
        "PreSpan"
    }

    fn num_threads(&self, model: &ModelSpec, sg: SynapseGroupId) -> usize {
        model.neuron_group(model.synapse_group(sg).src).num_neurons as usize
    }

    fn synaptic_matrix_row_stride(&self, model: &ModelSpec, sg: SynapseGroupId) -> usize {
        model.synapse_group(sg).max_row_length.unwrap_or(0) as usize
    }

    fn is_compatible(&self, model: &ModelSpec, sg: SynapseGroupId) -> bool {
        let group = model.synapse_group(sg);
        group.span_type == SpanType::Presynaptic
            && group.matrix_type.contains(SynapseMatrixType::SPARSE)
    }

    fn should_accumulate_in_register(&self, _: &ModelSpec, _: &MergedSynapseGroup, _: &Backend) -> bool {
        false
    }

    fn should_accumulate_in_shared_memory(&self, _: &ModelSpec, _: &MergedSynapseGroup, _: &Backend) -> bool {
        false
    }

    fn gen_code(
        &self,
        os: &mut CodeStream,
        model: &ModelSpec,
        merged: &MergedSynapseGroup,
        subs: &Substitutions,
        backend: &Backend,
        true_spike: bool,
        thresh_handler: SynapseGroupHandler,
        sim_handler: SynapseGroupHandler,
    ) -> Result<(), GeneratorError> {
        let sg = model.synapse_group(merged.archetype());
        let src_delay = model.neuron_group(sg.src).is_delay_required();
        let event_suffix = if true_spike { "" } else { "Evnt" };

        let spike_count = if src_delay {
            format!("group->srcSpkCnt{}[preReadDelaySlot]", event_suffix)
        } else {
            format!("group->srcSpkCnt{}[0]", event_suffix)
        };

        os.write(&format!("if ({} < {})", subs.var("id")?, spike_count));
        os.scope::<_, GeneratorError>(|os| {
            if src_delay {
                os.writeln(&format!(
                    "const unsigned int preInd = group->srcSpk{}[preReadDelayOffset + {}];",
                    event_suffix,
                    subs.var("id")?
                ));
            } else {
                os.writeln(&format!(
                    "const unsigned int preInd = group->srcSpk{}[{}];",
                    event_suffix,
                    subs.var("id")?
                ));
            }
            os.writeln("unsigned int synAddress = preInd * group->rowStride;");
            os.writeln("const unsigned int npost = group->rowLength[preInd];");

            let mut syn_subs = Substitutions::with_parent(subs);
            syn_subs.add_var_substitution("id_pre", "preInd")?;
            syn_subs.add_var_substitution("id_post", "ipost")?;
            syn_subs.add_var_substitution("id_syn", "synAddress")?;
            add_accumulation_substitution(
                &mut syn_subs,
                model,
                merged,
                backend,
                AccumulationTarget::AtomicGlobal,
            )?;

            // Re-test the event threshold on the presynaptic thread if
            // the group requires it.
            if !true_spike && sg.event_threshold_retest_required {
                os.write("if(");
                thresh_handler(os, merged, &mut syn_subs)?;
                os.write(")");
                os.scope::<_, GeneratorError>(|os| {
                    gen_row_loop(os, merged, &mut syn_subs, sim_handler)
                })?;
            } else {
                gen_row_loop(os, merged, &mut syn_subs, sim_handler)?;
            }
            Ok(())
        })
    }
}

fn gen_row_loop(
    os: &mut CodeStream,
    merged: &MergedSynapseGroup,
    syn_subs: &mut Substitutions,
    sim_handler: SynapseGroupHandler,
) -> Result<(), GeneratorError> {
    os.write("for(unsigned int i = 0; i < npost; i++, synAddress++)");
    os.scope::<_, GeneratorError>(|os| {
        os.writeln("const unsigned int ipost = group->ind[synAddress];");
        sim_handler(os, merged, syn_subs)
    })
}
