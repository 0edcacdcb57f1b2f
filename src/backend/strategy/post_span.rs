use crate::codestream::CodeStream;
use crate::error::GeneratorError;
use crate::merger::MergedSynapseGroup;
use crate::model::{ModelSpec, SpanType, SynapseGroupId, SynapseMatrixType};
use crate::substitution::Substitutions;

use super::{add_accumulation_substitution, AccumulationTarget, PresynapticUpdateStrategy, SynapseGroupHandler};
use crate::backend::backend::{Backend, Kernel};

/// One thread per postsynaptic element; incoming spikes are staged into
/// shared memory block by block (row lengths too, for sparse matrices)
/// and every thread walks the staged block.
pub struct PostSpan;

impl PostSpan {
    fn accumulation_target(
        &self,
        model: &ModelSpec,
        merged: &MergedSynapseGroup,
        backend: &Backend,
    ) -> AccumulationTarget {
        if self.should_accumulate_in_register(model, merged, backend) {
            AccumulationTarget::Register
        } else if self.should_accumulate_in_shared_memory(model, merged, backend) {
            AccumulationTarget::SharedMemory
        } else {
            AccumulationTarget::AtomicGlobal
        }
    }
}

impl PresynapticUpdateStrategy for PostSpan {
    fn name(&self) -> &'static str {
        "PostSpan"
    }

    fn num_threads(&self, model: &ModelSpec, sg: SynapseGroupId) -> usize {
        let group = model.synapse_group(sg);
        if group.matrix_type.contains(SynapseMatrixType::SPARSE) {
            group.max_row_length.unwrap_or(0) as usize
        } else {
            model.neuron_group(group.trg).num_neurons as usize
        }
    }

    fn synaptic_matrix_row_stride(&self, model: &ModelSpec, sg: SynapseGroupId) -> usize {
        let group = model.synapse_group(sg);
        if group.matrix_type.contains(SynapseMatrixType::SPARSE) {
            group.max_row_length.unwrap_or(0) as usize
        } else {
            model.neuron_group(group.trg).num_neurons as usize
        }
    }

    fn is_compatible(&self, model: &ModelSpec, sg: SynapseGroupId) -> bool {
        model.synapse_group(sg).span_type == SpanType::Postsynaptic
    }

    fn should_accumulate_in_register(
        &self,
        model: &ModelSpec,
        merged: &MergedSynapseGroup,
        _: &Backend,
    ) -> bool {
        let sg = model.synapse_group(merged.archetype());
        let dense_like = sg.matrix_type.contains(SynapseMatrixType::DENSE)
            || sg.matrix_type.contains(SynapseMatrixType::BITMASK);
        dense_like && !sg.is_dendritic_delay_required()
    }

    fn should_accumulate_in_shared_memory(
        &self,
        model: &ModelSpec,
        merged: &MergedSynapseGroup,
        backend: &Backend,
    ) -> bool {
        let sg = model.synapse_group(merged.archetype());
        if !sg.matrix_type.contains(SynapseMatrixType::SPARSE) || sg.is_dendritic_delay_required() {
            return false;
        }
        // Valid only while every member's target population fits in the
        // shared array, which is one workgroup wide.
        let wg = backend.workgroup_size(Kernel::PresynapticUpdate);
        merged
            .groups
            .iter()
            .all(|id| {
                let member = model.synapse_group(*id);
                model.neuron_group(member.trg).num_neurons as usize <= wg
            })
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
        let sparse = sg.matrix_type.contains(SynapseMatrixType::SPARSE);
        let bitmask = sg.matrix_type.contains(SynapseMatrixType::BITMASK);
        let event_suffix = if true_spike { "" } else { "Evnt" };
        let wg = backend.workgroup_size(Kernel::PresynapticUpdate);
        let target = self.accumulation_target(model, merged, backend);

        if src_delay {
            os.writeln(&format!(
                "const unsigned int numSpikes = group->srcSpkCnt{}[preReadDelaySlot];",
                event_suffix
            ));
        } else {
            os.writeln(&format!(
                "const unsigned int numSpikes = group->srcSpkCnt{}[0];",
                event_suffix
            ));
        }
        os.writeln(&format!(
            "const unsigned int numSpikeBlocks = (numSpikes + {}) / {};",
            wg - 1,
            wg
        ));

        os.write("for (unsigned int r = 0; r < numSpikeBlocks; r++)");
        os.scope::<_, GeneratorError>(|os| {
            os.writeln(&format!(
                "const unsigned int numSpikesInBlock = (r == numSpikeBlocks - 1) ? ((numSpikes - 1) % {}) + 1 : {};",
                wg, wg
            ));

            os.writeln("barrier(CLK_LOCAL_MEM_FENCE);");
            os.write("if (localId < numSpikesInBlock)");
            os.scope::<_, GeneratorError>(|os| {
                if src_delay {
                    os.writeln(&format!(
                        "const unsigned int spk = group->srcSpk{}[preReadDelayOffset + (r * {}) + localId];",
                        event_suffix, wg
                    ));
                } else {
                    os.writeln(&format!(
                        "const unsigned int spk = group->srcSpk{}[(r * {}) + localId];",
                        event_suffix, wg
                    ));
                }
                os.writeln(&format!("shSpk{}[localId] = spk;", event_suffix));
                if sparse {
                    os.writeln("shRowLength[localId] = group->rowLength[spk];");
                }
                Ok(())
            })?;
            os.writeln("barrier(CLK_LOCAL_MEM_FENCE);");

            os.writeln("// loop through all incoming spikes");
            os.write("for (unsigned int j = 0; j < numSpikesInBlock; j++)");
            os.scope::<_, GeneratorError>(|os| {
                os.writeln("// only work on existing neurons");
                os.write(&format!("if ({} < group->rowStride)", subs.var("id")?));
                os.scope::<_, GeneratorError>(|os| {
                    let mut syn_subs = Substitutions::with_parent(subs);
                    syn_subs.add_var_substitution("id_pre", format!("shSpk{}[j]", event_suffix))?;
                    add_accumulation_substitution(&mut syn_subs, model, merged, backend, target)?;

                    if sparse {
                        os.write(&format!("if ({} < shRowLength[j])", subs.var("id")?));
                        os.scope::<_, GeneratorError>(|os| {
                            os.writeln(&format!(
                                "const unsigned int synAddress = (shSpk{}[j] * group->rowStride) + {};",
                                event_suffix,
                                subs.var("id")?
                            ));
                            os.writeln("const unsigned int ipost = group->ind[synAddress];");
                            syn_subs.add_var_substitution("id_post", "ipost")?;
                            syn_subs.add_var_substitution("id_syn", "synAddress")?;
                            gen_weight_update(os, merged, &mut syn_subs, sg.event_threshold_retest_required && !true_spike, thresh_handler, sim_handler)
                        })
                    } else {
                        os.writeln(&format!(
                            "const unsigned int synAddress = (shSpk{}[j] * group->numTrgNeurons) + {};",
                            event_suffix,
                            subs.var("id")?
                        ));
                        syn_subs.add_var_substitution("id_post", subs.var("id")?.to_string())?;
                        syn_subs.add_var_substitution("id_syn", "synAddress")?;
                        if bitmask {
                            os.write("if (B(group->gp[synAddress / 32], synAddress & 31))");
                            os.scope::<_, GeneratorError>(|os| {
                                gen_weight_update(os, merged, &mut syn_subs, sg.event_threshold_retest_required && !true_spike, thresh_handler, sim_handler)
                            })
                        } else {
                            gen_weight_update(os, merged, &mut syn_subs, sg.event_threshold_retest_required && !true_spike, thresh_handler, sim_handler)
                        }
                    }
                })
            })
        })
    }
}

fn gen_weight_update(
    os: &mut CodeStream,
    merged: &MergedSynapseGroup,
    syn_subs: &mut Substitutions,
    retest: bool,
    thresh_handler: SynapseGroupHandler,
    sim_handler: SynapseGroupHandler,
) -> Result<(), GeneratorError> {
    if retest {
        os.write("if(");
        thresh_handler(os, merged, syn_subs)?;
        os.write(")");
        os.scope::<_, GeneratorError>(|os| sim_handler(os, merged, syn_subs))
    } else {
        sim_handler(os, merged, syn_subs)
    }
}
