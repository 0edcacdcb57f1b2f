use crate::backend::backend::{pad_size, Backend, Kernel, KERNEL_NAMES};
use crate::backend::dispatch::gen_parallel_group;
use crate::backend::launcher;
use crate::codestream::CodeStream;
use crate::error::GeneratorError;
use crate::merger::fields::{
    synapse_connectivity_init_layout, synapse_dense_init_layout, synapse_sparse_init_layout,
    neuron_init_layout, MergedStructLayout,
};
use crate::merger::{MergedNeuronGroup, MergedSynapseGroup, ModelMerged};
use crate::model::{ModelSpec, SynapseMatrixType, VarInit};
use crate::substitution::Substitutions;

use super::common::{add_folded_param_substitutions, member_values};
use super::GeneratedModule;

/// Generate the initialisation kernel program (dense/default init plus
/// the sparse-structure pass) and its host launcher.
pub fn generate_init(
    model_merged: &ModelMerged,
    backend: &Backend,
) -> Result<GeneratedModule, GeneratorError> {
    let model = model_merged.model();

    // Row strides are a strategy decision; resolve them up front so a
    // group with no compatible strategy fails loudly.
    let mut strides = std::collections::HashMap::new();
    for sg in model.synapse_group_ids() {
        strides.insert(sg, backend.synaptic_matrix_row_stride(model, sg)? as u32);
    }
    let row_stride = |sg: crate::model::SynapseGroupId| strides[&sg];

    let neuron_layouts: Vec<MergedStructLayout> = model_merged
        .neuron_init_groups
        .iter()
        .map(|m| neuron_init_layout(model, m))
        .collect();
    let dense_layouts: Vec<MergedStructLayout> = model_merged
        .synapse_dense_init_groups
        .iter()
        .map(|m| synapse_dense_init_layout(model, m, &row_stride))
        .collect();
    let connectivity_layouts: Vec<MergedStructLayout> = model_merged
        .synapse_connectivity_init_groups
        .iter()
        .map(|m| synapse_connectivity_init_layout(model, m, &row_stride))
        .collect();
    let sparse_layouts: Vec<MergedStructLayout> = model_merged
        .synapse_sparse_init_groups
        .iter()
        .map(|m| synapse_sparse_init_layout(model, m, &row_stride))
        .collect();

    let mut os = CodeStream::new();
    os.writeln("//--------------------------------------------------------------------------");
    os.writeln("// OpenCL program and kernels");
    os.writeln("//--------------------------------------------------------------------------");
    os.writeln("cl::Program initializeProgram;");
    os.writeln(&format!("cl::Kernel {};", KERNEL_NAMES[Kernel::Initialize as usize]));
    os.writeln(&format!("cl::Kernel {};", KERNEL_NAMES[Kernel::InitializeSparse as usize]));
    for layout in neuron_layouts
        .iter()
        .chain(&dense_layouts)
        .chain(&connectivity_layouts)
        .chain(&sparse_layouts)
    {
        launcher::gen_merged_struct_preamble(&mut os, layout);
    }
    os.blank_line();

    let mut kernels = CodeStream::new();
    backend.gen_kernel_preamble(&mut kernels, model);
    kernels.blank_line();

    for layout in neuron_layouts
        .iter()
        .chain(&dense_layouts)
        .chain(&connectivity_layouts)
        .chain(&sparse_layouts)
    {
        launcher::gen_merged_struct_def(&mut kernels, layout);
    }
    kernels.blank_line();

    // Start ids: one running sequence for the static init kernel, a
    // fresh one for the sparse init kernel.
    {
        let wg = backend.workgroup_size(Kernel::Initialize);
        let mut id = 0usize;
        launcher::gen_group_start_ids(&mut kernels, &mut id, wg, &model_merged.neuron_init_groups,
            &|m: &MergedNeuronGroup, k| model.neuron_group(m.groups[k]).num_neurons as usize);
        launcher::gen_group_start_ids(&mut kernels, &mut id, wg, &model_merged.synapse_dense_init_groups,
            &|m: &MergedSynapseGroup, k| {
                model.neuron_group(model.synapse_group(m.groups[k]).trg).num_neurons as usize
            });
        launcher::gen_group_start_ids(&mut kernels, &mut id, wg, &model_merged.synapse_connectivity_init_groups,
            &|m: &MergedSynapseGroup, k| {
                model.neuron_group(model.synapse_group(m.groups[k]).src).num_neurons as usize
            });
        let mut sparse_id = 0usize;
        launcher::gen_group_start_ids(
            &mut kernels,
            &mut sparse_id,
            backend.workgroup_size(Kernel::InitializeSparse),
            &model_merged.synapse_sparse_init_groups,
            &|m: &MergedSynapseGroup, k| {
                model.synapse_group(m.groups[k]).max_row_length.unwrap_or(0) as usize
            },
        );
        kernels.blank_line();
    }

    for layout in neuron_layouts
        .iter()
        .chain(&dense_layouts)
        .chain(&connectivity_layouts)
        .chain(&sparse_layouts)
    {
        launcher::gen_merged_struct_build_kernel(&mut kernels, layout)?;
    }

    // ------------------------------------------------------------------
    // initializeKernel
    // ------------------------------------------------------------------
    let mut id_init_start = 0usize;
    kernels.write(&format!("__kernel void {}(", KERNEL_NAMES[Kernel::Initialize as usize]));
    launcher::gen_merged_group_kernel_params(&mut kernels, &neuron_layouts, true);
    launcher::gen_merged_group_kernel_params(&mut kernels, &dense_layouts, true);
    launcher::gen_merged_group_kernel_params(&mut kernels, &connectivity_layouts, true);
    kernels.write("unsigned int deviceRNGSeed)");
    kernels.scope::<_, GeneratorError>(|os| {
        os.writeln("const unsigned int localId = get_local_id(0);");
        os.writeln("const unsigned int id = get_global_id(0);");

        let kernel_subs = backend.kernel_substitutions(model);
        let wg = backend.workgroup_size(Kernel::Initialize);

        os.writeln("// ------------------------------------------------------------------------");
        os.writeln("// Local neuron groups");
        gen_parallel_group(
            os,
            &kernel_subs,
            &model_merged.neuron_init_groups,
            &mut id_init_start,
            &|m: &MergedNeuronGroup| {
                m.groups
                    .iter()
                    .map(|id| pad_size(model.neuron_group(*id).num_neurons as usize, wg))
                    .collect()
            },
            &mut |os, merged, pop_subs| {
                os.writeln("// only do this for existing neurons");
                os.write(&format!("if({} < group->numNeurons)", pop_subs.var("id")?));
                os.scope::<_, GeneratorError>(|os| gen_neuron_init(os, model, merged, pop_subs))
            },
        )?;
        os.blank_line();

        os.writeln("// ------------------------------------------------------------------------");
        os.writeln("// Synapse groups with dense connectivity");
        gen_parallel_group(
            os,
            &kernel_subs,
            &model_merged.synapse_dense_init_groups,
            &mut id_init_start,
            &|m: &MergedSynapseGroup| {
                m.groups
                    .iter()
                    .map(|id| {
                        pad_size(
                            model.neuron_group(model.synapse_group(*id).trg).num_neurons as usize,
                            wg,
                        )
                    })
                    .collect()
            },
            &mut |os, merged, pop_subs| {
                os.writeln("// only do this for existing postsynaptic neurons");
                os.write(&format!("if({} < group->numTrgNeurons)", pop_subs.var("id")?));
                os.scope::<_, GeneratorError>(|os| {
                    let mut subs = Substitutions::with_parent(&*pop_subs);
                    subs.add_var_substitution("id_post", pop_subs.var("id")?.to_string())?;
                    os.write("for(unsigned int i = 0; i < group->numSrcNeurons; i++)");
                    os.scope::<_, GeneratorError>(|os| {
                        let mut row_subs = Substitutions::with_parent(&subs);
                        row_subs.add_var_substitution("id_pre", "i")?;
                        row_subs.add_var_substitution(
                            "id_syn",
                            format!("(i * group->rowStride) + {}", pop_subs.var("id")?),
                        )?;
                        gen_wu_var_init(os, model, merged, &row_subs)
                    })
                })
            },
        )?;
        os.blank_line();

        os.writeln("// ------------------------------------------------------------------------");
        os.writeln("// Synapse groups with sparse connectivity");
        gen_parallel_group(
            os,
            &kernel_subs,
            &model_merged.synapse_connectivity_init_groups,
            &mut id_init_start,
            &|m: &MergedSynapseGroup| {
                m.groups
                    .iter()
                    .map(|id| {
                        pad_size(
                            model.neuron_group(model.synapse_group(*id).src).num_neurons as usize,
                            wg,
                        )
                    })
                    .collect()
            },
            &mut |os, merged, pop_subs| {
                os.writeln("// only do this for existing presynaptic neurons");
                os.write(&format!("if({} < group->numSrcNeurons)", pop_subs.var("id")?));
                os.scope::<_, GeneratorError>(|os| gen_connectivity_init(os, model, merged, pop_subs))
            },
        )?;
        Ok(())
    })?;
    kernels.blank_line();

    // ------------------------------------------------------------------
    // initializeSparseKernel
    // ------------------------------------------------------------------
    let mut id_sparse_init_start = 0usize;
    kernels.write(&format!("__kernel void {}(", KERNEL_NAMES[Kernel::InitializeSparse as usize]));
    launcher::gen_merged_group_kernel_params(&mut kernels, &sparse_layouts, false);
    kernels.write(")");
    kernels.scope::<_, GeneratorError>(|os| {
        let wg = backend.workgroup_size(Kernel::InitializeSparse);
        let kernel_subs = backend.kernel_substitutions(model);

        os.writeln("const unsigned int localId = get_local_id(0);");
        os.writeln("const unsigned int id = get_global_id(0);");

        // Row lengths are staged in shared memory so every postsynaptic
        // thread does not have to read them from global memory.
        os.writeln(&format!("__local unsigned int shRowLength[{}];", wg));
        if model_merged.synapse_sparse_init_groups.iter().any(|m| {
            !model.synapse_group(m.archetype()).wu_model.synapse_dynamics_code.is_empty()
        }) {
            os.writeln(&format!("__local unsigned int shRowStart[{}];", wg + 1));
        }

        gen_parallel_group(
            os,
            &kernel_subs,
            &model_merged.synapse_sparse_init_groups,
            &mut id_sparse_init_start,
            &|m: &MergedSynapseGroup| {
                m.groups
                    .iter()
                    .map(|id| {
                        pad_size(model.synapse_group(*id).max_row_length.unwrap_or(0) as usize, wg)
                    })
                    .collect()
            },
            &mut |os, merged, pop_subs| gen_sparse_init(os, model, merged, pop_subs, wg),
        )?;
        os.blank_line();
        Ok(())
    })?;

    let kernel_src = kernels.finish()?;

    os.writeln("const char* initializeSrc = ");
    backend.divide_kernel_stream_in_parts(&mut os, &kernel_src, 5000);
    os.writeln(";");
    os.blank_line();

    os.writeln("// Initialize the initialization kernel(s)");
    os.write("void buildInitializeProgram()");
    os.scope::<_, GeneratorError>(|os| {
        os.writeln("// Build program");
        os.writeln("initializeProgram = cl::Program(clContext, initializeSrc, true);");
        os.write("if(initializeProgram.build(\"-cl-std=CL1.2\") != CL_SUCCESS)");
        os.scope::<_, GeneratorError>(|os| {
            os.writeln("throw std::runtime_error(\"Compile error:\" + initializeProgram.getBuildInfo<CL_PROGRAM_BUILD_LOG>(clDevice));");
            Ok(())
        })?;
        os.blank_line();

        os.writeln("// Configure merged struct building kernels");
        for layout in neuron_layouts
            .iter()
            .chain(&dense_layouts)
            .chain(&connectivity_layouts)
            .chain(&sparse_layouts)
        {
            launcher::gen_merged_struct_build(os, layout, "initializeProgram", model.precision)?;
        }
        os.blank_line();

        if id_init_start > 0 {
            os.writeln("// Configure initialization kernel");
            os.writeln(&format!(
                "{k} = cl::Kernel(initializeProgram, \"{k}\");",
                k = KERNEL_NAMES[Kernel::Initialize as usize]
            ));
            let mut arg = 0usize;
            launcher::set_merged_group_kernel_params(os, KERNEL_NAMES[Kernel::Initialize as usize], &neuron_layouts, arg);
            arg += neuron_layouts.len();
            launcher::set_merged_group_kernel_params(os, KERNEL_NAMES[Kernel::Initialize as usize], &dense_layouts, arg);
            arg += dense_layouts.len();
            launcher::set_merged_group_kernel_params(os, KERNEL_NAMES[Kernel::Initialize as usize], &connectivity_layouts, arg);
            os.blank_line();
        }
        if id_sparse_init_start > 0 {
            os.writeln("// Configure sparse initialization kernel");
            os.writeln(&format!(
                "{k} = cl::Kernel(initializeProgram, \"{k}\");",
                k = KERNEL_NAMES[Kernel::InitializeSparse as usize]
            ));
            launcher::set_merged_group_kernel_params(
                os,
                KERNEL_NAMES[Kernel::InitializeSparse as usize],
                &sparse_layouts,
                0,
            );
            os.blank_line();
        }
        Ok(())
    })?;
    os.blank_line();

    os.write("void initialize()");
    os.scope::<_, GeneratorError>(|os| {
        if id_init_start > 0 {
            os.scope::<_, GeneratorError>(|os| {
                os.writeln("unsigned int deviceRNGSeed = 0;");
                for sg_id in model.synapse_group_ids() {
                    let sg = model.synapse_group(sg_id);
                    // Bitmask connectivity and learn-post column lengths
                    // must start zeroed before the init kernel appends.
                    if sg.is_sparse_connectivity_init_required()
                        && sg.matrix_type.contains(SynapseMatrixType::BITMASK)
                    {
                        let words = (model.neuron_group(sg.src).num_neurons as usize
                            * model.neuron_group(sg.trg).num_neurons as usize)
                            / 32
                            + 1;
                        os.writeln(&format!(
                            "CHECK_OPENCL_ERRORS(commandQueue.enqueueFillBuffer(d_gp{}, 0, 0, {} * sizeof(uint32_t)));",
                            sg.name, words
                        ));
                    } else if sg.matrix_type.contains(SynapseMatrixType::SPARSE)
                        && !sg.wu_model.learn_post_code.is_empty()
                    {
                        os.writeln(&format!(
                            "CHECK_OPENCL_ERRORS(commandQueue.enqueueFillBuffer(d_colLength{}, 0, 0, {} * sizeof(unsigned int)));",
                            sg.name,
                            model.neuron_group(sg.trg).num_neurons
                        ));
                    }
                }
                os.blank_line();
                backend.gen_kernel_dimensions(os, Kernel::Initialize, id_init_start);
                let num_init_groups =
                    neuron_layouts.len() + dense_layouts.len() + connectivity_layouts.len();
                os.writeln(&format!(
                    "CHECK_OPENCL_ERRORS({}.setArg({}, deviceRNGSeed));",
                    KERNEL_NAMES[Kernel::Initialize as usize],
                    num_init_groups
                ));
                os.writeln(&format!(
                    "CHECK_OPENCL_ERRORS(commandQueue.enqueueNDRangeKernel({}, cl::NullRange, globalWorkSize, localWorkSize));",
                    KERNEL_NAMES[Kernel::Initialize as usize]
                ));
                Ok(())
            })?;
        }
        Ok(())
    })?;
    os.blank_line();

    os.writeln("// Initialize all sparse structures");
    os.write("void initializeSparse()");
    os.scope::<_, GeneratorError>(|os| {
        os.writeln("copyStateToDevice(true);");
        os.writeln("copyConnectivityToDevice(true);");
        if id_sparse_init_start > 0 {
            os.scope::<_, GeneratorError>(|os| {
                backend.gen_kernel_dimensions(os, Kernel::InitializeSparse, id_sparse_init_start);
                os.writeln(&format!(
                    "CHECK_OPENCL_ERRORS(commandQueue.enqueueNDRangeKernel({}, cl::NullRange, globalWorkSize, localWorkSize));",
                    KERNEL_NAMES[Kernel::InitializeSparse as usize]
                ));
                Ok(())
            })?;
        }
        Ok(())
    })?;

    Ok(GeneratedModule { device_source: kernel_src, host_source: os.finish()? })
}

/// Emit `group->field[...] = value;` across delay slots when needed.
fn gen_variable_fill(
    os: &mut CodeStream,
    field: &str,
    value: &str,
    idx: &str,
    stride: &str,
    delay: bool,
    num_delay_slots: u32,
) -> Result<(), GeneratorError> {
    if !delay || num_delay_slots == 1 {
        os.writeln(&format!("group->{}[{}] = {};", field, idx, value));
        Ok(())
    } else {
        os.write(&format!("for(unsigned int d = 0; d < {}; d++)", num_delay_slots));
        os.scope::<_, GeneratorError>(|os| {
            os.writeln(&format!("group->{}[(d * {}) + {}] = {};", field, stride, idx, value));
            Ok(())
        })
    }
}

fn gen_scalar_fill(
    os: &mut CodeStream,
    field: &str,
    value: &str,
    delay: bool,
    num_delay_slots: u32,
) -> Result<(), GeneratorError> {
    if !delay || num_delay_slots == 1 {
        os.writeln(&format!("group->{}[0] = {};", field, value));
        Ok(())
    } else {
        os.write(&format!("for(unsigned int d = 0; d < {}; d++)", num_delay_slots));
        os.scope::<_, GeneratorError>(|os| {
            os.writeln(&format!("group->{}[d] = {};", field, value));
            Ok(())
        })
    }
}

/// Run one user variable-initialisation snippet and fill the result.
#[allow(clippy::too_many_arguments)]
fn gen_var_init_code(
    os: &mut CodeStream,
    parent_subs: &Substitutions,
    model: &ModelSpec,
    init: &VarInit,
    values_per_member: &[Vec<f64>],
    field: &str,
    ty: &str,
    context: &str,
    idx: &str,
    stride: &str,
    delay: bool,
    num_delay_slots: u32,
) -> Result<(), GeneratorError> {
    if init.code.is_empty() {
        return Ok(());
    }
    os.scope::<_, GeneratorError>(|os| {
        let mut subs = Substitutions::with_parent(parent_subs);
        add_folded_param_substitutions(&mut subs, &init.param_names, field, values_per_member, model.precision)?;
        os.writeln(&format!("{} initVal;", ty));
        subs.add_var_substitution("value", "initVal")?;
        let code = subs.apply_check_unreplaced(&init.code, context)?;
        os.writeln(&code);
        gen_variable_fill(os, field, "initVal", idx, stride, delay, num_delay_slots)
    })
}

/// Neuron-group initialisation: spike buffers, delay pointers, state
/// variables, postsynaptic input buffers and current source state.
fn gen_neuron_init(
    os: &mut CodeStream,
    model: &ModelSpec,
    merged: &MergedNeuronGroup,
    pop_subs: &Substitutions,
) -> Result<(), GeneratorError> {
    let arch_id = merged.archetype();
    let arch = model.neuron_group(arch_id);
    let lid = pop_subs.var("id")?.to_string();
    let delay = arch.is_delay_required();
    let true_spike_delay = delay && model.is_true_spike_required(arch_id);

    // Zero spike counts and spike buffers from the first thread.
    os.write(&format!("if({} == 0)", lid));
    os.scope::<_, GeneratorError>(|os| {
        gen_scalar_fill(os, "spkCnt", "0", true_spike_delay, arch.num_delay_slots)?;
        if model.is_spike_event_required(arch_id) {
            gen_scalar_fill(os, "spkCntEvnt", "0", delay, arch.num_delay_slots)?;
        }
        if delay {
            os.writeln("*group->spkQuePtr = 0;");
        }
        Ok(())
    })?;

    gen_variable_fill(os, "spk", "0", &lid, "group->numNeurons", true_spike_delay, arch.num_delay_slots)?;
    if model.is_spike_event_required(arch_id) {
        gen_variable_fill(os, "spkEvnt", "0", &lid, "group->numNeurons", delay, arch.num_delay_slots)?;
    }
    if model.is_spike_time_required(arch_id) {
        gen_variable_fill(os, "sT", "-TIME_MAX", &lid, "group->numNeurons", delay, arch.num_delay_slots)?;
    }

    // Neuron state variables.
    for (k, var) in arch.model.vars.iter().enumerate() {
        let values = member_values(model, &merged.groups, |m, id| {
            m.neuron_group(id).var_initialisers[k].params.clone()
        });
        let context = format!("initVar : {}merged{}", var.name, merged.index);
        gen_var_init_code(
            os,
            pop_subs,
            model,
            &arch.var_initialisers[k],
            &values,
            &var.name,
            &var.ty,
            &context,
            &lid,
            "group->numNeurons",
            delay,
            arch.num_delay_slots,
        )?;
    }

    // Incoming postsynaptic input buffers.
    for (i, sg_id) in arch.in_syn().iter().enumerate() {
        let sg = model.synapse_group(*sg_id);
        os.scope::<_, GeneratorError>(|os| {
            os.writeln(&format!(
                "group->inSynInSyn{}[{}] = {};",
                i,
                lid,
                model.scalar_expr(0.0)
            ));

            if sg.is_dendritic_delay_required() {
                os.write(&format!(
                    "for (unsigned int d = 0; d < {}; d++)",
                    sg.max_dendritic_delay_timesteps
                ));
                os.scope::<_, GeneratorError>(|os| {
                    os.writeln(&format!(
                        "group->denDelayInSyn{}[(d * group->numNeurons) + {}] = {};",
                        i,
                        lid,
                        model.scalar_expr(0.0)
                    ));
                    Ok(())
                })?;
                os.write(&format!("if({} == 0)", lid));
                os.scope::<_, GeneratorError>(|os| {
                    os.writeln(&format!("*group->denDelayPtrInSyn{} = 0;", i));
                    Ok(())
                })?;
            }

            if sg.matrix_type.contains(SynapseMatrixType::INDIVIDUAL_PSM) {
                for (k, var) in sg.ps_model.vars.iter().enumerate() {
                    let values = member_values(model, &merged.groups, |m, id| {
                        m.synapse_group(m.neuron_group(id).in_syn()[i]).ps_var_initialisers[k]
                            .params
                            .clone()
                    });
                    let field = format!("{}InSyn{}", var.name, i);
                    let context = format!("initVar : {}merged{}", field, merged.index);
                    gen_var_init_code(
                        os,
                        pop_subs,
                        model,
                        &sg.ps_var_initialisers[k],
                        &values,
                        &field,
                        &var.ty,
                        &context,
                        &lid,
                        "group->numNeurons",
                        false,
                        1,
                    )?;
                }
            }
            Ok(())
        })?;
    }

    // Current source variables.
    os.writeln("// current source variables");
    for (i, cs) in arch.current_sources.iter().enumerate() {
        for (k, var) in cs.model.vars.iter().enumerate() {
            let values = member_values(model, &merged.groups, |m, id| {
                m.neuron_group(id).current_sources[i].var_initialisers[k].params.clone()
            });
            let field = format!("{}CS{}", var.name, i);
            let context = format!("initVar : {}merged{}", field, merged.index);
            gen_var_init_code(
                os,
                pop_subs,
                model,
                &cs.var_initialisers[k],
                &values,
                &field,
                &var.ty,
                &context,
                &lid,
                "group->numNeurons",
                false,
                1,
            )?;
        }
    }
    Ok(())
}

/// Per-row weight-update variable initialisation; expects `id_pre`,
/// `id_post` and `id_syn` substitutions from the caller.
fn gen_wu_var_init(
    os: &mut CodeStream,
    model: &ModelSpec,
    merged: &MergedSynapseGroup,
    subs: &Substitutions,
) -> Result<(), GeneratorError> {
    let arch = model.synapse_group(merged.archetype());
    if !arch.is_wu_var_init_required() {
        return Ok(());
    }
    for (k, var) in arch.wu_model.vars.iter().enumerate() {
        let values = member_values(model, &merged.groups, |m, id| {
            m.synapse_group(id).wu_var_initialisers[k].params.clone()
        });
        let context = format!("initVar : merged{}{}", var.name, merged.index);
        gen_var_init_code(
            os,
            subs,
            model,
            &arch.wu_var_initialisers[k],
            &values,
            &var.name,
            &var.ty,
            &context,
            subs.var("id_syn")?,
            "group->numSrcNeurons * group->rowStride",
            false,
            1,
        )?;
    }
    Ok(())
}

/// Row-wise connectivity building with the `addSynapse` function
/// substitution (append for SPARSE, atomic bit set for BITMASK).
fn gen_connectivity_init(
    os: &mut CodeStream,
    model: &ModelSpec,
    merged: &MergedSynapseGroup,
    pop_subs: &Substitutions,
) -> Result<(), GeneratorError> {
    let arch = model.synapse_group(merged.archetype());
    let lid = pop_subs.var("id")?.to_string();
    let mut subs = Substitutions::with_parent(&*pop_subs);

    if arch.matrix_type.contains(SynapseMatrixType::BITMASK) {
        // 64-bit indices once the bitmask can exceed 32 bits of
        // addressing.
        let max_synapses = merged
            .groups
            .iter()
            .map(|id| {
                let sg = model.synapse_group(*id);
                model.neuron_group(sg.src).num_neurons as u64
                    * model.neuron_group(sg.trg).num_neurons as u64
            })
            .max()
            .unwrap_or(0);
        os.writeln("// Calculate indices");
        if max_synapses > u32::MAX as u64 {
            os.writeln(&format!(
                "const ulong rowStartGID = {} * group->numTrgNeurons;",
                lid
            ));
        } else {
            os.writeln(&format!(
                "const unsigned int rowStartGID = {} * group->numTrgNeurons;",
                lid
            ));
        }
        subs.add_func_substitution(
            "addSynapse",
            1,
            "atomic_or(&group->gp[(rowStartGID + $(0)) / 32], 0x80000000 >> ((rowStartGID + $(0)) & 31))",
        )?;
    } else if arch.matrix_type.contains(SynapseMatrixType::SPARSE) {
        os.writeln(&format!("group->rowLength[{}] = 0;", lid));
        subs.add_func_substitution(
            "addSynapse",
            1,
            format!(
                "group->ind[({} * group->rowStride) + (group->rowLength[{}]++)] = $(0)",
                lid, lid
            ),
        )?;
    } else {
        debug_assert!(false, "connectivity init requires SPARSE or BITMASK matrix");
    }

    subs.add_var_substitution("id_pre", lid.clone())?;
    subs.add_func_substitution("endRow", 0, "break")?;

    let Some(init) = arch.connectivity_init.as_ref() else {
        return Ok(());
    };
    let values = member_values(model, &merged.groups, |m, id| {
        m.synapse_group(id)
            .connectivity_init
            .as_ref()
            .map(|c| c.params.clone())
            .unwrap_or_default()
    });
    add_folded_param_substitutions(&mut subs, &init.param_names, "", &values, model.precision)?;

    // Initialise state variables and loop on generated code to build
    // the row.
    os.writeln("// Build sparse connectivity");
    for (name, ty, value) in &init.row_build_state_vars {
        let context = format!("initSparseConnectivity state var : merged{}", merged.index);
        let value = subs.apply_check_unreplaced(value, &context)?;
        os.writeln(&format!("{} {} = {};", ty, name, value));
    }
    for (name, _, _) in &init.row_build_state_vars {
        subs.add_var_substitution(name, name.clone())?;
    }
    os.write("while(true)");
    os.scope::<_, GeneratorError>(|os| {
        let context = format!("initSparseConnectivity : merged{}", merged.index);
        let code = subs.apply_check_unreplaced(&init.row_build_code, &context)?;
        os.writeln(&code);
        Ok(())
    })
}

/// Sparse-structure initialisation pass: block-wise row staging, the
/// optional cumulative row-start prefix sum, per-synapse variable
/// init, learn-post column remapping and the synapse-dynamics remap.
fn gen_sparse_init(
    os: &mut CodeStream,
    model: &ModelSpec,
    merged: &MergedSynapseGroup,
    pop_subs: &mut Substitutions,
    workgroup_size: usize,
) -> Result<(), GeneratorError> {
    let arch = model.synapse_group(merged.archetype());
    let lid = pop_subs.var("id")?.to_string();
    let has_dynamics = !arch.wu_model.synapse_dynamics_code.is_empty();
    let has_learn_post = !arch.wu_model.learn_post_code.is_empty();

    os.writeln(&format!("unsigned int idx = {};", lid));
    os.writeln(&format!(
        "const unsigned int numBlocks = (group->numSrcNeurons + {} - 1) / {};",
        workgroup_size, workgroup_size
    ));

    os.write("for(unsigned int r = 0; r < numBlocks; r++)");
    os.scope::<_, GeneratorError>(|os| {
        os.write("const unsigned numRowsInBlock = (r == (numBlocks - 1))");
        os.write(&format!(" ? ((group->numSrcNeurons - 1) % {}) + 1", workgroup_size));
        os.writeln(&format!(" : {};", workgroup_size));

        os.writeln("barrier(CLK_LOCAL_MEM_FENCE);");
        os.write("if (localId < numRowsInBlock)");
        os.scope::<_, GeneratorError>(|os| {
            os.writeln(&format!(
                "shRowLength[localId] = group->rowLength[(r * {}) + localId];",
                workgroup_size
            ));
            Ok(())
        })?;

        if has_dynamics {
            os.writeln("barrier(CLK_LOCAL_MEM_FENCE);");
            // First thread accumulates this block's row starts.
            os.write("if (localId == 0)");
            os.scope::<_, GeneratorError>(|os| {
                os.writeln(&format!(
                    "unsigned int rowStart = (r == 0) ? 0 : shRowStart[{}];",
                    workgroup_size
                ));
                os.writeln("shRowStart[0] = rowStart;");
                os.write("for(unsigned int i = 0; i < numRowsInBlock; i++)");
                os.scope::<_, GeneratorError>(|os| {
                    os.writeln("rowStart += shRowLength[i];");
                    os.writeln("shRowStart[i + 1] = rowStart;");
                    Ok(())
                })?;
                os.write(&format!("if({} == 0 && (r == numBlocks - 1))", lid));
                os.scope::<_, GeneratorError>(|os| {
                    os.writeln("group->synRemap[0] = shRowStart[numRowsInBlock];");
                    Ok(())
                })?;
                Ok(())
            })?;
        }

        os.writeln("barrier(CLK_LOCAL_MEM_FENCE);");

        os.write("for(unsigned int i = 0; i < numRowsInBlock; i++)");
        os.scope::<_, GeneratorError>(|os| {
            os.write(&format!("if({} < shRowLength[i])", lid));
            os.scope::<_, GeneratorError>(|os| {
                if arch.is_wu_var_init_required() {
                    let mut subs = Substitutions::with_parent(&*pop_subs);
                    subs.add_var_substitution(
                        "id_pre",
                        format!("((r * {}) + i)", workgroup_size),
                    )?;
                    subs.add_var_substitution("id_post", "group->ind[idx]".to_string())?;
                    subs.add_var_substitution("id_syn", "idx".to_string())?;
                    gen_wu_var_init(os, model, merged, &subs)?;
                }

                if has_learn_post {
                    os.scope::<_, GeneratorError>(|os| {
                        os.writeln("const unsigned int postIndex = group->ind[idx];");
                        os.writeln("const unsigned int colLocation = atomic_add(&group->colLength[postIndex], 1);");
                        os.writeln("const unsigned int colMajorIndex = (postIndex * group->colStride) + colLocation;");
                        os.writeln("group->remap[colMajorIndex] = idx;");
                        Ok(())
                    })?;
                }

                if has_dynamics {
                    os.scope::<_, GeneratorError>(|os| {
                        os.writeln(&format!(
                            "group->synRemap[shRowStart[i] + {} + 1] = idx;",
                            lid
                        ));
                        Ok(())
                    })?;
                }
                Ok(())
            })?;
            os.writeln("idx += group->rowStride;");
            Ok(())
        })
    })
}
