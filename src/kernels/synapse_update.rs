use crate::backend::backend::{pad_size, Backend, Kernel, KERNEL_NAMES};
use crate::backend::dispatch::{gen_parallel_group, gen_per_member_group};
use crate::backend::launcher;
use crate::backend::strategy::add_accumulation_substitution;
use crate::codestream::CodeStream;
use crate::error::GeneratorError;
use crate::merger::fields::{
    global_wu_var_values, postsynaptic_update_layout, presynaptic_update_layout,
    synapse_dendritic_delay_update_layout, synapse_dynamics_layout, MergedStructLayout,
};
use crate::merger::{MergedSynapseGroup, ModelMerged};
use crate::model::{ModelSpec, SynapseGroup, SynapseMatrixType};
use crate::substitution::Substitutions;

use super::common::{add_folded_param_substitutions, member_values};
use super::GeneratedModule;

/// Slot of the source population's spike queue holding spikes delayed
/// by this group's axonal delay.
fn presynaptic_axonal_delay_slot(model: &ModelSpec, sg: &SynapseGroup) -> String {
    let slots = model.neuron_group(sg.src).num_delay_slots;
    if sg.delay_steps == 0 {
        "(*group->srcSpkQuePtr)".to_string()
    } else {
        format!("((*group->srcSpkQuePtr + {}) % {})", slots - sg.delay_steps, slots)
    }
}

fn postsynaptic_back_prop_delay_slot() -> String {
    "(*group->trgSpkQuePtr)".to_string()
}

/// Generate the synapse-update kernel program (dendritic delay reset,
/// presynaptic update, postsynaptic learning, synapse dynamics) and its
/// host launcher.
pub fn generate_synapse_update(
    model_merged: &ModelMerged,
    backend: &Backend,
) -> Result<GeneratedModule, GeneratorError> {
    let model = model_merged.model();

    let mut strides = std::collections::HashMap::new();
    for sg in model.synapse_group_ids() {
        strides.insert(sg, backend.synaptic_matrix_row_stride(model, sg)? as u32);
    }
    let row_stride = |sg: crate::model::SynapseGroupId| strides[&sg];

    let delay_layouts: Vec<MergedStructLayout> = model_merged
        .synapse_dendritic_delay_update_groups
        .iter()
        .map(|m| synapse_dendritic_delay_update_layout(model, m))
        .collect();
    let presyn_layouts: Vec<MergedStructLayout> = model_merged
        .presynaptic_update_groups
        .iter()
        .map(|m| presynaptic_update_layout(model, m, &row_stride))
        .collect();
    let postsyn_layouts: Vec<MergedStructLayout> = model_merged
        .postsynaptic_update_groups
        .iter()
        .map(|m| postsynaptic_update_layout(model, m, &row_stride))
        .collect();
    let dynamics_layouts: Vec<MergedStructLayout> = model_merged
        .synapse_dynamics_groups
        .iter()
        .map(|m| synapse_dynamics_layout(model, m, &row_stride))
        .collect();

    let mut os = CodeStream::new();
    os.writeln("//--------------------------------------------------------------------------");
    os.writeln("// OpenCL program and kernels");
    os.writeln("//--------------------------------------------------------------------------");
    os.writeln("cl::Program synapseUpdateProgram;");
    os.writeln(&format!("cl::Kernel {};", KERNEL_NAMES[Kernel::PreSynapseReset as usize]));
    os.writeln(&format!("cl::Kernel {};", KERNEL_NAMES[Kernel::PresynapticUpdate as usize]));
    os.writeln(&format!("cl::Kernel {};", KERNEL_NAMES[Kernel::PostsynapticUpdate as usize]));
    os.writeln(&format!("cl::Kernel {};", KERNEL_NAMES[Kernel::SynapseDynamicsUpdate as usize]));
    for layout in delay_layouts
        .iter()
        .chain(&presyn_layouts)
        .chain(&postsyn_layouts)
        .chain(&dynamics_layouts)
    {
        launcher::gen_merged_struct_preamble(&mut os, layout);
    }
    os.blank_line();

    let mut kernels = CodeStream::new();
    backend.gen_kernel_preamble(&mut kernels, model);
    kernels.writeln("// ------------------------------------------------------------------------");
    kernels.writeln("// bit tool macros");
    kernels.writeln("#define B(x,i) ((x) & (0x80000000 >> (i))) //!< Extract the bit at the specified position i from x");
    kernels.writeln("#define setB(x,i) x= ((x) | (0x80000000 >> (i))) //!< Set the bit at the specified position i in x to 1");
    kernels.writeln("#define delB(x,i) x= ((x) & (~(0x80000000 >> (i)))) //!< Set the bit at the specified position i in x to 0");
    kernels.blank_line();

    backend.gen_atomic_add_float(&mut kernels, model, "local")?;
    backend.gen_atomic_add_float(&mut kernels, model, "global")?;

    model_merged.presynaptic_update_support_code.gen(&mut kernels);
    model_merged.postsynaptic_update_support_code.gen(&mut kernels);
    model_merged.synapse_dynamics_support_code.gen(&mut kernels);
    kernels.blank_line();

    for layout in delay_layouts
        .iter()
        .chain(&presyn_layouts)
        .chain(&postsyn_layouts)
        .chain(&dynamics_layouts)
    {
        launcher::gen_merged_struct_def(&mut kernels, layout);
    }
    kernels.blank_line();

    {
        let mut id = 0usize;
        launcher::gen_group_start_ids(
            &mut kernels,
            &mut id,
            backend.workgroup_size(Kernel::PresynapticUpdate),
            &model_merged.presynaptic_update_groups,
            &|m: &MergedSynapseGroup, k| {
                backend
                    .presynaptic_update_strategy(model, m.groups[k])
                    .map(|s| s.num_threads(model, m.groups[k]))
                    .unwrap_or(0)
            },
        );
        let mut id = 0usize;
        launcher::gen_group_start_ids(
            &mut kernels,
            &mut id,
            backend.workgroup_size(Kernel::PostsynapticUpdate),
            &model_merged.postsynaptic_update_groups,
            &|m: &MergedSynapseGroup, k| backend.num_postsynaptic_update_threads(model, m.groups[k]),
        );
        let mut id = 0usize;
        launcher::gen_group_start_ids(
            &mut kernels,
            &mut id,
            backend.workgroup_size(Kernel::SynapseDynamicsUpdate),
            &model_merged.synapse_dynamics_groups,
            &|m: &MergedSynapseGroup, k| backend.num_synapse_dynamics_threads(model, m.groups[k]),
        );
        kernels.blank_line();
    }

    for layout in delay_layouts
        .iter()
        .chain(&presyn_layouts)
        .chain(&postsyn_layouts)
        .chain(&dynamics_layouts)
    {
        launcher::gen_merged_struct_build_kernel(&mut kernels, layout)?;
    }

    // ------------------------------------------------------------------
    // preSynapseResetKernel: cycle dendritic delay ring pointers.
    // ------------------------------------------------------------------
    let mut id_pre_synapse_reset = 0usize;
    if !model_merged.synapse_dendritic_delay_update_groups.is_empty() {
        kernels.write(&format!("__kernel void {}(", KERNEL_NAMES[Kernel::PreSynapseReset as usize]));
        launcher::gen_merged_group_kernel_params(&mut kernels, &delay_layouts, false);
        kernels.write(")");
        kernels.scope::<_, GeneratorError>(|os| {
            os.writeln("const unsigned int id = get_global_id(0);");
            gen_per_member_group(
                os,
                &model_merged.synapse_dendritic_delay_update_groups,
                &mut id_pre_synapse_reset,
                &mut |os, merged| {
                    let arch = model.synapse_group(merged.archetype());
                    os.writeln(&format!(
                        "*group->denDelayPtr = (*group->denDelayPtr + 1) % {};",
                        arch.max_dendritic_delay_timesteps
                    ));
                    Ok(())
                },
            )
        })?;
        kernels.blank_line();
    }

    // ------------------------------------------------------------------
    // updatePresynapticKernel
    // ------------------------------------------------------------------
    let mut id_presynaptic_start = 0usize;
    if !model_merged.presynaptic_update_groups.is_empty() {
        kernels.write(&format!(
            "__kernel void {}(",
            KERNEL_NAMES[Kernel::PresynapticUpdate as usize]
        ));
        launcher::gen_merged_group_kernel_params(&mut kernels, &presyn_layouts, true);
        kernels.write(&format!("{} t)", model.time_precision.name()));
        kernels.scope::<_, GeneratorError>(|os| {
            let mut kernel_subs = backend.kernel_substitutions(model);
            kernel_subs.add_var_substitution("t", "t")?;

            os.writeln("const unsigned int localId = get_local_id(0);");
            os.writeln("const unsigned int id = get_global_id(0);");

            let wg = backend.workgroup_size(Kernel::PresynapticUpdate);
            let scalar = model.precision.name();

            let any = |pred: &dyn Fn(&MergedSynapseGroup) -> bool| {
                model_merged.presynaptic_update_groups.iter().any(|m| pred(m))
            };
            if model_merged.presynaptic_update_groups.iter().any(|m| {
                backend
                    .presynaptic_update_strategy(model, m.archetype())
                    .map(|s| s.should_accumulate_in_shared_memory(model, m, backend))
                    .unwrap_or(false)
            }) {
                os.writeln(&format!("__local {} shLg[{}];", scalar, wg));
            }
            if any(&|m| {
                let sg = model.synapse_group(m.archetype());
                sg.span_type == crate::model::SpanType::Postsynaptic
                    && sg.matrix_type.contains(SynapseMatrixType::SPARSE)
            }) {
                os.writeln(&format!("__local unsigned int shRowLength[{}];", wg));
            }
            if any(&|m| model.synapse_group(m.archetype()).is_true_spike_required()) {
                os.writeln(&format!("__local unsigned int shSpk[{}];", wg));
            }
            if any(&|m| model.synapse_group(m.archetype()).is_spike_event_required()) {
                os.writeln(&format!("__local unsigned int shSpkEvnt[{}];", wg));
            }

            gen_parallel_group(
                os,
                &kernel_subs,
                &model_merged.presynaptic_update_groups,
                &mut id_presynaptic_start,
                &|m: &MergedSynapseGroup| {
                    m.groups
                        .iter()
                        .map(|id| {
                            backend
                                .presynaptic_update_strategy(model, *id)
                                .map(|s| pad_size(s.num_threads(model, *id), wg))
                                .unwrap_or(0)
                        })
                        .collect()
                },
                &mut |os, merged, pop_subs| {
                    gen_presynaptic_group_update(os, model_merged, merged, pop_subs, backend)
                },
            )
        })?;
    }

    // ------------------------------------------------------------------
    // updatePostsynapticKernel
    // ------------------------------------------------------------------
    let mut id_postsynaptic_start = 0usize;
    if !model_merged.postsynaptic_update_groups.is_empty() {
        kernels.write(&format!(
            "__kernel void {}(",
            KERNEL_NAMES[Kernel::PostsynapticUpdate as usize]
        ));
        launcher::gen_merged_group_kernel_params(&mut kernels, &postsyn_layouts, true);
        kernels.write(&format!("{} t)", model.time_precision.name()));
        kernels.scope::<_, GeneratorError>(|os| {
            let mut kernel_subs = backend.kernel_substitutions(model);
            kernel_subs.add_var_substitution("t", "t")?;

            os.writeln("const unsigned int localId = get_local_id(0);");
            os.writeln("const unsigned int id = get_global_id(0);");
            let wg = backend.workgroup_size(Kernel::PostsynapticUpdate);
            os.writeln(&format!("__local unsigned int shSpk[{}];", wg));
            if model_merged.postsynaptic_update_groups.iter().any(|m| {
                model
                    .synapse_group(m.archetype())
                    .matrix_type
                    .contains(SynapseMatrixType::SPARSE)
            }) {
                os.writeln(&format!("__local unsigned int shColLength[{}];", wg));
            }

            gen_parallel_group(
                os,
                &kernel_subs,
                &model_merged.postsynaptic_update_groups,
                &mut id_postsynaptic_start,
                &|m: &MergedSynapseGroup| {
                    m.groups
                        .iter()
                        .map(|id| pad_size(backend.num_postsynaptic_update_threads(model, *id), wg))
                        .collect()
                },
                &mut |os, merged, pop_subs| {
                    gen_postsynaptic_group_update(os, model_merged, merged, pop_subs, backend)
                },
            )
        })?;
    }

    // ------------------------------------------------------------------
    // updateSynapseDynamicsKernel
    // ------------------------------------------------------------------
    let mut id_synapse_dynamics_start = 0usize;
    if !model_merged.synapse_dynamics_groups.is_empty() {
        kernels.write(&format!(
            "__kernel void {}(",
            KERNEL_NAMES[Kernel::SynapseDynamicsUpdate as usize]
        ));
        launcher::gen_merged_group_kernel_params(&mut kernels, &dynamics_layouts, true);
        kernels.write(&format!("{} t)", model.time_precision.name()));
        kernels.scope::<_, GeneratorError>(|os| {
            let mut kernel_subs = backend.kernel_substitutions(model);
            kernel_subs.add_var_substitution("t", "t")?;

            os.writeln("const unsigned int localId = get_local_id(0);");
            os.writeln("const unsigned int id = get_global_id(0);");
            let wg = backend.workgroup_size(Kernel::SynapseDynamicsUpdate);

            gen_parallel_group(
                os,
                &kernel_subs,
                &model_merged.synapse_dynamics_groups,
                &mut id_synapse_dynamics_start,
                &|m: &MergedSynapseGroup| {
                    m.groups
                        .iter()
                        .map(|id| pad_size(backend.num_synapse_dynamics_threads(model, *id), wg))
                        .collect()
                },
                &mut |os, merged, pop_subs| {
                    gen_synapse_dynamics_group_update(os, model_merged, merged, pop_subs, backend)
                },
            )
        })?;
    }
    kernels.blank_line();

    let kernel_src = kernels.finish()?;

    os.writeln("const char* synapseUpdateSrc = ");
    backend.divide_kernel_stream_in_parts(&mut os, &kernel_src, 5000);
    os.writeln(";");
    os.blank_line();

    os.writeln("// Initialize the synapseUpdate kernels");
    os.write("void buildSynapseUpdateProgram()");
    os.scope::<_, GeneratorError>(|os| {
        os.writeln("// Build program");
        os.writeln("synapseUpdateProgram = cl::Program(clContext, synapseUpdateSrc, true);");
        os.write("if(synapseUpdateProgram.build(\"-cl-std=CL1.2\") != CL_SUCCESS)");
        os.scope::<_, GeneratorError>(|os| {
            os.writeln("throw std::runtime_error(\"Compile error:\" + synapseUpdateProgram.getBuildInfo<CL_PROGRAM_BUILD_LOG>(clDevice));");
            Ok(())
        })?;
        os.blank_line();

        os.writeln("// Configure merged struct buffers and kernels");
        for layout in delay_layouts
            .iter()
            .chain(&presyn_layouts)
            .chain(&postsyn_layouts)
            .chain(&dynamics_layouts)
        {
            launcher::gen_merged_struct_build(os, layout, "synapseUpdateProgram", model.precision)?;
        }
        os.blank_line();

        if id_pre_synapse_reset > 0 {
            os.writeln("// Configure dendritic delay update kernel");
            os.writeln(&format!(
                "{k} = cl::Kernel(synapseUpdateProgram, \"{k}\");",
                k = KERNEL_NAMES[Kernel::PreSynapseReset as usize]
            ));
            launcher::set_merged_group_kernel_params(
                os,
                KERNEL_NAMES[Kernel::PreSynapseReset as usize],
                &delay_layouts,
                0,
            );
            os.blank_line();
        }
        if id_presynaptic_start > 0 {
            os.writeln("// Configure presynaptic update kernel");
            os.writeln(&format!(
                "{k} = cl::Kernel(synapseUpdateProgram, \"{k}\");",
                k = KERNEL_NAMES[Kernel::PresynapticUpdate as usize]
            ));
            launcher::set_merged_group_kernel_params(
                os,
                KERNEL_NAMES[Kernel::PresynapticUpdate as usize],
                &presyn_layouts,
                0,
            );
            os.blank_line();
        }
        if id_postsynaptic_start > 0 {
            os.writeln("// Configure postsynaptic update kernel");
            os.writeln(&format!(
                "{k} = cl::Kernel(synapseUpdateProgram, \"{k}\");",
                k = KERNEL_NAMES[Kernel::PostsynapticUpdate as usize]
            ));
            launcher::set_merged_group_kernel_params(
                os,
                KERNEL_NAMES[Kernel::PostsynapticUpdate as usize],
                &postsyn_layouts,
                0,
            );
            os.blank_line();
        }
        if id_synapse_dynamics_start > 0 {
            os.writeln("// Configure synapse dynamics kernel");
            os.writeln(&format!(
                "{k} = cl::Kernel(synapseUpdateProgram, \"{k}\");",
                k = KERNEL_NAMES[Kernel::SynapseDynamicsUpdate as usize]
            ));
            launcher::set_merged_group_kernel_params(
                os,
                KERNEL_NAMES[Kernel::SynapseDynamicsUpdate as usize],
                &dynamics_layouts,
                0,
            );
            os.blank_line();
        }
        Ok(())
    })?;
    os.blank_line();

    os.write(&format!("void updateSynapses({} t)", model.time_precision.name()));
    os.scope::<_, GeneratorError>(|os| {
        if id_pre_synapse_reset > 0 {
            os.scope::<_, GeneratorError>(|os| {
                backend.gen_kernel_dimensions(os, Kernel::PreSynapseReset, id_pre_synapse_reset);
                os.writeln(&format!(
                    "CHECK_OPENCL_ERRORS(commandQueue.enqueueNDRangeKernel({}, cl::NullRange, globalWorkSize, localWorkSize));",
                    KERNEL_NAMES[Kernel::PreSynapseReset as usize]
                ));
                Ok(())
            })?;
        }
        if id_presynaptic_start > 0 {
            os.scope::<_, GeneratorError>(|os| {
                os.writeln(&format!(
                    "CHECK_OPENCL_ERRORS({}.setArg({}, t));",
                    KERNEL_NAMES[Kernel::PresynapticUpdate as usize],
                    presyn_layouts.len()
                ));
                backend.gen_kernel_dimensions(os, Kernel::PresynapticUpdate, id_presynaptic_start);
                os.writeln(&format!(
                    "CHECK_OPENCL_ERRORS(commandQueue.enqueueNDRangeKernel({}, cl::NullRange, globalWorkSize, localWorkSize));",
                    KERNEL_NAMES[Kernel::PresynapticUpdate as usize]
                ));
                Ok(())
            })?;
        }
        if id_postsynaptic_start > 0 {
            os.scope::<_, GeneratorError>(|os| {
                os.writeln(&format!(
                    "CHECK_OPENCL_ERRORS({}.setArg({}, t));",
                    KERNEL_NAMES[Kernel::PostsynapticUpdate as usize],
                    postsyn_layouts.len()
                ));
                backend.gen_kernel_dimensions(os, Kernel::PostsynapticUpdate, id_postsynaptic_start);
                os.writeln(&format!(
                    "CHECK_OPENCL_ERRORS(commandQueue.enqueueNDRangeKernel({}, cl::NullRange, globalWorkSize, localWorkSize));",
                    KERNEL_NAMES[Kernel::PostsynapticUpdate as usize]
                ));
                Ok(())
            })?;
        }
        if id_synapse_dynamics_start > 0 {
            os.scope::<_, GeneratorError>(|os| {
                os.writeln(&format!(
                    "CHECK_OPENCL_ERRORS({}.setArg({}, t));",
                    KERNEL_NAMES[Kernel::SynapseDynamicsUpdate as usize],
                    dynamics_layouts.len()
                ));
                backend.gen_kernel_dimensions(os, Kernel::SynapseDynamicsUpdate, id_synapse_dynamics_start);
                os.writeln(&format!(
                    "CHECK_OPENCL_ERRORS(commandQueue.enqueueNDRangeKernel({}, cl::NullRange, globalWorkSize, localWorkSize));",
                    KERNEL_NAMES[Kernel::SynapseDynamicsUpdate as usize]
                ));
                Ok(())
            })?;
        }
        Ok(())
    })?;

    Ok(GeneratedModule { device_source: kernel_src, host_source: os.finish()? })
}

/// Install weight-update model substitutions: variables (individual or
/// folded globals), parameters, derived parameters and spike times.
/// Expects `id_pre`, `id_post` and `id_syn` already bound in `subs`.
fn add_wu_substitutions(
    subs: &mut Substitutions,
    model: &ModelSpec,
    merged: &MergedSynapseGroup,
) -> Result<(), GeneratorError> {
    let arch = model.synapse_group(merged.archetype());
    let members: Vec<&SynapseGroup> =
        merged.groups.iter().map(|id| model.synapse_group(*id)).collect();

    if arch.matrix_type.contains(SynapseMatrixType::INDIVIDUAL_G) {
        let id_syn = subs.var("id_syn")?.to_string();
        for var in &arch.wu_model.vars {
            subs.add_var_substitution(&var.name, format!("group->{}[{}]", var.name, id_syn))?;
        }
    } else {
        let (names, values) = global_wu_var_values(&members);
        add_folded_param_substitutions(subs, &names, "", &values, model.precision)?;
    }

    let param_values = member_values(model, &merged.groups, |m, id| m.synapse_group(id).wu_params.clone());
    add_folded_param_substitutions(subs, &arch.wu_model.param_names, "", &param_values, model.precision)?;
    let derived_values =
        member_values(model, &merged.groups, |m, id| m.synapse_group(id).wu_derived_params.clone());
    add_folded_param_substitutions(subs, &arch.wu_model.derived_param_names, "", &derived_values, model.precision)?;

    if crate::merger::fields::wu_reads(arch, "$(sT_pre)") {
        let offset = if model.neuron_group(arch.src).is_delay_required() {
            "preReadDelayOffset + "
        } else {
            ""
        };
        let id_pre = subs.var("id_pre")?.to_string();
        subs.add_var_substitution("sT_pre", format!("group->srcST[{}{}]", offset, id_pre))?;
    }
    if crate::merger::fields::wu_reads(arch, "$(sT_post)") {
        let offset = if model.neuron_group(arch.trg).is_delay_required() {
            "postReadDelayOffset + "
        } else {
            ""
        };
        let id_post = subs.var("id_post")?.to_string();
        subs.add_var_substitution("sT_post", format!("group->trgST[{}{}]", offset, id_post))?;
    }
    Ok(())
}

/// Emit one weight-update code block, wrapped in its support-code
/// namespace when the model has one.
fn gen_wu_code(
    os: &mut CodeStream,
    model_merged: &ModelMerged,
    merged: &MergedSynapseGroup,
    subs: &Substitutions,
    code: &str,
    namespace_pool: &crate::merger::SupportCodeMerged,
    context: &str,
) -> Result<(), GeneratorError> {
    let arch = model_merged.model().synapse_group(merged.archetype());
    let applied = subs.apply_check_unreplaced(code, context)?;
    match namespace_pool.support_code_namespace(&arch.wu_model.support_code) {
        Some(ns) => {
            os.open(29);
            os.writeln(&format!(" using namespace {};", ns));
            os.writeln(&applied);
            os.close(29)?;
        }
        None => os.writeln(&applied),
    }
    Ok(())
}

/// Handler body for one merged presynaptic update group.
fn gen_presynaptic_group_update(
    os: &mut CodeStream,
    model_merged: &ModelMerged,
    merged: &MergedSynapseGroup,
    pop_subs: &mut Substitutions,
    backend: &Backend,
) -> Result<(), GeneratorError> {
    let model = model_merged.model();
    let arch = model.synapse_group(merged.archetype());
    let strategy = backend.presynaptic_update_strategy(model, merged.archetype())?;
    let scalar = model.precision.name();
    let lid = pop_subs.var("id")?.to_string();

    if model.neuron_group(arch.src).is_delay_required() {
        os.writeln(&format!(
            "const unsigned int preReadDelaySlot = {};",
            presynaptic_axonal_delay_slot(model, arch)
        ));
        os.writeln("const unsigned int preReadDelayOffset = preReadDelaySlot * group->numSrcNeurons;");
    }
    if model.neuron_group(arch.trg).is_delay_required() {
        os.writeln(&format!(
            "const unsigned int postReadDelayOffset = {} * group->numTrgNeurons;",
            postsynaptic_back_prop_delay_slot()
        ));
    }

    let in_register = strategy.should_accumulate_in_register(model, merged, backend);
    let in_shared = strategy.should_accumulate_in_shared_memory(model, merged, backend);

    if in_register {
        os.writeln("// only do this for existing neurons");
        os.writeln(&format!("{} linSyn = 0;", scalar));
    } else if in_shared {
        os.write("if(localId < group->numTrgNeurons)");
        os.scope::<_, GeneratorError>(|os| {
            os.writeln("shLg[localId] = 0;");
            Ok(())
        })?;
        os.writeln("barrier(CLK_LOCAL_MEM_FENCE);");
    }

    let mut thresh_handler = |os: &mut CodeStream,
                              m: &MergedSynapseGroup,
                              subs: &mut Substitutions|
     -> Result<(), GeneratorError> {
        let arch = model.synapse_group(m.archetype());
        let mut subs = Substitutions::with_parent(&*subs);
        add_wu_substitutions(&mut subs, model, m)?;
        let context = format!("{} : eventThresholdConditionCode", arch.name);
        let applied =
            subs.apply_check_unreplaced(&arch.wu_model.event_threshold_condition_code, &context)?;
        os.write(&applied);
        Ok(())
    };

    let sim_handler_for = |event: bool| {
        move |os: &mut CodeStream,
              m: &MergedSynapseGroup,
              subs: &mut Substitutions|
              -> Result<(), GeneratorError> {
            let arch = model.synapse_group(m.archetype());
            let mut subs = Substitutions::with_parent(&*subs);
            add_wu_substitutions(&mut subs, model, m)?;
            let (code, context) = if event {
                (&arch.wu_model.event_code, format!("{} : eventCode", arch.name))
            } else {
                (&arch.wu_model.sim_code, format!("{} : simCode", arch.name))
            };
            gen_wu_code(
                os,
                model_merged,
                m,
                &subs,
                code,
                &model_merged.presynaptic_update_support_code,
                &context,
            )
        }
    };

    // Process spike-like events, then true spikes.
    if arch.is_spike_event_required() {
        os.scope::<_, GeneratorError>(|os| {
            strategy.gen_code(
                os,
                model,
                merged,
                &*pop_subs,
                backend,
                false,
                &mut thresh_handler,
                &mut sim_handler_for(true),
            )
        })?;
    }
    if arch.is_true_spike_required() {
        os.scope::<_, GeneratorError>(|os| {
            strategy.gen_code(
                os,
                model,
                merged,
                &*pop_subs,
                backend,
                true,
                &mut thresh_handler,
                &mut sim_handler_for(false),
            )
        })?;
    }
    os.blank_line();

    // Write accumulated input back to global memory.
    if in_register {
        os.writeln("// only do this for existing neurons");
        os.write(&format!("if ({} < group->numTrgNeurons)", lid));
        os.scope::<_, GeneratorError>(|os| {
            if arch.ps_model_merged {
                os.writeln(&format!(
                    "{}(&group->inSyn[{}], linSyn);",
                    backend.float_atomic_add("global"),
                    lid
                ));
            } else {
                os.writeln(&format!("group->inSyn[{}] += linSyn;", lid));
            }
            Ok(())
        })?;
    } else if in_shared {
        os.writeln("barrier(CLK_LOCAL_MEM_FENCE);");
        os.write("if (localId < group->numTrgNeurons)");
        os.scope::<_, GeneratorError>(|os| {
            if arch.ps_model_merged {
                os.writeln(&format!(
                    "{}(&group->inSyn[localId], shLg[localId]);",
                    backend.float_atomic_add("global")
                ));
            } else {
                os.writeln("group->inSyn[localId] += shLg[localId];");
            }
            Ok(())
        })?;
    }
    Ok(())
}

/// Handler body for one merged postsynaptic (learn-post) group.
fn gen_postsynaptic_group_update(
    os: &mut CodeStream,
    model_merged: &ModelMerged,
    merged: &MergedSynapseGroup,
    pop_subs: &mut Substitutions,
    backend: &Backend,
) -> Result<(), GeneratorError> {
    let model = model_merged.model();
    let arch = model.synapse_group(merged.archetype());
    let sparse = arch.matrix_type.contains(SynapseMatrixType::SPARSE);
    let wg = backend.workgroup_size(Kernel::PostsynapticUpdate);
    let lid = pop_subs.var("id")?.to_string();
    let trg_delay = model.neuron_group(arch.trg).is_delay_required();
    let trg_true_spike = model.is_true_spike_required(arch.trg);

    if model.neuron_group(arch.src).is_delay_required() {
        os.writeln(&format!(
            "const unsigned int preReadDelayOffset = {} * group->numSrcNeurons;",
            "(*group->srcSpkQuePtr)"
        ));
    }
    if trg_delay {
        os.writeln(&format!(
            "const unsigned int postReadDelaySlot = {};",
            postsynaptic_back_prop_delay_slot()
        ));
        os.writeln("const unsigned int postReadDelayOffset = postReadDelaySlot * group->numTrgNeurons;");
    }

    if trg_delay && trg_true_spike {
        os.writeln("const unsigned int numSpikes = group->trgSpkCnt[postReadDelaySlot];");
    } else {
        os.writeln("const unsigned int numSpikes = group->trgSpkCnt[0];");
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

        os.write("if (localId < numSpikesInBlock)");
        os.scope::<_, GeneratorError>(|os| {
            let offset = if trg_true_spike && trg_delay { "postReadDelayOffset + " } else { "" };
            os.writeln(&format!(
                "const unsigned int spk = group->trgSpk[{}(r * {}) + localId];",
                offset, wg
            ));
            os.writeln("shSpk[localId] = spk;");
            if sparse {
                os.writeln("shColLength[localId] = group->colLength[spk];");
            }
            Ok(())
        })?;

        os.writeln("barrier(CLK_LOCAL_MEM_FENCE);");
        os.writeln("// only work on existing neurons");
        os.write(&format!("if ({} < group->colStride)", lid));
        os.scope::<_, GeneratorError>(|os| {
            os.writeln("// loop through all incoming spikes for learning");
            os.write("for (unsigned int j = 0; j < numSpikesInBlock; j++)");
            os.scope::<_, GeneratorError>(|os| {
                let mut syn_subs = Substitutions::with_parent(&*pop_subs);
                if sparse {
                    os.write(&format!("if ({} < shColLength[j])", lid));
                    os.open(1540);
                    os.writeln(&format!(
                        "const unsigned int synAddress = group->remap[(shSpk[j] * group->colStride) + {}];",
                        lid
                    ));
                    os.writeln("const unsigned int ipre = synAddress / group->rowStride;");
                    syn_subs.add_var_substitution("id_pre", "ipre")?;
                } else {
                    os.writeln(&format!(
                        "const unsigned int synAddress = ({} * group->numTrgNeurons) + shSpk[j];",
                        lid
                    ));
                    syn_subs.add_var_substitution("id_pre", lid.clone())?;
                }
                syn_subs.add_var_substitution("id_post", "shSpk[j]")?;
                syn_subs.add_var_substitution("id_syn", "synAddress")?;
                add_wu_substitutions(&mut syn_subs, model, merged)?;

                let context = format!("{} : learnPostCode", arch.name);
                gen_wu_code(
                    os,
                    model_merged,
                    merged,
                    &syn_subs,
                    &arch.wu_model.learn_post_code,
                    &model_merged.postsynaptic_update_support_code,
                    &context,
                )?;

                if sparse {
                    os.close(1540)?;
                }
                Ok(())
            })
        })
    })
}

/// Handler body for one merged synapse-dynamics group.
fn gen_synapse_dynamics_group_update(
    os: &mut CodeStream,
    model_merged: &ModelMerged,
    merged: &MergedSynapseGroup,
    pop_subs: &mut Substitutions,
    backend: &Backend,
) -> Result<(), GeneratorError> {
    let model = model_merged.model();
    let arch = model.synapse_group(merged.archetype());
    let sparse = arch.matrix_type.contains(SynapseMatrixType::SPARSE);
    let lid = pop_subs.var("id")?.to_string();

    if model.neuron_group(arch.src).is_delay_required() {
        os.writeln(&format!(
            "const unsigned int preReadDelayOffset = {} * group->numSrcNeurons;",
            presynaptic_axonal_delay_slot(model, arch)
        ));
    }
    if model.neuron_group(arch.trg).is_delay_required() {
        os.writeln(&format!(
            "const unsigned int postReadDelayOffset = {} * group->numTrgNeurons;",
            postsynaptic_back_prop_delay_slot()
        ));
    }

    if sparse {
        os.write(&format!("if ({} < group->synRemap[0])", lid));
    } else {
        os.write(&format!(
            "if ({} < (group->numSrcNeurons * group->numTrgNeurons))",
            lid
        ));
    }
    os.scope::<_, GeneratorError>(|os| {
        let mut syn_subs = Substitutions::with_parent(&*pop_subs);
        if sparse {
            os.writeln(&format!("const unsigned int s = group->synRemap[1 + {}];", lid));
            syn_subs.add_var_substitution("id_pre", "s / group->rowStride")?;
            syn_subs.add_var_substitution("id_post", "group->ind[s]")?;
            syn_subs.add_var_substitution("id_syn", "s")?;
        } else {
            syn_subs.add_var_substitution("id_pre", format!("({} / group->numTrgNeurons)", lid))?;
            syn_subs.add_var_substitution("id_post", format!("({} % group->numTrgNeurons)", lid))?;
            syn_subs.add_var_substitution("id_syn", lid.clone())?;
        }
        add_accumulation_substitution(
            &mut syn_subs,
            model,
            merged,
            backend,
            crate::backend::strategy::AccumulationTarget::AtomicGlobal,
        )?;
        add_wu_substitutions(&mut syn_subs, model, merged)?;

        let context = format!("{} : synapseDynamicsCode", arch.name);
        gen_wu_code(
            os,
            model_merged,
            merged,
            &syn_subs,
            &arch.wu_model.synapse_dynamics_code,
            &model_merged.synapse_dynamics_support_code,
            &context,
        )
    })
}
