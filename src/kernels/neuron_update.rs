use tracing::warn;

use crate::backend::backend::{Backend, Kernel, KERNEL_NAMES};
use crate::backend::dispatch::{gen_parallel_group, gen_per_member_group};
use crate::backend::launcher;
use crate::codestream::CodeStream;
use crate::error::GeneratorError;
use crate::merger::fields::{neuron_spike_queue_update_layout, neuron_update_layout, MergedStructLayout};
use crate::merger::{MergedNeuronGroup, ModelMerged};
use crate::model::{ModelSpec, SynapseMatrixType};
use crate::substitution::Substitutions;

use super::common::{add_folded_param_substitutions, member_values};
use super::GeneratedModule;

/// Offset into delayed per-neuron buffers for the slot being read this
/// timestep.
fn prev_queue_offset(num_delay_slots: u32) -> String {
    format!(
        "((*group->spkQuePtr + {}) % {}) * group->numNeurons",
        num_delay_slots - 1,
        num_delay_slots
    )
}

fn current_queue_offset() -> String {
    "(*group->spkQuePtr) * group->numNeurons".to_string()
}

/// Generate the neuron-update kernel program and its host launcher.
pub fn generate_neuron_update(
    model_merged: &ModelMerged,
    backend: &Backend,
) -> Result<GeneratedModule, GeneratorError> {
    let model = model_merged.model();

    let spike_queue_layouts: Vec<MergedStructLayout> = model_merged
        .neuron_spike_queue_update_groups
        .iter()
        .map(|m| neuron_spike_queue_update_layout(model, m))
        .collect();
    let update_layouts: Vec<MergedStructLayout> = model_merged
        .neuron_update_groups
        .iter()
        .map(|m| neuron_update_layout(model, m))
        .collect();

    let mut os = CodeStream::new();
    os.writeln("//--------------------------------------------------------------------------");
    os.writeln("// OpenCL program and kernels");
    os.writeln("//--------------------------------------------------------------------------");
    os.writeln("cl::Program neuronUpdateProgram;");
    os.writeln(&format!("cl::Kernel {};", KERNEL_NAMES[Kernel::PreNeuronReset as usize]));
    os.writeln(&format!("cl::Kernel {};", KERNEL_NAMES[Kernel::NeuronUpdate as usize]));
    for layout in spike_queue_layouts.iter().chain(&update_layouts) {
        launcher::gen_merged_struct_preamble(&mut os, layout);
    }
    os.blank_line();

    // Kernel body is built separately so it can be split into chunks.
    let mut kernels = CodeStream::new();
    backend.gen_kernel_preamble(&mut kernels, model);
    kernels.blank_line();

    model_merged.neuron_update_support_code.gen(&mut kernels);
    model_merged.postsynaptic_dynamics_support_code.gen(&mut kernels);
    kernels.blank_line();

    for layout in spike_queue_layouts.iter().chain(&update_layouts) {
        launcher::gen_merged_struct_def(&mut kernels, layout);
    }
    kernels.blank_line();

    // Start ids for the neuron update groups.
    {
        let mut id = 0usize;
        launcher::gen_group_start_ids(
            &mut kernels,
            &mut id,
            backend.workgroup_size(Kernel::NeuronUpdate),
            &model_merged.neuron_update_groups,
            &|m: &MergedNeuronGroup, member| {
                model.neuron_group(m.groups[member]).num_neurons as usize
            },
        );
        kernels.blank_line();
    }

    for layout in spike_queue_layouts.iter().chain(&update_layouts) {
        launcher::gen_merged_struct_build_kernel(&mut kernels, layout)?;
    }

    // ------------------------------------------------------------------
    // preNeuronResetKernel: cycle spike queues, zero spike counts.
    // ------------------------------------------------------------------
    let mut id_pre_neuron_reset = 0usize;
    kernels.write(&format!("__kernel void {}(", KERNEL_NAMES[Kernel::PreNeuronReset as usize]));
    launcher::gen_merged_group_kernel_params(&mut kernels, &spike_queue_layouts, false);
    kernels.write(")");
    kernels.scope::<_, GeneratorError>(|os| {
        os.writeln("const unsigned int id = get_global_id(0);");
        gen_per_member_group(
            os,
            &model_merged.neuron_spike_queue_update_groups,
            &mut id_pre_neuron_reset,
            &mut |os, merged| {
                let arch = model.neuron_group(merged.archetype());
                if arch.is_delay_required() {
                    os.writeln(&format!(
                        "*group->spkQuePtr = (*group->spkQuePtr + 1) % {};",
                        arch.num_delay_slots
                    ));
                }
                gen_spike_count_reset(os, model, merged)
            },
        )
    })?;
    kernels.blank_line();

    // ------------------------------------------------------------------
    // updateNeuronsKernel
    // ------------------------------------------------------------------
    let mut id_start = 0usize;
    kernels.write(&format!("__kernel void {}(", KERNEL_NAMES[Kernel::NeuronUpdate as usize]));
    launcher::gen_merged_group_kernel_params(&mut kernels, &update_layouts, true);
    kernels.write(&format!("{} t)", model.time_precision.name()));
    kernels.scope::<_, GeneratorError>(|os| {
        os.writeln("const unsigned int localId = get_local_id(0);");
        os.writeln("const unsigned int id = get_global_id(0);");

        let mut kernel_subs = backend.kernel_substitutions(model);
        kernel_subs.add_var_substitution("t", "t")?;

        let wg = backend.workgroup_size(Kernel::NeuronUpdate);
        let any_events = model_merged
            .neuron_update_groups
            .iter()
            .any(|m| model.is_spike_event_required(m.archetype()));
        let any_true_spikes = model_merged.neuron_update_groups.iter().any(|m| {
            !model.neuron_group(m.archetype()).model.threshold_condition_code.is_empty()
        });

        if any_events {
            os.writeln(&format!("volatile __local unsigned int shSpkEvnt[{}];", wg));
            os.writeln("volatile __local unsigned int shPosSpkEvnt;");
            os.writeln("volatile __local unsigned int shSpkEvntCount;");
            os.write("if (localId == 1)");
            os.scope::<_, GeneratorError>(|os| {
                os.writeln("shSpkEvntCount = 0;");
                Ok(())
            })?;
            os.blank_line();
        }
        if any_true_spikes {
            os.writeln(&format!("volatile __local unsigned int shSpk[{}];", wg));
            os.writeln("volatile __local unsigned int shPosSpk;");
            os.writeln("volatile __local unsigned int shSpkCount;");
            os.write("if (localId == 0)");
            os.scope::<_, GeneratorError>(|os| {
                os.writeln("shSpkCount = 0;");
                Ok(())
            })?;
            os.blank_line();
        }
        os.writeln("barrier(CLK_LOCAL_MEM_FENCE);");

        gen_parallel_group(
            os,
            &kernel_subs,
            &model_merged.neuron_update_groups,
            &mut id_start,
            &|m: &MergedNeuronGroup| {
                m.groups
                    .iter()
                    .map(|id| {
                        crate::backend::backend::pad_size(
                            model.neuron_group(*id).num_neurons as usize,
                            wg,
                        )
                    })
                    .collect()
            },
            &mut |os, merged, pop_subs| {
                gen_neuron_group_update(os, model_merged, merged, pop_subs, backend)
            },
        )
    })?;
    kernels.blank_line();

    let kernel_src = kernels.finish()?;

    // Write out kernel source string literal.
    os.writeln("const char* neuronUpdateSrc = ");
    backend.divide_kernel_stream_in_parts(&mut os, &kernel_src, 5000);
    os.writeln(";");
    os.blank_line();

    // Build-program function.
    os.writeln("// Initialize the neuronUpdate kernels");
    os.write("void buildNeuronUpdateProgram()");
    os.scope::<_, GeneratorError>(|os| {
        os.writeln("// Build program");
        os.writeln("neuronUpdateProgram = cl::Program(clContext, neuronUpdateSrc, true);");
        os.write("if(neuronUpdateProgram.build(\"-cl-std=CL1.2\") != CL_SUCCESS)");
        os.scope::<_, GeneratorError>(|os| {
            os.writeln("throw std::runtime_error(\"Compile error:\" + neuronUpdateProgram.getBuildInfo<CL_PROGRAM_BUILD_LOG>(clDevice));");
            Ok(())
        })?;
        os.blank_line();

        os.writeln("// Configure merged struct buffers and kernels");
        for layout in spike_queue_layouts.iter().chain(&update_layouts) {
            launcher::gen_merged_struct_build(os, layout, "neuronUpdateProgram", model.precision)?;
        }

        if id_pre_neuron_reset > 0 {
            os.writeln("// Configure neuron spike queue update kernel");
            os.writeln(&format!(
                "{k} = cl::Kernel(neuronUpdateProgram, \"{k}\");",
                k = KERNEL_NAMES[Kernel::PreNeuronReset as usize]
            ));
            launcher::set_merged_group_kernel_params(
                os,
                KERNEL_NAMES[Kernel::PreNeuronReset as usize],
                &spike_queue_layouts,
                0,
            );
            os.blank_line();
        }
        if id_start > 0 {
            os.writeln("// Configure neuron update kernel");
            os.writeln(&format!(
                "{k} = cl::Kernel(neuronUpdateProgram, \"{k}\");",
                k = KERNEL_NAMES[Kernel::NeuronUpdate as usize]
            ));
            launcher::set_merged_group_kernel_params(
                os,
                KERNEL_NAMES[Kernel::NeuronUpdate as usize],
                &update_layouts,
                0,
            );
            os.blank_line();
        }
        Ok(())
    })?;
    os.blank_line();

    // Launcher.
    os.write(&format!("void updateNeurons({} t)", model.time_precision.name()));
    os.scope::<_, GeneratorError>(|os| {
        if id_pre_neuron_reset > 0 {
            os.scope::<_, GeneratorError>(|os| {
                backend.gen_kernel_dimensions(os, Kernel::PreNeuronReset, id_pre_neuron_reset);
                os.writeln(&format!(
                    "CHECK_OPENCL_ERRORS(commandQueue.enqueueNDRangeKernel({}, cl::NullRange, globalWorkSize, localWorkSize));",
                    KERNEL_NAMES[Kernel::PreNeuronReset as usize]
                ));
                Ok(())
            })?;
        }
        if id_start > 0 {
            os.scope::<_, GeneratorError>(|os| {
                os.writeln(&format!(
                    "CHECK_OPENCL_ERRORS({}.setArg({}, t));",
                    KERNEL_NAMES[Kernel::NeuronUpdate as usize],
                    update_layouts.len()
                ));
                backend.gen_kernel_dimensions(os, Kernel::NeuronUpdate, id_start);
                os.writeln(&format!(
                    "CHECK_OPENCL_ERRORS(commandQueue.enqueueNDRangeKernel({}, cl::NullRange, globalWorkSize, localWorkSize));",
                    KERNEL_NAMES[Kernel::NeuronUpdate as usize]
                ));
                Ok(())
            })?;
        }
        Ok(())
    })?;

    Ok(GeneratedModule { device_source: kernel_src, host_source: os.finish()? })
}

/// Reset spike counters of one merged spike-queue-update group member.
fn gen_spike_count_reset(
    os: &mut CodeStream,
    model: &ModelSpec,
    merged: &MergedNeuronGroup,
) -> Result<(), GeneratorError> {
    let arch_id = merged.archetype();
    let arch = model.neuron_group(arch_id);
    if model.is_spike_event_required(arch_id) {
        if arch.is_delay_required() {
            os.writeln("group->spkCntEvnt[*group->spkQuePtr] = 0;");
        } else {
            os.writeln("group->spkCntEvnt[0] = 0;");
        }
    }
    if arch.is_delay_required() && model.is_true_spike_required(arch_id) {
        os.writeln("group->spkCnt[*group->spkQuePtr] = 0;");
    } else {
        os.writeln("group->spkCnt[0] = 0;");
    }
    Ok(())
}

/// Per-thread body of the neuron update for one merged group.
fn gen_neuron_group_update(
    os: &mut CodeStream,
    model_merged: &ModelMerged,
    merged: &MergedNeuronGroup,
    pop_subs: &mut Substitutions,
    backend: &Backend,
) -> Result<(), GeneratorError> {
    let model = model_merged.model();
    let arch_id = merged.archetype();
    let arch = model.neuron_group(arch_id);
    let nm = &arch.model;
    let scalar = model.precision.name();
    let time_ty = model.time_precision.name();

    if arch.is_delay_required() {
        os.writeln(&format!(
            "const unsigned int readDelayOffset = {};",
            prev_queue_offset(arch.num_delay_slots)
        ));
        os.writeln(&format!(
            "const unsigned int writeDelayOffset = {};",
            current_queue_offset()
        ));
    }
    os.blank_line();

    if arch.is_sim_rng_required() {
        let id = pop_subs.var("id")?.to_string();
        pop_subs.add_var_substitution("rng", format!("&group->rng[{}]", id))?;
    }

    let lid = pop_subs.var("id")?.to_string();
    os.write(&format!("if({} < group->numNeurons)", lid));
    os.scope::<_, GeneratorError>(|os| {
        let mut subs = Substitutions::with_parent(&*pop_subs);

        // Load neuron state into registers.
        for var in &nm.vars {
            os.write(&format!("{} l{} = group->{}[", var.ty, var.name, var.name));
            if arch.is_delay_required() {
                os.write("readDelayOffset + ");
            }
            os.writeln(&format!("{}];", lid));
        }
        if model.is_spike_time_required(arch_id) {
            os.write(&format!("{} lsT = group->sT[", time_ty));
            if arch.is_delay_required() {
                os.write("readDelayOffset + ");
            }
            os.writeln(&format!("{}];", lid));
            subs.add_var_substitution("sT", "lsT")?;
        }
        os.blank_line();

        if !arch.in_syn().is_empty() || nm.sim_code.contains("Isyn") {
            os.writeln(&format!("{} Isyn = 0;", scalar));
        }
        subs.add_var_substitution("Isyn", "Isyn")?;
        for var in &nm.vars {
            subs.add_var_substitution(&var.name, format!("l{}", var.name))?;
        }
        let param_values = member_values(model, &merged.groups, |m, id| m.neuron_group(id).params.clone());
        add_folded_param_substitutions(&mut subs, &nm.param_names, "", &param_values, model.precision)?;
        let derived_values =
            member_values(model, &merged.groups, |m, id| m.neuron_group(id).derived_params.clone());
        add_folded_param_substitutions(&mut subs, &nm.derived_param_names, "", &derived_values, model.precision)?;

        for aiv in &nm.additional_input_vars {
            os.writeln(&format!("{} {} = {};", aiv.ty, aiv.name, aiv.init_value));
            subs.add_var_substitution(&aiv.name, aiv.name.clone())?;
        }

        gen_postsynaptic_input(os, model_merged, merged, &subs, false)?;
        gen_current_sources(os, model, merged, &subs)?;

        gen_sim_and_spikes(os, model_merged, merged, &mut subs, backend)?;

        // Store state back, honouring the write delay slot.
        for var in &nm.vars {
            os.write(&format!("group->{}[", var.name));
            if arch.is_delay_required() {
                os.write("writeDelayOffset + ");
            }
            os.writeln(&format!("{}] = l{};", lid, var.name));
        }

        gen_postsynaptic_input(os, model_merged, merged, &subs, true)?;
        Ok(())
    })?;

    // Spike compaction: reserve global ranges and copy staged spikes.
    os.writeln("barrier(CLK_LOCAL_MEM_FENCE);");
    let queue_offset = if arch.is_delay_required() { "writeDelayOffset + " } else { "" };

    if model.is_spike_event_required(arch_id) {
        os.write("if (localId == 1)");
        os.scope::<_, GeneratorError>(|os| {
            os.write("if (shSpkEvntCount > 0)");
            os.scope::<_, GeneratorError>(|os| {
                if arch.is_delay_required() {
                    os.writeln("shPosSpkEvnt = atomic_add(&group->spkCntEvnt[*group->spkQuePtr], shSpkEvntCount);");
                } else {
                    os.writeln("shPosSpkEvnt = atomic_add(&group->spkCntEvnt[0], shSpkEvntCount);");
                }
                Ok(())
            })
        })?;
        os.writeln("barrier(CLK_LOCAL_MEM_FENCE);");
    }
    if !nm.threshold_condition_code.is_empty() {
        os.write("if (localId == 0)");
        os.scope::<_, GeneratorError>(|os| {
            os.write("if (shSpkCount > 0)");
            os.scope::<_, GeneratorError>(|os| {
                if arch.is_delay_required() && model.is_true_spike_required(arch_id) {
                    os.writeln("shPosSpk = atomic_add(&group->spkCnt[*group->spkQuePtr], shSpkCount);");
                } else {
                    os.writeln("shPosSpk = atomic_add(&group->spkCnt[0], shSpkCount);");
                }
                Ok(())
            })
        })?;
        os.writeln("barrier(CLK_LOCAL_MEM_FENCE);");
    }

    if model.is_spike_event_required(arch_id) {
        os.write("if (localId < shSpkEvntCount)");
        os.scope::<_, GeneratorError>(|os| {
            os.writeln(&format!(
                "group->spkEvnt[{}shPosSpkEvnt + localId] = shSpkEvnt[localId];",
                queue_offset
            ));
            Ok(())
        })?;
    }
    if !nm.threshold_condition_code.is_empty() {
        let queue_offset_true = if model.is_true_spike_required(arch_id) { queue_offset } else { "" };
        os.write("if (localId < shSpkCount)");
        os.scope::<_, GeneratorError>(|os| {
            os.writeln("const unsigned int n = shSpk[localId];");
            os.writeln(&format!(
                "group->spk[{}shPosSpk + localId] = n;",
                queue_offset_true
            ));
            if model.is_spike_time_required(arch_id) {
                os.writeln(&format!("group->sT[{}n] = t;", queue_offset));
            }
            Ok(())
        })?;
    }
    Ok(())
}

/// Either pull postsynaptic input and apply it (`decay == false`) or
/// run the decay code and store everything back (`decay == true`).
fn gen_postsynaptic_input(
    os: &mut CodeStream,
    model_merged: &ModelMerged,
    merged: &MergedNeuronGroup,
    subs: &Substitutions,
    decay: bool,
) -> Result<(), GeneratorError> {
    let model = model_merged.model();
    let arch = model.neuron_group(merged.archetype());
    let scalar = model.precision.name();
    let lid = subs.var("id")?.to_string();

    for (i, sg_id) in arch.in_syn().iter().enumerate() {
        let sg = model.synapse_group(*sg_id);
        let psm = &sg.ps_model;
        let individual_psm = sg.matrix_type.contains(SynapseMatrixType::INDIVIDUAL_PSM);

        let mut in_syn_subs = Substitutions::with_parent(subs);
        in_syn_subs.add_var_substitution("inSyn", format!("linSynInSyn{}", i))?;
        if individual_psm {
            for var in &psm.vars {
                in_syn_subs.add_var_substitution(&var.name, format!("lps{}InSyn{}", var.name, i))?;
            }
        } else {
            // Postsynaptic variables are shared constants; initial
            // values come from the archetype's initialisers.
            for (k, var) in psm.vars.iter().enumerate() {
                let value = sg.ps_var_initialisers.get(k).and_then(|v| v.params.first()).copied().unwrap_or(0.0);
                in_syn_subs.add_var_substitution(&var.name, model.precision.literal(value))?;
            }
        }
        let suffix = format!("InSyn{}", i);
        let ps_params = member_values(model, &merged.groups, |m, id| {
            m.synapse_group(m.neuron_group(id).in_syn()[i]).ps_params.clone()
        });
        add_folded_param_substitutions(&mut in_syn_subs, &psm.param_names, &suffix, &ps_params, model.precision)?;
        let ps_derived = member_values(model, &merged.groups, |m, id| {
            m.synapse_group(m.neuron_group(id).in_syn()[i]).ps_derived_params.clone()
        });
        add_folded_param_substitutions(&mut in_syn_subs, &psm.derived_param_names, &suffix, &ps_derived, model.precision)?;

        if !decay {
            os.writeln("// pull inSyn values in a coalesced access");
            os.writeln(&format!("{} linSynInSyn{} = group->inSynInSyn{}[{}];", scalar, i, i, lid));

            if sg.is_dendritic_delay_required() {
                // Drain the current dendritic delay slot into inSyn.
                os.writeln(&format!(
                    "const unsigned int denDelayOffsetInSyn{i} = (*group->denDelayPtrInSyn{i} * group->numNeurons) + {lid};",
                    i = i,
                    lid = lid
                ));
                os.writeln(&format!(
                    "linSynInSyn{i} += group->denDelayInSyn{i}[denDelayOffsetInSyn{i}];",
                    i = i
                ));
                os.writeln(&format!(
                    "group->denDelayInSyn{i}[denDelayOffsetInSyn{i}] = {};",
                    model.scalar_expr(0.0),
                    i = i
                ));
            }

            if individual_psm {
                for var in &psm.vars {
                    os.writeln(&format!(
                        "{} lps{}InSyn{} = group->{}InSyn{}[{}];",
                        var.ty, var.name, i, var.name, i, lid
                    ));
                }
            }

            let context = format!("{} : postSyntoCurrent", sg.ps_model_target_name());
            let code = in_syn_subs.apply_check_unreplaced(&psm.apply_input_code, &context)?;
            gen_in_support_namespace(os, model_merged, sg, &code)?;
        } else {
            os.writeln("// the post-synaptic dynamics");
            let context = format!("{} : postSynDecay", sg.ps_model_target_name());
            let code = in_syn_subs.apply_check_unreplaced(&psm.decay_code, &context)?;
            gen_in_support_namespace(os, model_merged, sg, &code)?;

            os.writeln(&format!("group->inSynInSyn{}[{}] = linSynInSyn{};", i, lid, i));
            if individual_psm {
                for var in &psm.vars {
                    os.writeln(&format!(
                        "group->{}InSyn{}[{}] = lps{}InSyn{};",
                        var.name, i, lid, var.name, i
                    ));
                }
            }
        }
    }
    Ok(())
}

fn gen_in_support_namespace(
    os: &mut CodeStream,
    model_merged: &ModelMerged,
    sg: &crate::model::SynapseGroup,
    code: &str,
) -> Result<(), GeneratorError> {
    match model_merged
        .postsynaptic_dynamics_support_code
        .support_code_namespace(&sg.ps_model.support_code)
    {
        Some(ns) => {
            os.open(29);
            os.writeln(&format!(" using namespace {};", ns));
            os.writeln(code);
            os.close(29)?;
            Ok(())
        }
        None => {
            os.writeln(code);
            Ok(())
        }
    }
}

fn gen_current_sources(
    os: &mut CodeStream,
    model: &ModelSpec,
    merged: &MergedNeuronGroup,
    subs: &Substitutions,
) -> Result<(), GeneratorError> {
    let arch = model.neuron_group(merged.archetype());
    let lid = subs.var("id")?.to_string();

    for (i, cs) in arch.current_sources.iter().enumerate() {
        os.writeln(&format!("// current source {}", cs.name));
        os.scope::<_, GeneratorError>(|os| {
            for var in &cs.model.vars {
                os.writeln(&format!(
                    "{} lcs{} = group->{}CS{}[{}];",
                    var.ty, var.name, var.name, i, lid
                ));
            }

            let mut cs_subs = Substitutions::with_parent(subs);
            cs_subs.add_func_substitution("injectCurrent", 1, "Isyn += $(0)")?;
            for var in &cs.model.vars {
                cs_subs.add_var_substitution(&var.name, format!("lcs{}", var.name))?;
            }
            let suffix = format!("CS{}", i);
            let cs_params = member_values(model, &merged.groups, |m, id| {
                m.neuron_group(id).current_sources[i].params.clone()
            });
            add_folded_param_substitutions(&mut cs_subs, &cs.model.param_names, &suffix, &cs_params, model.precision)?;

            let context = format!("{} : current source injectionCode", cs.name);
            let code = cs_subs.apply_check_unreplaced(&cs.model.injection_code, &context)?;
            os.writeln(&code);

            for var in &cs.model.vars {
                os.writeln(&format!(
                    "group->{}CS{}[{}] = lcs{};",
                    var.name, i, lid, var.name
                ));
            }
            Ok(())
        })?;
    }
    Ok(())
}

/// Threshold test, sim code, spike-event detection and spike emission.
fn gen_sim_and_spikes(
    os: &mut CodeStream,
    model_merged: &ModelMerged,
    merged: &MergedNeuronGroup,
    subs: &mut Substitutions,
    backend: &Backend,
) -> Result<(), GeneratorError> {
    let model = model_merged.model();
    let arch_id = merged.archetype();
    let arch = model.neuron_group(arch_id);
    let nm = &arch.model;

    if let Some(ns) = model_merged
        .neuron_update_support_code
        .support_code_namespace(&nm.support_code)
    {
        os.writeln(&format!(" using namespace {};", ns));
    }

    let th_code = if nm.threshold_condition_code.is_empty() {
        warn!(group = %arch.name, "no thresholdConditionCode provided; no spikes will be detected");
        String::new()
    } else {
        os.writeln("// test whether spike condition was fulfilled previously");
        let context = format!("{} : thresholdConditionCode", arch.name);
        subs.apply_check_unreplaced(&nm.threshold_condition_code, &context)?
    };

    if !th_code.is_empty() && nm.auto_refractory_required {
        os.writeln(&format!("const bool oldSpike= ({});", th_code));
    }

    os.writeln("// calculate membrane potential");
    let context = format!("{} : neuron simCode", arch.name);
    let sim_code = subs.apply_check_unreplaced(&nm.sim_code, &context)?;
    os.writeln(&sim_code);

    // Spike-like events first.
    if model.is_spike_event_required(arch_id) {
        os.writeln("bool spikeLikeEvent = false;");
        for (condition, support) in model.spike_event_conditions(arch_id) {
            // Event conditions come from outgoing weight-update models
            // and address this group's state as the presynaptic side.
            let mut e_subs = Substitutions::with_parent(&*subs);
            for var in &nm.vars {
                e_subs.add_var_substitution(&format!("{}_pre", var.name), format!("l{}", var.name))?;
            }
            let context = format!("{} : neuronSpkEvntCondition", arch.name);
            let e_code = e_subs.apply_check_unreplaced(&condition, &context)?;

            os.open(31);
            if let Some(ns) =
                model_merged.neuron_update_support_code.support_code_namespace(&support)
            {
                os.writeln(&format!(" using namespace {};", ns));
            }
            os.writeln(&format!("spikeLikeEvent |= ({});", e_code));
            os.close(31)?;
        }

        os.writeln("// register a spike-like event");
        os.write("if (spikeLikeEvent)");
        os.scope::<_, GeneratorError>(|os| backend.gen_emit_spike(os, &*subs, "Evnt"))?;
    }

    // True spikes.
    if !th_code.is_empty() {
        os.writeln("// test for and register a true spike");
        if nm.auto_refractory_required {
            os.write(&format!("if (({}) && !(oldSpike))", th_code));
        } else {
            os.write(&format!("if ({})", th_code));
        }
        os.scope::<_, GeneratorError>(|os| {
            backend.gen_emit_spike(os, &*subs, "")?;
            if !nm.reset_code.is_empty() {
                let context = format!("{} : resetCode", arch.name);
                let r_code = subs.apply_check_unreplaced(&nm.reset_code, &context)?;
                os.writeln("// spike reset code");
                os.writeln(&r_code);
            }
            Ok(())
        })?;
    }
    Ok(())
}

