use crate::backend::backend::Backend;
use crate::backend::error::BackendError;
use crate::backend::launcher;
use crate::codestream::CodeStream;
use crate::error::GeneratorError;
use crate::merger::ModelMerged;
use crate::model::{ModelSpec, SynapseMatrixType, VarLocation};

use super::{generate_init, generate_neuron_update, generate_synapse_update, GeneratedModule};

/// Everything the generator produces for one model: three kernel
/// programs (device + host text each) and the shared runner translation
/// unit.
#[derive(Debug, Clone)]
pub struct GeneratedModel {
    pub neuron_update: GeneratedModule,
    pub synapse_update: GeneratedModule,
    pub init: GeneratedModule,
    pub runner_source: String,
}

/// Run the full pipeline: merge the model, then emit every program.
pub fn generate(model: &ModelSpec, backend: &Backend) -> Result<GeneratedModel, GeneratorError> {
    let model_merged = ModelMerged::new(model);
    let neuron_update = generate_neuron_update(&model_merged, backend)?;
    let synapse_update = generate_synapse_update(&model_merged, backend)?;
    let init = generate_init(&model_merged, backend)?;
    let runner_source = generate_runner(&model_merged, backend)?;
    Ok(GeneratedModel { neuron_update, synapse_update, init, runner_source })
}

/// One host-side state array: type, name, element count and whether the
/// device initialises it (so an `uninitialisedOnly` push can skip it).
struct RunnerVar {
    ty: String,
    name: String,
    count: usize,
    auto_initialised: bool,
}

/// Per-neuron-group state arrays, in declaration order.
fn neuron_group_vars(model: &ModelSpec, ng_id: crate::model::NeuronGroupId) -> Vec<RunnerVar> {
    let ng = model.neuron_group(ng_id);
    let n = ng.num_neurons as usize;
    let slots = ng.num_delay_slots as usize;
    let true_spike_delay = ng.is_delay_required() && model.is_true_spike_required(ng_id);
    let mut vars = Vec::new();

    vars.push(RunnerVar {
        ty: "unsigned int".into(),
        name: format!("glbSpkCnt{}", ng.name),
        count: if true_spike_delay { slots } else { 1 },
        auto_initialised: true,
    });
    vars.push(RunnerVar {
        ty: "unsigned int".into(),
        name: format!("glbSpk{}", ng.name),
        count: if true_spike_delay { slots * n } else { n },
        auto_initialised: true,
    });
    if model.is_spike_event_required(ng_id) {
        vars.push(RunnerVar {
            ty: "unsigned int".into(),
            name: format!("glbSpkCntEvnt{}", ng.name),
            count: if ng.is_delay_required() { slots } else { 1 },
            auto_initialised: true,
        });
        vars.push(RunnerVar {
            ty: "unsigned int".into(),
            name: format!("glbSpkEvnt{}", ng.name),
            count: if ng.is_delay_required() { slots * n } else { n },
            auto_initialised: true,
        });
    }
    if ng.is_delay_required() {
        vars.push(RunnerVar {
            ty: "unsigned int".into(),
            name: format!("spkQuePtr{}", ng.name),
            count: 1,
            auto_initialised: true,
        });
    }
    if model.is_spike_time_required(ng_id) {
        vars.push(RunnerVar {
            ty: model.time_precision.name().into(),
            name: format!("sT{}", ng.name),
            count: if ng.is_delay_required() { slots * n } else { n },
            auto_initialised: true,
        });
    }
    for (k, var) in ng.model.vars.iter().enumerate() {
        vars.push(RunnerVar {
            ty: var.ty.clone(),
            name: format!("{}{}", var.name, ng.name),
            count: if ng.is_delay_required() { slots * n } else { n },
            auto_initialised: !ng.var_initialisers[k].code.is_empty(),
        });
    }
    for cs in &ng.current_sources {
        for (k, var) in cs.model.vars.iter().enumerate() {
            vars.push(RunnerVar {
                ty: var.ty.clone(),
                name: format!("{}{}", var.name, cs.name),
                count: n,
                auto_initialised: !cs.var_initialisers[k].code.is_empty(),
            });
        }
    }
    vars
}

/// Per-synapse-group state arrays.
fn synapse_group_vars(
    model: &ModelSpec,
    backend: &Backend,
    sg_id: crate::model::SynapseGroupId,
) -> Result<Vec<RunnerVar>, GeneratorError> {
    let sg = model.synapse_group(sg_id);
    let src_n = model.neuron_group(sg.src).num_neurons as usize;
    let trg_n = model.neuron_group(sg.trg).num_neurons as usize;
    let row_stride = backend.synaptic_matrix_row_stride(model, sg_id)?;
    let mut vars = Vec::new();

    vars.push(RunnerVar {
        ty: model.precision.name().into(),
        name: format!("inSyn{}", sg.ps_model_target_name()),
        count: trg_n,
        auto_initialised: true,
    });
    if sg.is_dendritic_delay_required() {
        vars.push(RunnerVar {
            ty: model.precision.name().into(),
            name: format!("denDelay{}", sg.ps_model_target_name()),
            count: sg.max_dendritic_delay_timesteps as usize * trg_n,
            auto_initialised: true,
        });
        vars.push(RunnerVar {
            ty: "unsigned int".into(),
            name: format!("denDelayPtr{}", sg.ps_model_target_name()),
            count: 1,
            auto_initialised: true,
        });
    }
    if sg.matrix_type.contains(SynapseMatrixType::INDIVIDUAL_PSM) {
        for (k, var) in sg.ps_model.vars.iter().enumerate() {
            vars.push(RunnerVar {
                ty: var.ty.clone(),
                name: format!("{}{}", var.name, sg.ps_model_target_name()),
                count: trg_n,
                auto_initialised: !sg.ps_var_initialisers[k].code.is_empty(),
            });
        }
    }
    if sg.matrix_type.contains(SynapseMatrixType::SPARSE) {
        vars.push(RunnerVar {
            ty: "unsigned int".into(),
            name: format!("rowLength{}", sg.name),
            count: src_n,
            auto_initialised: sg.is_sparse_connectivity_init_required(),
        });
        vars.push(RunnerVar {
            ty: "unsigned int".into(),
            name: format!("ind{}", sg.name),
            count: src_n * row_stride,
            auto_initialised: sg.is_sparse_connectivity_init_required(),
        });
        if !sg.wu_model.learn_post_code.is_empty() {
            vars.push(RunnerVar {
                ty: "unsigned int".into(),
                name: format!("colLength{}", sg.name),
                count: trg_n,
                auto_initialised: true,
            });
            vars.push(RunnerVar {
                ty: "unsigned int".into(),
                name: format!("remap{}", sg.name),
                count: trg_n * sg.max_col_length.unwrap_or(0) as usize,
                auto_initialised: true,
            });
        }
        if !sg.wu_model.synapse_dynamics_code.is_empty() {
            vars.push(RunnerVar {
                ty: "unsigned int".into(),
                name: format!("synRemap{}", sg.name),
                count: 1 + (src_n * row_stride),
                auto_initialised: true,
            });
        }
    }
    if sg.matrix_type.contains(SynapseMatrixType::BITMASK) {
        vars.push(RunnerVar {
            ty: "uint32_t".into(),
            name: format!("gp{}", sg.name),
            count: (src_n * trg_n) / 32 + 1,
            auto_initialised: true,
        });
    }
    if sg.matrix_type.contains(SynapseMatrixType::INDIVIDUAL_G) {
        let count = if sg.matrix_type.contains(SynapseMatrixType::SPARSE) {
            src_n * row_stride
        } else {
            src_n * trg_n
        };
        for (k, var) in sg.wu_model.vars.iter().enumerate() {
            vars.push(RunnerVar {
                ty: var.ty.clone(),
                name: format!("{}{}", var.name, sg.name),
                count,
                auto_initialised: !sg.wu_var_initialisers[k].code.is_empty(),
            });
        }
    }
    Ok(vars)
}

/// Generate the runner translation unit: OpenCL globals, the error
/// macro, state declarations, memory allocation and the push/pull
/// helper family.
pub fn generate_runner(
    model_merged: &ModelMerged,
    backend: &Backend,
) -> Result<String, GeneratorError> {
    let model = model_merged.model();

    // Extra global parameter transfer is only supported in zero-copy
    // configurations.
    if !backend.preferences().automatic_copy {
        let any_egps = model
            .neuron_group_ids()
            .any(|id| !model.neuron_group(id).model.extra_global_params.is_empty());
        if any_egps {
            return Err(BackendError::NotYetImplemented(
                "extra global parameter push/pull in non-zero-copy mode",
            )
            .into());
        }
    }

    let mut os = CodeStream::new();

    os.writeln("// OpenCL variables");
    os.writeln("cl::Context clContext;");
    os.writeln("cl::Device clDevice;");
    os.writeln("cl::CommandQueue commandQueue;");
    os.blank_line();
    launcher::gen_check_macro(&mut os);
    os.blank_line();

    // State array declarations, host and device side.
    os.writeln("// ------------------------------------------------------------------------");
    os.writeln("// state variables");
    os.writeln("// ------------------------------------------------------------------------");
    let mut all_vars: Vec<RunnerVar> = Vec::new();
    for ng_id in model.neuron_group_ids() {
        all_vars.extend(neuron_group_vars(model, ng_id));
    }
    for sg_id in model.synapse_group_ids() {
        all_vars.extend(synapse_group_vars(model, backend, sg_id)?);
    }
    for var in &all_vars {
        os.writeln(&format!("{}* {};", var.ty, var.name));
        os.writeln(&format!("cl::Buffer d_{};", var.name));
    }
    os.blank_line();

    // Memory allocation: select device, build programs, allocate state.
    os.write("void allocateMem()");
    os.scope::<_, GeneratorError>(|os| {
        os.writeln("// Get platforms");
        os.writeln("std::vector<cl::Platform> platforms; ");
        os.writeln("cl::Platform::get(&platforms);");
        os.writeln("// Get platform devices");
        os.writeln("std::vector<cl::Device> platformDevices; ");
        os.writeln(&format!(
            "platforms[{}].getDevices(CL_DEVICE_TYPE_ALL, &platformDevices);",
            backend.preferences().platform_index
        ));
        os.writeln("// Select device and create context and command queue");
        os.writeln(&format!(
            "clDevice = platformDevices[{}];",
            backend.preferences().device_index
        ));
        os.writeln("clContext = cl::Context(clDevice);");
        os.writeln("commandQueue = cl::CommandQueue(clContext, clDevice);");
        os.writeln("// Build OpenCL programs");
        os.writeln("buildInitializeProgram();");
        os.writeln("buildNeuronUpdateProgram();");
        os.writeln("buildSynapseUpdateProgram();");
        os.blank_line();
        for var in &all_vars {
            os.writeln(&format!("{} = new {}[{}];", var.name, var.ty, var.count));
            os.writeln(&format!(
                "d_{name} = cl::Buffer(clContext, CL_MEM_READ_WRITE, {count} * sizeof({ty}), {name});",
                name = var.name,
                count = var.count,
                ty = var.ty
            ));
        }
        Ok(())
    })?;
    os.blank_line();

    os.write("void freeMem()");
    os.scope::<_, GeneratorError>(|os| {
        for var in &all_vars {
            os.writeln(&format!("delete[] {};", var.name));
        }
        Ok(())
    })?;
    os.blank_line();

    // Per-variable push/pull helpers.
    for var in &all_vars {
        os.write(&format!("void push{}ToDevice(bool uninitialisedOnly)", var.name));
        os.scope::<_, GeneratorError>(|os| {
            launcher::gen_variable_push(
                backend,
                os,
                &var.ty,
                &var.name,
                VarLocation::HOST_DEVICE,
                var.auto_initialised,
                var.count,
            )
        })?;
        os.write(&format!("void pull{}FromDevice()", var.name));
        os.scope::<_, GeneratorError>(|os| {
            launcher::gen_variable_pull(backend, os, &var.ty, &var.name, VarLocation::HOST_DEVICE, var.count);
            Ok(())
        })?;
        os.blank_line();
    }

    // Per-group aggregates and current spike transfer.
    for ng_id in model.neuron_group_ids() {
        let ng = model.neuron_group(ng_id);
        let group_vars = neuron_group_vars(model, ng_id);

        os.write(&format!("void push{}StateToDevice(bool uninitialisedOnly)", ng.name));
        os.scope::<_, GeneratorError>(|os| {
            for var in &group_vars {
                os.writeln(&format!("push{}ToDevice(uninitialisedOnly);", var.name));
            }
            Ok(())
        })?;
        os.write(&format!("void pull{}StateFromDevice()", ng.name));
        os.scope::<_, GeneratorError>(|os| {
            for var in &group_vars {
                os.writeln(&format!("pull{}FromDevice();", var.name));
            }
            Ok(())
        })?;
        os.blank_line();

        os.write(&format!("void pushCurrent{}SpikesToDevice()", ng.name));
        os.scope::<_, GeneratorError>(|os| {
            launcher::gen_current_spike_push(
                backend,
                os,
                model,
                ng,
                model.is_true_spike_required(ng_id) && ng.is_delay_required(),
                false,
            );
            Ok(())
        })?;
        os.write(&format!("void pullCurrent{}SpikesFromDevice()", ng.name));
        os.scope::<_, GeneratorError>(|os| {
            launcher::gen_current_spike_pull(
                backend,
                os,
                model,
                ng,
                model.is_true_spike_required(ng_id) && ng.is_delay_required(),
                false,
            );
            Ok(())
        })?;
        if model.is_spike_event_required(ng_id) {
            os.write(&format!("void pushCurrent{}SpikeEventsToDevice()", ng.name));
            os.scope::<_, GeneratorError>(|os| {
                launcher::gen_current_spike_push(backend, os, model, ng, ng.is_delay_required(), true);
                Ok(())
            })?;
            os.write(&format!("void pullCurrent{}SpikeEventsFromDevice()", ng.name));
            os.scope::<_, GeneratorError>(|os| {
                launcher::gen_current_spike_pull(backend, os, model, ng, ng.is_delay_required(), true);
                Ok(())
            })?;
        }
        os.blank_line();
    }

    // Whole-model aggregates used by initializeSparse().
    os.write("void copyStateToDevice(bool uninitialisedOnly)");
    os.scope::<_, GeneratorError>(|os| {
        for ng_id in model.neuron_group_ids() {
            os.writeln(&format!(
                "push{}StateToDevice(uninitialisedOnly);",
                model.neuron_group(ng_id).name
            ));
        }
        for sg_id in model.synapse_group_ids() {
            for var in synapse_group_vars(model, backend, sg_id)? {
                if !var.name.starts_with("rowLength") && !var.name.starts_with("ind") {
                    os.writeln(&format!("push{}ToDevice(uninitialisedOnly);", var.name));
                }
            }
        }
        Ok(())
    })?;
    os.blank_line();

    os.write("void copyConnectivityToDevice(bool uninitialisedOnly)");
    os.scope::<_, GeneratorError>(|os| {
        for sg_id in model.synapse_group_ids() {
            let sg = model.synapse_group(sg_id);
            if sg.matrix_type.contains(SynapseMatrixType::SPARSE) {
                os.writeln(&format!("pushrowLength{}ToDevice(uninitialisedOnly);", sg.name));
                os.writeln(&format!("pushind{}ToDevice(uninitialisedOnly);", sg.name));
            }
        }
        Ok(())
    })?;

    Ok(os.finish()?)
}
