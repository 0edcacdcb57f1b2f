use crate::codestream::CodeStream;
use crate::error::GeneratorError;
use crate::merger::MergedStructLayout;
use crate::model::{ModelSpec, NeuronGroup, ScalarType, VarLocation};

use super::backend::{pad_size, Backend};
use super::dispatch::DispatchableGroup;

fn field_size(device_ty: &str, precision: ScalarType) -> usize {
    if device_ty.contains('*') {
        8
    } else if device_ty == "scalar" {
        match precision {
            ScalarType::Float => 4,
            ScalarType::Double => 8,
        }
    } else if device_ty == "double" {
        8
    } else {
        4
    }
}

/// Conservative host-visible byte size of a merged struct: fields laid
/// out in order with natural alignment, total rounded up to the widest
/// alignment.
pub fn struct_device_size(layout: &MergedStructLayout, precision: ScalarType) -> usize {
    let mut offset = 0usize;
    let mut max_align = 1usize;
    for field in &layout.fields {
        let size = field_size(&field.device_ty, precision);
        let align = size;
        max_align = max_align.max(align);
        offset = (offset + align - 1) / align * align;
        offset += size;
    }
    (offset + max_align - 1) / max_align * max_align
}

/// Device-side struct type definition.
pub fn gen_merged_struct_def(os: &mut CodeStream, layout: &MergedStructLayout) {
    os.writeln(&format!("struct {}", layout.struct_name()));
    os.writeln("{");
    for field in &layout.fields {
        let sep = if field.device_ty.ends_with('*') { "" } else { " " };
        os.writeln(&format!("    {}{}{};", field.device_ty, sep, field.name));
    }
    os.writeln("};");
}

/// Device-side kernel that fills one slot of the merged group array.
pub fn gen_merged_struct_build_kernel(os: &mut CodeStream, layout: &MergedStructLayout) -> Result<(), GeneratorError> {
    os.write(&format!(
        "__kernel void {}(__global struct {} *group, unsigned int idx",
        layout.build_kernel_name(),
        layout.struct_name()
    ));
    for field in &layout.fields {
        let sep = if field.device_ty.ends_with('*') { "" } else { " " };
        os.write(&format!(", {}{}{}", field.device_ty, sep, field.name));
    }
    os.write(")");
    os.scope::<_, GeneratorError>(|os| {
        for field in &layout.fields {
            os.writeln(&format!("group[idx].{name} = {name};", name = field.name));
        }
        Ok(())
    })?;
    os.blank_line();
    Ok(())
}

/// Host-side declarations for one merged group: the device array buffer
/// and the build kernel handle.
pub fn gen_merged_struct_preamble(os: &mut CodeStream, layout: &MergedStructLayout) {
    os.writeln(&format!("cl::Buffer {};", layout.array_name()));
    os.writeln(&format!("cl::Kernel {};", layout.build_kernel_name()));
}

/// Host-side routine that allocates the merged group array and launches
/// the build kernel once per member.
pub fn gen_merged_struct_build(
    os: &mut CodeStream,
    layout: &MergedStructLayout,
    program_name: &str,
    precision: ScalarType,
) -> Result<(), GeneratorError> {
    let size = struct_device_size(layout, precision);
    os.writeln(&format!("// {}", layout.struct_name()));
    os.writeln(&format!(
        "{} = cl::Buffer(clContext, CL_MEM_READ_WRITE, {} * {});",
        layout.array_name(),
        layout.num_members,
        size
    ));
    os.writeln(&format!(
        "{} = cl::Kernel({}, \"{}\");",
        layout.build_kernel_name(),
        program_name,
        layout.build_kernel_name()
    ));
    for member in 0..layout.num_members {
        os.writeln(&format!(
            "CHECK_OPENCL_ERRORS({}.setArg(0, {}));",
            layout.build_kernel_name(),
            layout.array_name()
        ));
        os.writeln(&format!(
            "CHECK_OPENCL_ERRORS({}.setArg(1, {}));",
            layout.build_kernel_name(),
            member
        ));
        for (f, field) in layout.fields.iter().enumerate() {
            os.writeln(&format!(
                "CHECK_OPENCL_ERRORS({}.setArg({}, {}));",
                layout.build_kernel_name(),
                f + 2,
                field.host_values[member]
            ));
        }
        os.writeln(&format!(
            "CHECK_OPENCL_ERRORS(commandQueue.enqueueTask({}));",
            layout.build_kernel_name()
        ));
    }
    os.blank_line();
    Ok(())
}

/// Kernel parameter list entry per merged group array.
pub fn gen_merged_group_kernel_params(
    os: &mut CodeStream,
    layouts: &[MergedStructLayout],
    include_final_comma: bool,
) {
    for (i, layout) in layouts.iter().enumerate() {
        os.write(&format!(
            "__global struct {} *{}",
            layout.struct_name(),
            layout.array_name()
        ));
        if include_final_comma || i != layouts.len() - 1 {
            os.write(", ");
        }
    }
}

/// Host-side argument binding for the merged group arrays, starting at
/// argument index `first_arg`.
pub fn set_merged_group_kernel_params(
    os: &mut CodeStream,
    kernel_name: &str,
    layouts: &[MergedStructLayout],
    first_arg: usize,
) {
    for (i, layout) in layouts.iter().enumerate() {
        os.writeln(&format!(
            "CHECK_OPENCL_ERRORS({}.setArg({}, {}));",
            kernel_name,
            first_arg + i,
            layout.array_name()
        ));
    }
}

/// `__constant` per-member start-id arrays for one merged group list;
/// advances the running thread id.
pub fn gen_group_start_ids<M: DispatchableGroup>(
    os: &mut CodeStream,
    id_start: &mut usize,
    workgroup_size: usize,
    merged_groups: &[M],
    num_threads: &dyn Fn(&M, usize) -> usize,
) {
    for merged in merged_groups {
        os.write(&format!(
            "__constant unsigned int d_merged{}GroupStartID{}[] = {{",
            merged.prefix(),
            merged.index()
        ));
        for member in 0..merged.num_members() {
            os.write(&format!("{}, ", id_start));
            *id_start += pad_size(num_threads(merged, member), workgroup_size);
        }
        os.writeln("};");
    }
}

// ---------------------------------------------------------------------
// Variable and spike transfer helpers
// ---------------------------------------------------------------------

/// `pushXToDevice`-style body for one variable.
pub fn gen_variable_push(
    backend: &Backend,
    os: &mut CodeStream,
    ty: &str,
    name: &str,
    location: VarLocation,
    auto_initialised: bool,
    count: usize,
) -> Result<(), GeneratorError> {
    if location.contains(VarLocation::ZERO_COPY) || backend.preferences().automatic_copy {
        return Ok(());
    }
    let write = |os: &mut CodeStream| {
        os.writeln(&format!(
            "CHECK_OPENCL_ERRORS(commandQueue.enqueueWriteBuffer(d_{name}, CL_TRUE, 0, {count} * sizeof({ty}), {name}));",
            name = name,
            count = count,
            ty = ty
        ));
    };
    if auto_initialised {
        os.write("if(!uninitialisedOnly)");
        os.scope::<_, GeneratorError>(|os| {
            write(os);
            Ok(())
        })?;
    } else {
        write(os);
    }
    Ok(())
}

/// `pullXFromDevice`-style body for one variable.
pub fn gen_variable_pull(
    backend: &Backend,
    os: &mut CodeStream,
    ty: &str,
    name: &str,
    location: VarLocation,
    count: usize,
) {
    if location.contains(VarLocation::ZERO_COPY) || backend.preferences().automatic_copy {
        return;
    }
    os.writeln(&format!(
        "CHECK_OPENCL_ERRORS(commandQueue.enqueueReadBuffer(d_{name}, CL_TRUE, 0, {count} * sizeof({ty}), {name}));",
        name = name,
        count = count,
        ty = ty
    ));
}

/// Current spike push: whole delay buffer when the group is delayed,
/// otherwise just the current count and ids.
pub fn gen_current_spike_push(
    backend: &Backend,
    os: &mut CodeStream,
    model: &ModelSpec,
    ng: &NeuronGroup,
    delay_required: bool,
    spike_event: bool,
) {
    if ng.spike_location.contains(VarLocation::ZERO_COPY) || backend.preferences().automatic_copy {
        return;
    }
    let _ = model;
    let cnt_prefix = if spike_event { "glbSpkCntEvnt" } else { "glbSpkCnt" };
    let spk_prefix = if spike_event { "glbSpkEvnt" } else { "glbSpk" };

    os.writeln(&format!(
        "CHECK_OPENCL_ERRORS(commandQueue.enqueueWriteBuffer(d_{cnt}{g}, CL_TRUE, 0, sizeof(unsigned int), {cnt}{g}));",
        cnt = cnt_prefix,
        g = ng.name
    ));
    if delay_required {
        os.writeln(&format!(
            "CHECK_OPENCL_ERRORS(commandQueue.enqueueWriteBuffer(d_{spk}{g}, CL_TRUE, 0, {n} * sizeof(unsigned int), {spk}{g}));",
            spk = spk_prefix,
            g = ng.name,
            n = ng.num_neurons
        ));
    } else {
        os.writeln(&format!(
            "CHECK_OPENCL_ERRORS(commandQueue.enqueueWriteBuffer(d_{spk}{g}, CL_TRUE, 0, {cnt}{g}[0] * sizeof(unsigned int), {spk}{g}));",
            spk = spk_prefix,
            g = ng.name,
            cnt = cnt_prefix
        ));
    }
}

/// Current spike pull; mirror of the push.
pub fn gen_current_spike_pull(
    backend: &Backend,
    os: &mut CodeStream,
    model: &ModelSpec,
    ng: &NeuronGroup,
    delay_required: bool,
    spike_event: bool,
) {
    if ng.spike_location.contains(VarLocation::ZERO_COPY) || backend.preferences().automatic_copy {
        return;
    }
    let _ = model;
    let cnt_prefix = if spike_event { "glbSpkCntEvnt" } else { "glbSpkCnt" };
    let spk_prefix = if spike_event { "glbSpkEvnt" } else { "glbSpk" };

    os.writeln(&format!(
        "CHECK_OPENCL_ERRORS(commandQueue.enqueueReadBuffer(d_{cnt}{g}, CL_TRUE, 0, sizeof(unsigned int), {cnt}{g}));",
        cnt = cnt_prefix,
        g = ng.name
    ));
    if delay_required {
        os.writeln(&format!(
            "CHECK_OPENCL_ERRORS(commandQueue.enqueueReadBuffer(d_{spk}{g}, CL_TRUE, 0, {n} * sizeof(unsigned int), {spk}{g}));",
            spk = spk_prefix,
            g = ng.name,
            n = ng.num_neurons
        ));
    } else {
        os.writeln(&format!(
            "CHECK_OPENCL_ERRORS(commandQueue.enqueueReadBuffer(d_{spk}{g}, CL_TRUE, 0, {cnt}{g}[0] * sizeof(unsigned int), {spk}{g}));",
            spk = spk_prefix,
            g = ng.name,
            cnt = cnt_prefix
        ));
    }
}

/// The check-and-throw macro every emitted host call goes through.
pub fn gen_check_macro(os: &mut CodeStream) {
    os.writeln("// ------------------------------------------------------------------------");
    os.writeln("// Helper macro for error-checking OpenCL calls");
    os.writeln("#define CHECK_OPENCL_ERRORS(call) {\\");
    os.writeln("    cl_int error = call;\\");
    os.writeln("    if (error != CL_SUCCESS) {\\");
    os.writeln(
        "        throw std::runtime_error(__FILE__\": \" + std::to_string(__LINE__) + \": opencl error \" + std::to_string(error));\\",
    );
    os.writeln("    }\\");
    os.writeln("}");
}
