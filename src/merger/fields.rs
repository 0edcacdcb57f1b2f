use crate::model::{ModelSpec, ScalarType, SynapseGroup, SynapseGroupId, SynapseMatrixType};

use super::merged::{MergedNeuronGroup, MergedSynapseGroup};

/// How a numeric model parameter reaches the emitted code: folded to a
/// literal when every member agrees, lifted to a struct field when at
/// least two members disagree.
#[derive(Debug, Clone, PartialEq)]
pub enum Fold {
    Literal(String),
    Field(String),
}

impl Fold {
    /// Replacement text for a `$(name)` substitution.
    pub fn replacement(&self) -> String {
        match self {
            Fold::Literal(lit) => lit.clone(),
            Fold::Field(field) => format!("group->{}", field),
        }
    }
}

pub fn fold_param(field_name: &str, values: &[f64], precision: ScalarType) -> Fold {
    if values.windows(2).all(|w| w[0] == w[1]) {
        Fold::Literal(precision.literal(values[0]))
    } else {
        Fold::Field(field_name.to_string())
    }
}

/// Fold every named parameter; `suffix` disambiguates field names when
/// several parameter sets share a struct (e.g. `tauInSyn0`).
pub fn collect_param_folds(
    names: &[String],
    suffix: &str,
    values_per_member: &[Vec<f64>],
    precision: ScalarType,
) -> Vec<(String, Fold)> {
    names
        .iter()
        .enumerate()
        .map(|(p, name)| {
            let field = format!("{}{}", name, suffix);
            let values: Vec<f64> = values_per_member.iter().map(|v| v[p]).collect();
            (name.clone(), fold_param(&field, &values, precision))
        })
        .collect()
}

/// One field of a merged group struct.
#[derive(Debug, Clone)]
pub struct MergedField {
    pub name: String,
    /// Device-side type, e.g. `__global scalar*` or `unsigned int`.
    pub device_ty: String,
    /// Host-side type used when setting build-kernel arguments.
    pub host_ty: String,
    /// Host-side expression per member (buffer name or literal).
    pub host_values: Vec<String>,
}

/// The derived struct layout of one merged group.
#[derive(Debug, Clone)]
pub struct MergedStructLayout {
    pub prefix: String,
    pub index: usize,
    pub fields: Vec<MergedField>,
    pub num_members: usize,
}

impl MergedStructLayout {
    pub fn struct_name(&self) -> String {
        format!("Merged{}Group{}", self.prefix, self.index)
    }

    pub fn array_name(&self) -> String {
        format!("d_merged{}Group{}", self.prefix, self.index)
    }

    pub fn build_kernel_name(&self) -> String {
        format!("buildMerged{}Group{}Kernel", self.prefix, self.index)
    }

    pub fn start_id_array_name(&self) -> String {
        format!("d_merged{}GroupStartID{}", self.prefix, self.index)
    }
}

struct LayoutBuilder {
    layout: MergedStructLayout,
}

impl LayoutBuilder {
    fn new(prefix: &str, index: usize, num_members: usize) -> LayoutBuilder {
        LayoutBuilder {
            layout: MergedStructLayout {
                prefix: prefix.to_string(),
                index,
                fields: Vec::new(),
                num_members,
            },
        }
    }

    /// A device buffer field; on the host it is a `cl::Buffer`.
    fn pointer(&mut self, name: impl Into<String>, device_ty: impl Into<String>, host_values: Vec<String>) {
        self.layout.fields.push(MergedField {
            name: name.into(),
            device_ty: device_ty.into(),
            host_ty: "cl::Buffer".to_string(),
            host_values,
        });
    }

    fn scalar(&mut self, name: impl Into<String>, device_ty: &str, host_values: Vec<String>) {
        self.layout.fields.push(MergedField {
            name: name.into(),
            device_ty: device_ty.to_string(),
            host_ty: device_ty.to_string(),
            host_values,
        });
    }

    fn folded_params(&mut self, folds: &[(String, Fold)], scalar_ty: &str, values_per_member: &[Vec<f64>], precision: ScalarType) {
        for (p, (_, fold)) in folds.iter().enumerate() {
            if let Fold::Field(field) = fold {
                let values = values_per_member.iter().map(|v| precision.literal(v[p])).collect();
                self.scalar(field.clone(), scalar_ty, values);
            }
        }
    }

    fn finish(self) -> MergedStructLayout {
        self.layout
    }
}

fn global_ptr(ty: &str) -> String {
    format!("__global {}*", ty)
}

/// Does any weight-update code block of this group read the given
/// token (used for spike-time fields)?
pub fn wu_reads(sg: &SynapseGroup, token: &str) -> bool {
    [
        &sg.wu_model.sim_code,
        &sg.wu_model.event_code,
        &sg.wu_model.event_threshold_condition_code,
        &sg.wu_model.learn_post_code,
        &sg.wu_model.synapse_dynamics_code,
    ]
    .iter()
    .any(|c| c.contains(token))
}

// ---------------------------------------------------------------------
// Neuron group layouts
// ---------------------------------------------------------------------

fn neuron_common(
    b: &mut LayoutBuilder,
    model: &ModelSpec,
    merged: &MergedNeuronGroup,
    time_ty: &str,
) {
    let arch = model.neuron_group(merged.archetype());
    let members: Vec<_> = merged.groups.iter().map(|id| model.neuron_group(*id)).collect();
    let names = |f: &dyn Fn(&crate::model::NeuronGroup) -> String| -> Vec<String> {
        members.iter().map(|ng| f(*ng)).collect()
    };

    b.scalar("numNeurons", "unsigned int", names(&|ng| ng.num_neurons.to_string()));
    b.pointer("spkCnt", global_ptr("unsigned int"), names(&|ng| format!("d_glbSpkCnt{}", ng.name)));
    b.pointer("spk", global_ptr("unsigned int"), names(&|ng| format!("d_glbSpk{}", ng.name)));
    if model.is_spike_event_required(merged.archetype()) {
        b.pointer("spkCntEvnt", global_ptr("unsigned int"), names(&|ng| format!("d_glbSpkCntEvnt{}", ng.name)));
        b.pointer("spkEvnt", global_ptr("unsigned int"), names(&|ng| format!("d_glbSpkEvnt{}", ng.name)));
    }
    if arch.is_delay_required() {
        b.pointer("spkQuePtr", "__global volatile unsigned int*", names(&|ng| format!("d_spkQuePtr{}", ng.name)));
    }
    if model.is_spike_time_required(merged.archetype()) {
        b.pointer("sT", global_ptr(time_ty), names(&|ng| format!("d_sT{}", ng.name)));
    }
    for var in &arch.model.vars {
        let vname = var.name.clone();
        b.pointer(vname.clone(), global_ptr(&var.ty), names(&|ng| format!("d_{}{}", vname, ng.name)));
    }
}

pub fn neuron_update_layout(
    model: &ModelSpec,
    merged: &MergedNeuronGroup,
) -> MergedStructLayout {
    let mut b = LayoutBuilder::new("NeuronUpdate", merged.index, merged.groups.len());
    let time_ty = model.time_precision.name();
    neuron_common(&mut b, model, merged, time_ty);

    let arch = model.neuron_group(merged.archetype());
    let members: Vec<_> = merged.groups.iter().map(|id| model.neuron_group(*id)).collect();

    if arch.is_sim_rng_required() {
        b.pointer(
            "rng",
            "__global clrngLfsr113HostStream*",
            members.iter().map(|ng| format!("d_rng{}", ng.name)).collect(),
        );
    }

    // Heterogeneous neuron model parameters become fields.
    let scalar = "scalar";
    let param_values: Vec<Vec<f64>> = members.iter().map(|ng| ng.params.clone()).collect();
    let folds = collect_param_folds(&arch.model.param_names, "", &param_values, model.precision);
    b.folded_params(&folds, scalar, &param_values, model.precision);
    let derived_values: Vec<Vec<f64>> = members.iter().map(|ng| ng.derived_params.clone()).collect();
    let folds = collect_param_folds(&arch.model.derived_param_names, "", &derived_values, model.precision);
    b.folded_params(&folds, scalar, &derived_values, model.precision);

    // Incoming postsynaptic inputs.
    for (i, sg_id) in arch.in_syn().iter().enumerate() {
        let sg = model.synapse_group(*sg_id);
        let member_sgs: Vec<&SynapseGroup> =
            members.iter().map(|ng| model.synapse_group(ng.in_syn()[i])).collect();
        let target = |s: &SynapseGroup| s.ps_model_target_name().to_string();

        b.pointer(
            format!("inSynInSyn{}", i),
            global_ptr(scalar),
            member_sgs.iter().map(|s| format!("d_inSyn{}", target(s))).collect(),
        );
        if sg.is_dendritic_delay_required() {
            b.pointer(
                format!("denDelayInSyn{}", i),
                global_ptr(scalar),
                member_sgs.iter().map(|s| format!("d_denDelay{}", target(s))).collect(),
            );
            b.pointer(
                format!("denDelayPtrInSyn{}", i),
                "__global volatile unsigned int*",
                member_sgs.iter().map(|s| format!("d_denDelayPtr{}", target(s))).collect(),
            );
        }
        if sg.matrix_type.contains(SynapseMatrixType::INDIVIDUAL_PSM) {
            for var in &sg.ps_model.vars {
                b.pointer(
                    format!("{}InSyn{}", var.name, i),
                    global_ptr(&var.ty),
                    member_sgs.iter().map(|s| format!("d_{}{}", var.name, target(s))).collect(),
                );
            }
        }
        let suffix = format!("InSyn{}", i);
        let ps_params: Vec<Vec<f64>> = member_sgs.iter().map(|s| s.ps_params.clone()).collect();
        let folds = collect_param_folds(&sg.ps_model.param_names, &suffix, &ps_params, model.precision);
        b.folded_params(&folds, scalar, &ps_params, model.precision);
        let ps_derived: Vec<Vec<f64>> = member_sgs.iter().map(|s| s.ps_derived_params.clone()).collect();
        let folds = collect_param_folds(&sg.ps_model.derived_param_names, &suffix, &ps_derived, model.precision);
        b.folded_params(&folds, scalar, &ps_derived, model.precision);
    }

    // Current sources.
    for (i, cs) in arch.current_sources.iter().enumerate() {
        for var in &cs.model.vars {
            b.pointer(
                format!("{}CS{}", var.name, i),
                global_ptr(&var.ty),
                members.iter().map(|ng| format!("d_{}{}", var.name, ng.current_sources[i].name)).collect(),
            );
        }
        let suffix = format!("CS{}", i);
        let cs_params: Vec<Vec<f64>> =
            members.iter().map(|ng| ng.current_sources[i].params.clone()).collect();
        let folds = collect_param_folds(&cs.model.param_names, &suffix, &cs_params, model.precision);
        b.folded_params(&folds, scalar, &cs_params, model.precision);
    }

    b.finish()
}

pub fn neuron_init_layout(model: &ModelSpec, merged: &MergedNeuronGroup) -> MergedStructLayout {
    let mut b = LayoutBuilder::new("NeuronInit", merged.index, merged.groups.len());
    let time_ty = model.time_precision.name();
    neuron_common(&mut b, model, merged, time_ty);

    let arch = model.neuron_group(merged.archetype());
    let members: Vec<_> = merged.groups.iter().map(|id| model.neuron_group(*id)).collect();
    let scalar = "scalar";

    // Heterogeneous variable-initialiser parameters.
    for (k, var) in arch.model.vars.iter().enumerate() {
        let init = &arch.var_initialisers[k];
        let values: Vec<Vec<f64>> =
            members.iter().map(|ng| ng.var_initialisers[k].params.clone()).collect();
        let folds = collect_param_folds(&init.param_names, &var.name, &values, model.precision);
        b.folded_params(&folds, scalar, &values, model.precision);
    }

    for (i, sg_id) in arch.in_syn().iter().enumerate() {
        let sg = model.synapse_group(*sg_id);
        let member_sgs: Vec<&SynapseGroup> =
            members.iter().map(|ng| model.synapse_group(ng.in_syn()[i])).collect();
        let target = |s: &SynapseGroup| s.ps_model_target_name().to_string();

        b.pointer(
            format!("inSynInSyn{}", i),
            global_ptr(scalar),
            member_sgs.iter().map(|s| format!("d_inSyn{}", target(s))).collect(),
        );
        if sg.is_dendritic_delay_required() {
            b.pointer(
                format!("denDelayInSyn{}", i),
                global_ptr(scalar),
                member_sgs.iter().map(|s| format!("d_denDelay{}", target(s))).collect(),
            );
            b.pointer(
                format!("denDelayPtrInSyn{}", i),
                "__global volatile unsigned int*",
                member_sgs.iter().map(|s| format!("d_denDelayPtr{}", target(s))).collect(),
            );
        }
        if sg.matrix_type.contains(SynapseMatrixType::INDIVIDUAL_PSM) {
            for (k, var) in sg.ps_model.vars.iter().enumerate() {
                b.pointer(
                    format!("{}InSyn{}", var.name, i),
                    global_ptr(&var.ty),
                    member_sgs.iter().map(|s| format!("d_{}{}", var.name, target(s))).collect(),
                );
                let init = &sg.ps_var_initialisers[k];
                let suffix = format!("{}InSyn{}", var.name, i);
                let values: Vec<Vec<f64>> =
                    member_sgs.iter().map(|s| s.ps_var_initialisers[k].params.clone()).collect();
                let folds = collect_param_folds(&init.param_names, &suffix, &values, model.precision);
                b.folded_params(&folds, scalar, &values, model.precision);
            }
        }
    }

    for (i, cs) in arch.current_sources.iter().enumerate() {
        for (k, var) in cs.model.vars.iter().enumerate() {
            b.pointer(
                format!("{}CS{}", var.name, i),
                global_ptr(&var.ty),
                members.iter().map(|ng| format!("d_{}{}", var.name, ng.current_sources[i].name)).collect(),
            );
            let init = &cs.var_initialisers[k];
            let suffix = format!("{}CS{}", var.name, i);
            let values: Vec<Vec<f64>> =
                members.iter().map(|ng| ng.current_sources[i].var_initialisers[k].params.clone()).collect();
            let folds = collect_param_folds(&init.param_names, &suffix, &values, model.precision);
            b.folded_params(&folds, scalar, &values, model.precision);
        }
    }

    b.finish()
}

pub fn neuron_spike_queue_update_layout(
    model: &ModelSpec,
    merged: &MergedNeuronGroup,
) -> MergedStructLayout {
    let mut b = LayoutBuilder::new("NeuronSpikeQueueUpdate", merged.index, merged.groups.len());
    let arch = model.neuron_group(merged.archetype());
    let members: Vec<_> = merged.groups.iter().map(|id| model.neuron_group(*id)).collect();

    if arch.is_delay_required() {
        b.pointer(
            "spkQuePtr",
            "__global volatile unsigned int*",
            members.iter().map(|ng| format!("d_spkQuePtr{}", ng.name)).collect(),
        );
    }
    b.pointer(
        "spkCnt",
        global_ptr("unsigned int"),
        members.iter().map(|ng| format!("d_glbSpkCnt{}", ng.name)).collect(),
    );
    if model.is_spike_event_required(merged.archetype()) {
        b.pointer(
            "spkCntEvnt",
            global_ptr("unsigned int"),
            members.iter().map(|ng| format!("d_glbSpkCntEvnt{}", ng.name)).collect(),
        );
    }
    b.finish()
}

// ---------------------------------------------------------------------
// Synapse group layouts
// ---------------------------------------------------------------------

fn synapse_common(
    b: &mut LayoutBuilder,
    model: &ModelSpec,
    merged: &MergedSynapseGroup,
    row_stride: &dyn Fn(SynapseGroupId) -> u32,
) {
    let members: Vec<&SynapseGroup> =
        merged.groups.iter().map(|id| model.synapse_group(*id)).collect();

    b.scalar(
        "rowStride",
        "unsigned int",
        merged.groups.iter().map(|id| row_stride(*id).to_string()).collect(),
    );
    b.scalar(
        "numSrcNeurons",
        "unsigned int",
        members.iter().map(|s| model.neuron_group(s.src).num_neurons.to_string()).collect(),
    );
    b.scalar(
        "numTrgNeurons",
        "unsigned int",
        members.iter().map(|s| model.neuron_group(s.trg).num_neurons.to_string()).collect(),
    );
}

fn wu_var_pointers(b: &mut LayoutBuilder, members: &[&SynapseGroup]) {
    let arch = members[0];
    if arch.matrix_type.contains(SynapseMatrixType::INDIVIDUAL_G) {
        for var in &arch.wu_model.vars {
            b.pointer(
                var.name.clone(),
                global_ptr(&var.ty),
                members.iter().map(|s| format!("d_{}{}", var.name, s.name)).collect(),
            );
        }
    }
}

/// Names and per-member constant values of global (non-individual)
/// weight-update variables; these fold like parameters.
pub fn global_wu_var_values(members: &[&SynapseGroup]) -> (Vec<String>, Vec<Vec<f64>>) {
    let arch = members[0];
    let names: Vec<String> = arch.wu_model.vars.iter().map(|v| v.name.clone()).collect();
    let values = members
        .iter()
        .map(|s| {
            s.wu_var_initialisers
                .iter()
                .map(|init| init.params.first().copied().unwrap_or(0.0))
                .collect()
        })
        .collect();
    (names, values)
}

fn wu_param_fields(b: &mut LayoutBuilder, model: &ModelSpec, members: &[&SynapseGroup]) {
    let arch = members[0];
    let param_values: Vec<Vec<f64>> = members.iter().map(|s| s.wu_params.clone()).collect();
    let folds = collect_param_folds(&arch.wu_model.param_names, "", &param_values, model.precision);
    b.folded_params(&folds, "scalar", &param_values, model.precision);
    let derived_values: Vec<Vec<f64>> = members.iter().map(|s| s.wu_derived_params.clone()).collect();
    let dfolds =
        collect_param_folds(&arch.wu_model.derived_param_names, "", &derived_values, model.precision);
    b.folded_params(&dfolds, "scalar", &derived_values, model.precision);

    if !arch.matrix_type.contains(SynapseMatrixType::INDIVIDUAL_G) {
        let (names, values) = global_wu_var_values(members);
        let vfolds = collect_param_folds(&names, "", &values, model.precision);
        b.folded_params(&vfolds, "scalar", &values, model.precision);
    }
}

pub fn presynaptic_update_layout(
    model: &ModelSpec,
    merged: &MergedSynapseGroup,
    row_stride: &dyn Fn(SynapseGroupId) -> u32,
) -> MergedStructLayout {
    let mut b = LayoutBuilder::new("PresynapticUpdate", merged.index, merged.groups.len());
    synapse_common(&mut b, model, merged, row_stride);

    let members: Vec<&SynapseGroup> =
        merged.groups.iter().map(|id| model.synapse_group(*id)).collect();
    let arch = members[0];
    let scalar = "scalar";
    let time_ty = model.time_precision.name();

    if arch.is_true_spike_required() {
        b.pointer("srcSpkCnt", global_ptr("unsigned int"),
            members.iter().map(|s| format!("d_glbSpkCnt{}", model.neuron_group(s.src).name)).collect());
        b.pointer("srcSpk", global_ptr("unsigned int"),
            members.iter().map(|s| format!("d_glbSpk{}", model.neuron_group(s.src).name)).collect());
    }
    if arch.is_spike_event_required() {
        b.pointer("srcSpkCntEvnt", global_ptr("unsigned int"),
            members.iter().map(|s| format!("d_glbSpkCntEvnt{}", model.neuron_group(s.src).name)).collect());
        b.pointer("srcSpkEvnt", global_ptr("unsigned int"),
            members.iter().map(|s| format!("d_glbSpkEvnt{}", model.neuron_group(s.src).name)).collect());
    }
    if model.neuron_group(arch.src).is_delay_required() {
        b.pointer("srcSpkQuePtr", "__global volatile unsigned int*",
            members.iter().map(|s| format!("d_spkQuePtr{}", model.neuron_group(s.src).name)).collect());
    }
    if model.neuron_group(arch.trg).is_delay_required() {
        b.pointer("trgSpkQuePtr", "__global volatile unsigned int*",
            members.iter().map(|s| format!("d_spkQuePtr{}", model.neuron_group(s.trg).name)).collect());
    }

    b.pointer("inSyn", global_ptr(scalar),
        members.iter().map(|s| format!("d_inSyn{}", s.ps_model_target_name())).collect());
    if arch.is_dendritic_delay_required() {
        b.pointer("denDelay", global_ptr(scalar),
            members.iter().map(|s| format!("d_denDelay{}", s.ps_model_target_name())).collect());
        b.pointer("denDelayPtr", "__global volatile unsigned int*",
            members.iter().map(|s| format!("d_denDelayPtr{}", s.ps_model_target_name())).collect());
    }

    if arch.matrix_type.contains(SynapseMatrixType::SPARSE) {
        b.pointer("rowLength", global_ptr("unsigned int"),
            members.iter().map(|s| format!("d_rowLength{}", s.name)).collect());
        b.pointer("ind", global_ptr("unsigned int"),
            members.iter().map(|s| format!("d_ind{}", s.name)).collect());
    }
    if arch.matrix_type.contains(SynapseMatrixType::BITMASK) {
        b.pointer("gp", global_ptr("uint32_t"),
            members.iter().map(|s| format!("d_gp{}", s.name)).collect());
    }

    if wu_reads(arch, "$(sT_pre)") {
        b.pointer("srcST", global_ptr(time_ty),
            members.iter().map(|s| format!("d_sT{}", model.neuron_group(s.src).name)).collect());
    }
    if wu_reads(arch, "$(sT_post)") {
        b.pointer("trgST", global_ptr(time_ty),
            members.iter().map(|s| format!("d_sT{}", model.neuron_group(s.trg).name)).collect());
    }

    wu_var_pointers(&mut b, &members);
    wu_param_fields(&mut b, model, &members);
    b.finish()
}

pub fn postsynaptic_update_layout(
    model: &ModelSpec,
    merged: &MergedSynapseGroup,
    row_stride: &dyn Fn(SynapseGroupId) -> u32,
) -> MergedStructLayout {
    let mut b = LayoutBuilder::new("PostsynapticUpdate", merged.index, merged.groups.len());
    synapse_common(&mut b, model, merged, row_stride);

    let members: Vec<&SynapseGroup> =
        merged.groups.iter().map(|id| model.synapse_group(*id)).collect();
    let arch = members[0];
    let time_ty = model.time_precision.name();

    // colStride bounds the per-thread work: fan-in for sparse matrices,
    // the whole source population for dense ones.
    if arch.matrix_type.contains(SynapseMatrixType::SPARSE) {
        b.scalar("colStride", "unsigned int",
            members.iter().map(|s| s.max_col_length.unwrap_or(0).to_string()).collect());
        b.pointer("colLength", global_ptr("unsigned int"),
            members.iter().map(|s| format!("d_colLength{}", s.name)).collect());
        b.pointer("remap", global_ptr("unsigned int"),
            members.iter().map(|s| format!("d_remap{}", s.name)).collect());
    } else {
        b.scalar("colStride", "unsigned int",
            members.iter().map(|s| model.neuron_group(s.src).num_neurons.to_string()).collect());
    }

    b.pointer("trgSpkCnt", global_ptr("unsigned int"),
        members.iter().map(|s| format!("d_glbSpkCnt{}", model.neuron_group(s.trg).name)).collect());
    b.pointer("trgSpk", global_ptr("unsigned int"),
        members.iter().map(|s| format!("d_glbSpk{}", model.neuron_group(s.trg).name)).collect());
    if model.neuron_group(arch.trg).is_delay_required() {
        b.pointer("trgSpkQuePtr", "__global volatile unsigned int*",
            members.iter().map(|s| format!("d_spkQuePtr{}", model.neuron_group(s.trg).name)).collect());
    }
    if model.neuron_group(arch.src).is_delay_required() {
        b.pointer("srcSpkQuePtr", "__global volatile unsigned int*",
            members.iter().map(|s| format!("d_spkQuePtr{}", model.neuron_group(s.src).name)).collect());
    }

    if wu_reads(arch, "$(sT_pre)") {
        b.pointer("srcST", global_ptr(time_ty),
            members.iter().map(|s| format!("d_sT{}", model.neuron_group(s.src).name)).collect());
    }
    if wu_reads(arch, "$(sT_post)") {
        b.pointer("trgST", global_ptr(time_ty),
            members.iter().map(|s| format!("d_sT{}", model.neuron_group(s.trg).name)).collect());
    }

    wu_var_pointers(&mut b, &members);
    wu_param_fields(&mut b, model, &members);
    b.finish()
}

pub fn synapse_dynamics_layout(
    model: &ModelSpec,
    merged: &MergedSynapseGroup,
    row_stride: &dyn Fn(SynapseGroupId) -> u32,
) -> MergedStructLayout {
    let mut b = LayoutBuilder::new("SynapseDynamics", merged.index, merged.groups.len());
    synapse_common(&mut b, model, merged, row_stride);

    let members: Vec<&SynapseGroup> =
        merged.groups.iter().map(|id| model.synapse_group(*id)).collect();
    let arch = members[0];
    let scalar = "scalar";

    if arch.matrix_type.contains(SynapseMatrixType::SPARSE) {
        b.pointer("synRemap", global_ptr("unsigned int"),
            members.iter().map(|s| format!("d_synRemap{}", s.name)).collect());
        b.pointer("ind", global_ptr("unsigned int"),
            members.iter().map(|s| format!("d_ind{}", s.name)).collect());
    }

    if arch.is_dendritic_delay_required() {
        b.pointer("denDelay", global_ptr(scalar),
            members.iter().map(|s| format!("d_denDelay{}", s.ps_model_target_name())).collect());
        b.pointer("denDelayPtr", "__global volatile unsigned int*",
            members.iter().map(|s| format!("d_denDelayPtr{}", s.ps_model_target_name())).collect());
    } else {
        b.pointer("inSyn", global_ptr(scalar),
            members.iter().map(|s| format!("d_inSyn{}", s.ps_model_target_name())).collect());
    }

    if model.neuron_group(arch.src).is_delay_required() {
        b.pointer("srcSpkQuePtr", "__global volatile unsigned int*",
            members.iter().map(|s| format!("d_spkQuePtr{}", model.neuron_group(s.src).name)).collect());
    }
    if model.neuron_group(arch.trg).is_delay_required() {
        b.pointer("trgSpkQuePtr", "__global volatile unsigned int*",
            members.iter().map(|s| format!("d_spkQuePtr{}", model.neuron_group(s.trg).name)).collect());
    }

    wu_var_pointers(&mut b, &members);
    wu_param_fields(&mut b, model, &members);
    b.finish()
}

pub fn synapse_dense_init_layout(
    model: &ModelSpec,
    merged: &MergedSynapseGroup,
    row_stride: &dyn Fn(SynapseGroupId) -> u32,
) -> MergedStructLayout {
    let mut b = LayoutBuilder::new("SynapseDenseInit", merged.index, merged.groups.len());
    synapse_common(&mut b, model, merged, row_stride);

    let members: Vec<&SynapseGroup> =
        merged.groups.iter().map(|id| model.synapse_group(*id)).collect();
    wu_var_pointers(&mut b, &members);
    wu_var_init_param_fields(&mut b, model, &members);
    b.finish()
}

pub fn synapse_connectivity_init_layout(
    model: &ModelSpec,
    merged: &MergedSynapseGroup,
    row_stride: &dyn Fn(SynapseGroupId) -> u32,
) -> MergedStructLayout {
    let mut b = LayoutBuilder::new("SynapseConnectivityInit", merged.index, merged.groups.len());
    synapse_common(&mut b, model, merged, row_stride);

    let members: Vec<&SynapseGroup> =
        merged.groups.iter().map(|id| model.synapse_group(*id)).collect();
    let arch = members[0];

    if arch.matrix_type.contains(SynapseMatrixType::SPARSE) {
        b.pointer("rowLength", global_ptr("unsigned int"),
            members.iter().map(|s| format!("d_rowLength{}", s.name)).collect());
        b.pointer("ind", global_ptr("unsigned int"),
            members.iter().map(|s| format!("d_ind{}", s.name)).collect());
    }
    if arch.matrix_type.contains(SynapseMatrixType::BITMASK) {
        b.pointer("gp", global_ptr("uint32_t"),
            members.iter().map(|s| format!("d_gp{}", s.name)).collect());
    }

    if let Some(init) = &arch.connectivity_init {
        let values: Vec<Vec<f64>> = members
            .iter()
            .map(|s| s.connectivity_init.as_ref().map(|c| c.params.clone()).unwrap_or_default())
            .collect();
        let folds = collect_param_folds(&init.param_names, "", &values, model.precision);
        b.folded_params(&folds, "scalar", &values, model.precision);
    }
    b.finish()
}

pub fn synapse_sparse_init_layout(
    model: &ModelSpec,
    merged: &MergedSynapseGroup,
    row_stride: &dyn Fn(SynapseGroupId) -> u32,
) -> MergedStructLayout {
    let mut b = LayoutBuilder::new("SynapseSparseInit", merged.index, merged.groups.len());
    synapse_common(&mut b, model, merged, row_stride);

    let members: Vec<&SynapseGroup> =
        merged.groups.iter().map(|id| model.synapse_group(*id)).collect();
    let arch = members[0];

    b.pointer("rowLength", global_ptr("unsigned int"),
        members.iter().map(|s| format!("d_rowLength{}", s.name)).collect());
    b.pointer("ind", global_ptr("unsigned int"),
        members.iter().map(|s| format!("d_ind{}", s.name)).collect());

    if !arch.wu_model.learn_post_code.is_empty() {
        b.scalar("colStride", "unsigned int",
            members.iter().map(|s| s.max_col_length.unwrap_or(0).to_string()).collect());
        b.pointer("colLength", global_ptr("unsigned int"),
            members.iter().map(|s| format!("d_colLength{}", s.name)).collect());
        b.pointer("remap", global_ptr("unsigned int"),
            members.iter().map(|s| format!("d_remap{}", s.name)).collect());
    }
    if !arch.wu_model.synapse_dynamics_code.is_empty() {
        b.pointer("synRemap", global_ptr("unsigned int"),
            members.iter().map(|s| format!("d_synRemap{}", s.name)).collect());
    }

    if arch.is_wu_var_init_required() {
        wu_var_pointers(&mut b, &members);
        wu_var_init_param_fields(&mut b, model, &members);
    }
    b.finish()
}

pub fn synapse_dendritic_delay_update_layout(
    model: &ModelSpec,
    merged: &MergedSynapseGroup,
) -> MergedStructLayout {
    let mut b = LayoutBuilder::new("SynapseDendriticDelayUpdate", merged.index, merged.groups.len());
    let members: Vec<&SynapseGroup> =
        merged.groups.iter().map(|id| model.synapse_group(*id)).collect();
    b.pointer("denDelayPtr", "__global volatile unsigned int*",
        members.iter().map(|s| format!("d_denDelayPtr{}", s.ps_model_target_name())).collect());
    b.finish()
}

fn wu_var_init_param_fields(b: &mut LayoutBuilder, model: &ModelSpec, members: &[&SynapseGroup]) {
    let arch = members[0];
    for (k, var) in arch.wu_model.vars.iter().enumerate() {
        let init = &arch.wu_var_initialisers[k];
        let values: Vec<Vec<f64>> =
            members.iter().map(|s| s.wu_var_initialisers[k].params.clone()).collect();
        let folds = collect_param_folds(&init.param_names, &var.name, &values, model.precision);
        b.folded_params(&folds, "scalar", &values, model.precision);
    }
}
