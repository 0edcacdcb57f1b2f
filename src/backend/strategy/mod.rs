pub mod post_span;
pub mod pre_span;

use crate::codestream::CodeStream;
use crate::error::GeneratorError;
use crate::merger::MergedSynapseGroup;
use crate::model::{ModelSpec, SynapseGroupId};
use crate::substitution::Substitutions;

use super::backend::Backend;

pub use post_span::PostSpan;
pub use pre_span::PreSpan;

/// Emits one weight-update code block (threshold, event or sim) for the
/// archetype of a merged synapse group.
pub type SynapseGroupHandler<'a> = &'a mut dyn FnMut(
    &mut CodeStream,
    &MergedSynapseGroup,
    &mut Substitutions,
) -> Result<(), GeneratorError>;

/// How presynaptic updates of one synapse group are parallelised and
/// accumulated. Strategies are resolved by scanning the backend's
/// registry in reverse registration order.
pub trait PresynapticUpdateStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Number of threads the group needs (before workgroup padding).
    fn num_threads(&self, model: &ModelSpec, sg: SynapseGroupId) -> usize;

    /// Row stride of the synaptic matrix under this strategy.
    fn synaptic_matrix_row_stride(&self, model: &ModelSpec, sg: SynapseGroupId) -> usize;

    fn is_compatible(&self, model: &ModelSpec, sg: SynapseGroupId) -> bool;

    /// Accumulate postsynaptic input into a thread-local register.
    fn should_accumulate_in_register(
        &self,
        model: &ModelSpec,
        merged: &MergedSynapseGroup,
        backend: &Backend,
    ) -> bool;

    /// Accumulate into a workgroup-shared array instead.
    fn should_accumulate_in_shared_memory(
        &self,
        model: &ModelSpec,
        merged: &MergedSynapseGroup,
        backend: &Backend,
    ) -> bool;

    /// Emit the inner update loop for one merged synapse group. The
    /// surrounding shared declarations, accumulator zeroing and final
    /// write-back belong to the kernel emitter.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<(), GeneratorError>;
}

/// Install the accumulation function substitution (`addToInSyn` or
/// `addToInSynDelay`) for one synapse group.
pub(crate) fn add_accumulation_substitution(
    subs: &mut Substitutions,
    model: &ModelSpec,
    merged: &MergedSynapseGroup,
    backend: &Backend,
    target: AccumulationTarget,
) -> Result<(), GeneratorError> {
    let sg = model.synapse_group(merged.archetype());
    if sg.is_dendritic_delay_required() {
        // Dendritic delay buffers are always hit by more than one
        // thread, so the update must be atomic.
        let offset = format!(
            "(((*group->denDelayPtr + $(1)) % {}) * group->numTrgNeurons) + ",
            sg.max_dendritic_delay_timesteps
        );
        subs.add_func_substitution(
            "addToInSynDelay",
            2,
            format!(
                "{}(&group->denDelay[{}$(id_post)], $(0))",
                backend.float_atomic_add("global"),
                offset
            ),
        )?;
        return Ok(());
    }

    let body = match target {
        AccumulationTarget::Register => "linSyn += $(0)".to_string(),
        AccumulationTarget::SharedMemory => format!(
            "{}(&shLg[$(id_post)], $(0))",
            backend.float_atomic_add("local")
        ),
        AccumulationTarget::AtomicGlobal => format!(
            "{}(&group->inSyn[$(id_post)], $(0))",
            backend.float_atomic_add("global")
        ),
    };
    subs.add_func_substitution("addToInSyn", 1, body)?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AccumulationTarget {
    Register,
    SharedMemory,
    AtomicGlobal,
}
