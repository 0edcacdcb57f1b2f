use std::cell::Cell;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::codestream::CodeStream;
use crate::error::GeneratorError;
use crate::model::{ModelSpec, ScalarType, SynapseGroupId};
use crate::substitution::{FunctionTemplate, Substitutions};

use super::config::Preferences;
use super::error::BackendError;
use super::strategy::{PostSpan, PreSpan, PresynapticUpdateStrategy};

/// Kernel roles, in the order their names are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    NeuronUpdate = 0,
    PresynapticUpdate,
    PostsynapticUpdate,
    SynapseDynamicsUpdate,
    Initialize,
    InitializeSparse,
    PreNeuronReset,
    PreSynapseReset,
}

pub const KERNEL_COUNT: usize = 8;

/// Stable kernel entry point names.
pub const KERNEL_NAMES: [&str; KERNEL_COUNT] = [
    "updateNeuronsKernel",
    "updatePresynapticKernel",
    "updatePostsynapticKernel",
    "updateSynapseDynamicsKernel",
    "initializeKernel",
    "initializeSparseKernel",
    "preNeuronResetKernel",
    "preSynapseResetKernel",
];

/// Built-in RNG bindings installed into every kernel's root
/// substitution frame; bodies are chosen by scalar precision.
pub static DEVICE_FUNCTIONS: Lazy<Vec<FunctionTemplate>> = Lazy::new(|| {
    vec![
        FunctionTemplate {
            name: "gennrand_uniform",
            arity: 0,
            double_body: "uniform_double($(rng))",
            float_body: "uniform_clrngLfsr113($(rng))",
        },
        FunctionTemplate {
            name: "gennrand_normal",
            arity: 0,
            double_body: "normal_double($(rng))",
            float_body: "normal($(rng))",
        },
        FunctionTemplate {
            name: "gennrand_exponential",
            arity: 0,
            double_body: "exponentialDistDouble($(rng))",
            float_body: "exponentialDistFloat($(rng))",
        },
        FunctionTemplate {
            name: "gennrand_log_normal",
            arity: 2,
            double_body: "log_normal_double($(rng), $(0), $(1))",
            float_body: "log_normal_float($(rng), $(0), $(1))",
        },
        FunctionTemplate {
            name: "gennrand_gamma",
            arity: 1,
            double_body: "gammaDistDouble($(rng), $(0))",
            float_body: "gammaDistFloat($(rng), $(0))",
        },
    ]
});

pub fn ceil_divide(numerator: usize, denominator: usize) -> usize {
    (numerator + denominator - 1) / denominator
}

/// Round `size` up to a multiple of the workgroup size.
pub fn pad_size(size: usize, workgroup_size: usize) -> usize {
    ceil_divide(size, workgroup_size) * workgroup_size
}

/// The OpenCL backend: owns the configuration and the presynaptic
/// update strategy registry, and emits all device/host boilerplate that
/// is not specific to a single kernel program.
pub struct Backend {
    preferences: Preferences,
    strategies: Vec<Box<dyn PresynapticUpdateStrategy>>,
    registry_frozen: Cell<bool>,
}

impl Backend {
    pub fn new(preferences: Preferences) -> Backend {
        Backend {
            preferences,
            strategies: vec![Box::new(PreSpan), Box::new(PostSpan)],
            registry_frozen: Cell::new(false),
        }
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn workgroup_size(&self, kernel: Kernel) -> usize {
        self.preferences.workgroup_size(kernel)
    }

    pub fn scalar_precision(&self) -> ScalarType {
        self.preferences.scalar_precision
    }

    /// Register a presynaptic update strategy; later registrations take
    /// priority. Only permitted before the first emission.
    pub fn add_presynaptic_update_strategy(
        &mut self,
        strategy: Box<dyn PresynapticUpdateStrategy>,
    ) -> Result<(), BackendError> {
        if self.registry_frozen.get() {
            return Err(BackendError::RegistryFrozen);
        }
        self.strategies.push(strategy);
        Ok(())
    }

    /// Resolve the strategy for a synapse group by scanning the registry
    /// in reverse so user-registered strategies win.
    pub fn presynaptic_update_strategy(
        &self,
        model: &ModelSpec,
        sg: SynapseGroupId,
    ) -> Result<&dyn PresynapticUpdateStrategy, BackendError> {
        self.registry_frozen.set(true);
        for strategy in self.strategies.iter().rev() {
            if strategy.is_compatible(model, sg) {
                debug!(name = strategy.name(), group = %model.synapse_group(sg).name,
                       "selected presynaptic update strategy");
                return Ok(strategy.as_ref());
            }
        }
        Err(BackendError::NoCompatibleStrategy(model.synapse_group(sg).name.clone()))
    }

    pub fn num_presynaptic_update_threads(
        &self,
        model: &ModelSpec,
        sg: SynapseGroupId,
    ) -> Result<usize, BackendError> {
        Ok(self.presynaptic_update_strategy(model, sg)?.num_threads(model, sg))
    }

    pub fn num_postsynaptic_update_threads(&self, model: &ModelSpec, sg: SynapseGroupId) -> usize {
        let group = model.synapse_group(sg);
        if group.matrix_type.contains(crate::model::SynapseMatrixType::SPARSE) {
            group.max_col_length.unwrap_or(0) as usize
        } else {
            model.neuron_group(group.src).num_neurons as usize
        }
    }

    pub fn num_synapse_dynamics_threads(&self, model: &ModelSpec, sg: SynapseGroupId) -> usize {
        let group = model.synapse_group(sg);
        let src = model.neuron_group(group.src).num_neurons as usize;
        if group.matrix_type.contains(crate::model::SynapseMatrixType::SPARSE) {
            src * group.max_row_length.unwrap_or(0) as usize
        } else {
            src * model.neuron_group(group.trg).num_neurons as usize
        }
    }

    pub fn synaptic_matrix_row_stride(
        &self,
        model: &ModelSpec,
        sg: SynapseGroupId,
    ) -> Result<usize, BackendError> {
        Ok(self.presynaptic_update_strategy(model, sg)?.synaptic_matrix_row_stride(model, sg))
    }

    /// Name of the emitted atomic add helper for the given scalar type
    /// and memory space.
    pub fn float_atomic_add(&self, memory_type: &str) -> String {
        format!("atomic_add_f_{}", memory_type)
    }

    /// Emit a compare-and-swap float atomic add for one memory space.
    pub fn gen_atomic_add_float(
        &self,
        os: &mut CodeStream,
        model: &ModelSpec,
        memory_type: &str,
    ) -> Result<(), GeneratorError> {
        let scalar = model.precision.name();
        os.write(&format!(
            "void atomic_add_f_{mem}(volatile __{mem} {scalar} *source, const {scalar} operand)",
            mem = memory_type,
            scalar = scalar
        ));
        os.scope::<_, GeneratorError>(|os| {
            os.writeln(&format!("union {{ unsigned int intVal; {} floatVal; }} newVal;", scalar));
            os.writeln(&format!("union {{ unsigned int intVal; {} floatVal; }} prevVal;", scalar));
            os.write("do");
            os.scope::<_, GeneratorError>(|os| {
                os.writeln("prevVal.floatVal = *source;");
                os.writeln("newVal.floatVal = prevVal.floatVal + operand;");
                Ok(())
            })?;
            os.writeln(&format!(
                "while (atomic_cmpxchg((volatile __{} unsigned int *)source, prevVal.intVal, newVal.intVal) != prevVal.intVal);",
                memory_type
            ));
            Ok(())
        })?;
        os.blank_line();
        Ok(())
    }

    /// Scalar typedef, timestep constant and fixed-width integer aliases
    /// shared by every kernel program.
    pub fn gen_kernel_preamble(&self, os: &mut CodeStream, model: &ModelSpec) {
        os.writeln(&format!("typedef {} scalar;", model.precision.name()));
        os.writeln(&format!("#define DT {}", model.time_precision.literal(model.dt)));
        match model.time_precision {
            ScalarType::Float => {
                os.writeln("#define TIME_MIN 1.175494351e-38f");
                os.writeln("#define TIME_MAX 3.402823466e+38f");
            }
            ScalarType::Double => {
                os.writeln("#define TIME_MIN 2.22507e-308");
                os.writeln("#define TIME_MAX 1.79769e+308");
            }
        }
        os.writeln("// ------------------------------------------------------------------------");
        os.writeln("// C99 sized types");
        os.writeln("typedef uchar uint8_t;");
        os.writeln("typedef ushort uint16_t;");
        os.writeln("typedef uint uint32_t;");
        os.writeln("typedef char int8_t;");
        os.writeln("typedef short int16_t;");
        os.writeln("typedef int int32_t;");
    }

    /// Root substitution frame for a kernel body.
    pub fn kernel_substitutions(&self, model: &ModelSpec) -> Substitutions<'static> {
        Substitutions::with_functions(&DEVICE_FUNCTIONS, model.precision)
    }

    /// Reserve a slot in the shared-memory spike staging array. Suffix
    /// is empty for true spikes, `Evnt` for spike-like events.
    pub fn gen_emit_spike(
        &self,
        os: &mut CodeStream,
        subs: &Substitutions,
        suffix: &str,
    ) -> Result<(), GeneratorError> {
        let id = subs.var("id")?;
        os.writeln(&format!(
            "const unsigned int spk{suffix}Idx = atomic_add(&shSpk{suffix}Count, 1);",
            suffix = suffix
        ));
        os.writeln(&format!("shSpk{}[spk{}Idx] = {};", suffix, suffix, id));
        Ok(())
    }

    /// Emit the grid/block computation for a kernel launch.
    pub fn gen_kernel_dimensions(&self, os: &mut CodeStream, kernel: Kernel, num_threads: usize) {
        let wg = self.workgroup_size(kernel);
        let global = wg * ceil_divide(num_threads, wg);
        os.writeln(&format!("const cl::NDRange globalWorkSize({}, 1);", global));
        os.writeln(&format!("const cl::NDRange localWorkSize({}, 1);", wg));
    }

    /// Write a kernel program source as a chain of raw-string chunks of
    /// at most `part_length` characters, concatenated textually so host
    /// compilers never see an over-long literal.
    pub fn divide_kernel_stream_in_parts(
        &self,
        os: &mut CodeStream,
        kernel_code: &str,
        part_length: usize,
    ) {
        let chars: Vec<char> = kernel_code.chars().collect();
        for chunk in chars.chunks(part_length.max(1)) {
            let part: String = chunk.iter().collect();
            os.writeln(&format!("R\"({})\"", part));
        }
        if chars.is_empty() {
            os.writeln("R\"()\"");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_size_rounds_to_workgroup_multiple() {
        assert_eq!(pad_size(100, 32), 128);
        assert_eq!(pad_size(250, 32), 256);
        assert_eq!(pad_size(32, 32), 32);
        assert_eq!(pad_size(0, 32), 0);
    }

    #[test]
    fn kernel_source_is_split_into_chunks() {
        let backend = Backend::new(Preferences::default());
        let mut os = CodeStream::new();
        let src = "x".repeat(12_001);
        backend.divide_kernel_stream_in_parts(&mut os, &src, 5000);
        assert_eq!(os.str().matches("R\"(").count(), 3);
    }

    #[test]
    fn registry_freezes_after_first_resolution() {
        use crate::model::{ModelSpec, ScalarType};
        let model = ModelSpec::new("m", 0.1, ScalarType::Float, ScalarType::Float);
        let mut backend = Backend::new(Preferences::default());
        // Nothing resolved yet: registration is allowed.
        backend.add_presynaptic_update_strategy(Box::new(PostSpan)).unwrap();
        backend.registry_frozen.set(true);
        let err = backend.add_presynaptic_update_strategy(Box::new(PostSpan)).unwrap_err();
        assert!(matches!(err, BackendError::RegistryFrozen));
        let _ = model;
    }
}
