//! # spikegen
//!
//! Compiles a declarative spiking-neural-network model into OpenCL
//! kernel source text and the host code that builds and launches it.
//!
//! The pipeline merges structurally identical neuron and synapse groups
//! into equivalence classes so one kernel branch serves many
//! populations through an indexed struct-of-arrays, assigns each merged
//! group a contiguous range of thread ids, and expands user-supplied
//! code snippets through a scoped `$(name)` substitution stack. The
//! generator itself never compiles or launches anything; it emits two
//! deterministic text streams per kernel program.

pub mod backend;
pub mod codestream;
pub mod error;
pub mod kernels;
pub mod merger;
pub mod model;
pub mod substitution;

pub use backend::{Backend, Preferences};
pub use error::GeneratorError;
pub use kernels::{generate, GeneratedModel, GeneratedModule};
pub use merger::ModelMerged;
pub use model::ModelSpec;
