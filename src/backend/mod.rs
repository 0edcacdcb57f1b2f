pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod launcher;
pub mod strategy;

pub use backend::{Backend, Kernel, KERNEL_NAMES};
pub use config::Preferences;
pub use error::BackendError;
pub use strategy::{PostSpan, PreSpan, PresynapticUpdateStrategy};
