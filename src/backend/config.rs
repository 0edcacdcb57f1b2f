use serde::{Deserialize, Serialize};

use crate::model::ScalarType;

use super::backend::{Kernel, KERNEL_COUNT};

/// Generator configuration. Workgroup sizes are per kernel role; the
/// device is addressed by platform/device index, resolved by the
/// emitted host code at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    pub workgroup_sizes: [usize; KERNEL_COUNT],
    pub scalar_precision: ScalarType,
    pub time_precision: ScalarType,
    pub platform_index: usize,
    pub device_index: usize,
    /// Device buffers alias host memory; no push/pull bodies are
    /// emitted.
    pub automatic_copy: bool,
}

impl Preferences {
    pub fn workgroup_size(&self, kernel: Kernel) -> usize {
        self.workgroup_sizes[kernel as usize]
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            workgroup_sizes: [32; KERNEL_COUNT],
            scalar_precision: ScalarType::Float,
            time_precision: ScalarType::Float,
            platform_index: 0,
            device_index: 0,
            automatic_copy: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preferences_round_trip_through_json() {
        let mut prefs = Preferences::default();
        prefs.workgroup_sizes[Kernel::NeuronUpdate as usize] = 64;
        prefs.scalar_precision = ScalarType::Double;

        let json = serde_json::to_string(&prefs).unwrap();
        let back: Preferences = serde_json::from_str(&json).unwrap();
        assert_eq!(back.workgroup_size(Kernel::NeuronUpdate), 64);
        assert_eq!(back.scalar_precision, ScalarType::Double);
        assert!(!back.automatic_copy);
    }
}
