use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Floating point precision of generated scalar state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarType {
    Float,
    Double,
}

impl ScalarType {
    /// Device-language type name.
    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Float => "float",
            ScalarType::Double => "double",
        }
    }

    /// Format a numeric literal with the right suffix for this
    /// precision.
    pub fn literal(self, value: f64) -> String {
        let mut s = if value == value.trunc() && value.abs() < 1.0e15 {
            format!("{:.1}", value)
        } else {
            format!("{}", value)
        };
        if self == ScalarType::Float {
            s.push('f');
        }
        s
    }
}

bitflags! {
    /// Where a variable lives; devices buffers are prefixed `d_`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VarLocation: u8 {
        const HOST = 1 << 0;
        const DEVICE = 1 << 1;
        const ZERO_COPY = 1 << 2;
    }
}

impl VarLocation {
    pub const HOST_DEVICE: VarLocation = VarLocation::HOST.union(VarLocation::DEVICE);
}

impl Default for VarLocation {
    fn default() -> Self {
        VarLocation::HOST_DEVICE
    }
}

bitflags! {
    /// Connectivity and weight representation of a synapse group.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SynapseMatrixType: u32 {
        // Connectivity
        const DENSE = 1 << 0;
        const SPARSE = 1 << 1;
        const BITMASK = 1 << 2;
        const PROCEDURAL = 1 << 3;
        // Weight
        const GLOBAL_G = 1 << 4;
        const INDIVIDUAL_G = 1 << 5;
        const INDIVIDUAL_PSM = 1 << 6;
    }
}

impl SynapseMatrixType {
    pub const DENSE_INDIVIDUALG: SynapseMatrixType =
        SynapseMatrixType::DENSE.union(SynapseMatrixType::INDIVIDUAL_G).union(SynapseMatrixType::INDIVIDUAL_PSM);
    pub const DENSE_GLOBALG: SynapseMatrixType =
        SynapseMatrixType::DENSE.union(SynapseMatrixType::GLOBAL_G);
    pub const SPARSE_INDIVIDUALG: SynapseMatrixType =
        SynapseMatrixType::SPARSE.union(SynapseMatrixType::INDIVIDUAL_G).union(SynapseMatrixType::INDIVIDUAL_PSM);
    pub const SPARSE_GLOBALG: SynapseMatrixType =
        SynapseMatrixType::SPARSE.union(SynapseMatrixType::GLOBAL_G);
    pub const BITMASK_GLOBALG: SynapseMatrixType =
        SynapseMatrixType::BITMASK.union(SynapseMatrixType::GLOBAL_G);
}

/// Which population axis a presynaptic update parallelises over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanType {
    Presynaptic,
    Postsynaptic,
}

/// A state variable: name, device type and storage location.
#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub name: String,
    pub ty: String,
    pub location: VarLocation,
}

impl Var {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Var {
        Var { name: name.into(), ty: ty.into(), location: VarLocation::HOST_DEVICE }
    }
}

/// Everything needed to initialise one variable on device: a code
/// snippet writing `$(value)`, and the snippet's parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct VarInit {
    pub code: String,
    pub param_names: Vec<String>,
    pub params: Vec<f64>,
}

impl VarInit {
    /// Initialise to a constant.
    pub fn constant(value: f64) -> VarInit {
        VarInit {
            code: "$(value) = $(constant);".to_string(),
            param_names: vec!["constant".to_string()],
            params: vec![value],
        }
    }

    /// Snippet with no parameters.
    pub fn code(code: impl Into<String>) -> VarInit {
        VarInit { code: code.into(), param_names: Vec::new(), params: Vec::new() }
    }

    /// Leave the variable uninitialised on device.
    pub fn uninitialised() -> VarInit {
        VarInit { code: String::new(), param_names: Vec::new(), params: Vec::new() }
    }

    /// Structural equality ignoring parameter values; merge decisions
    /// must not depend on numbers that become struct fields.
    pub fn can_merge_with(&self, other: &VarInit) -> bool {
        self.code == other.code && self.param_names == other.param_names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_suffix_tracks_precision() {
        assert_eq!(ScalarType::Float.literal(0.0), "0.0f");
        assert_eq!(ScalarType::Double.literal(0.25), "0.25");
        assert_eq!(ScalarType::Float.literal(-65.0), "-65.0f");
    }

    #[test]
    fn matrix_type_combinations() {
        assert!(SynapseMatrixType::SPARSE_INDIVIDUALG.contains(SynapseMatrixType::SPARSE));
        assert!(SynapseMatrixType::SPARSE_INDIVIDUALG.contains(SynapseMatrixType::INDIVIDUAL_PSM));
        assert!(!SynapseMatrixType::DENSE_GLOBALG.contains(SynapseMatrixType::INDIVIDUAL_G));
    }
}
