use crate::error::GeneratorError;
use crate::merger::fields::collect_param_folds;
use crate::model::{ModelSpec, ScalarType};
use crate::substitution::Substitutions;

/// Install parameter substitutions, constant-folding values that agree
/// across every member of the merged group and referencing struct
/// fields otherwise. `suffix` must match the field suffix used by the
/// merged-struct layout.
pub fn add_folded_param_substitutions(
    subs: &mut Substitutions,
    names: &[String],
    suffix: &str,
    values_per_member: &[Vec<f64>],
    precision: ScalarType,
) -> Result<(), GeneratorError> {
    for (name, fold) in collect_param_folds(names, suffix, values_per_member, precision) {
        subs.add_var_substitution(&name, fold.replacement())?;
    }
    Ok(())
}

/// Collect one numeric attribute across the members of a merged group.
pub fn member_values<Id: Copy, T>(
    model: &ModelSpec,
    members: &[Id],
    get: impl Fn(&ModelSpec, Id) -> T,
) -> Vec<T> {
    members.iter().map(|id| get(model, *id)).collect()
}
