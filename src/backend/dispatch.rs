use crate::codestream::CodeStream;
use crate::error::GeneratorError;
use crate::merger::{MergedNeuronGroup, MergedSynapseGroup};
use crate::substitution::Substitutions;

/// What the dispatcher needs to know about a merged group.
pub trait DispatchableGroup {
    fn index(&self) -> usize;
    fn prefix(&self) -> &'static str;
    fn num_members(&self) -> usize;
}

impl DispatchableGroup for MergedNeuronGroup {
    fn index(&self) -> usize {
        self.index
    }
    fn prefix(&self) -> &'static str {
        self.role.prefix()
    }
    fn num_members(&self) -> usize {
        self.groups.len()
    }
}

impl DispatchableGroup for MergedSynapseGroup {
    fn index(&self) -> usize {
        self.index
    }
    fn prefix(&self) -> &'static str {
        self.role.prefix()
    }
    fn num_members(&self) -> usize {
        self.groups.len()
    }
}

/// Emit the thread-id routing ladder for a list of merged groups.
///
/// Each merged group gets one contiguous range `[start, start+pad)`
/// where `pad` is the sum of its members' padded sizes; the first group
/// elides the lower bound. Inside the branch a per-member ladder picks
/// the `group` struct pointer and the member's start id, and the
/// handler runs in a child substitution frame whose `id` is the local
/// id. `id_start` advances by the padded size, so ranges are contiguous
/// and disjoint and the final value is the kernel's global thread
/// count.
pub fn gen_parallel_group<M: DispatchableGroup>(
    os: &mut CodeStream,
    kernel_subs: &Substitutions,
    merged_groups: &[M],
    id_start: &mut usize,
    padded_member_sizes: &dyn Fn(&M) -> Vec<usize>,
    handler: &mut dyn FnMut(&mut CodeStream, &M, &mut Substitutions) -> Result<(), GeneratorError>,
) -> Result<(), GeneratorError> {
    for merged in merged_groups {
        let member_sizes = padded_member_sizes(merged);
        debug_assert_eq!(member_sizes.len(), merged.num_members());
        let group_start = *id_start;
        let pad: usize = member_sizes.iter().sum();

        os.writeln(&format!("// merged{}Group{}", merged.prefix(), merged.index()));
        if group_start == 0 {
            os.write(&format!("if(id < {})", pad));
        } else {
            os.write(&format!("if(id >= {} && id < {})", group_start, group_start + pad));
        }
        os.scope::<_, GeneratorError>(|os| {
            let struct_name = format!("Merged{}Group{}", merged.prefix(), merged.index());
            let array_name = format!("d_merged{}Group{}", merged.prefix(), merged.index());
            let start_array = format!("d_merged{}GroupStartID{}", merged.prefix(), merged.index());

            let mut pop_subs = Substitutions::with_parent(kernel_subs);
            if merged.num_members() == 1 {
                os.writeln(&format!(
                    "__global struct {} *group = &{}[0];",
                    struct_name, array_name
                ));
                if group_start == 0 {
                    pop_subs.add_var_substitution("id", "id")?;
                } else {
                    os.writeln(&format!("const unsigned int lid = id - {};", group_start));
                    pop_subs.add_var_substitution("id", "lid")?;
                }
            } else {
                os.writeln("unsigned int groupStartID;");
                os.writeln(&format!("__global struct {} *group;", struct_name));
                let mut member_start = group_start;
                for (k, size) in member_sizes.iter().enumerate() {
                    if member_start == 0 {
                        os.write(&format!("if(id < {})", size));
                    } else {
                        os.write(&format!(
                            "if(id >= {} && id < {})",
                            member_start,
                            member_start + size
                        ));
                    }
                    os.scope::<_, GeneratorError>(|os| {
                        os.writeln(&format!("group = &{}[{}];", array_name, k));
                        os.writeln(&format!("groupStartID = {}[{}];", start_array, k));
                        Ok(())
                    })?;
                    member_start += size;
                }
                os.writeln("const unsigned int lid = id - groupStartID;");
                pop_subs.add_var_substitution("id", "lid")?;
            }

            handler(os, merged, &mut pop_subs)
        })?;
        os.blank_line();

        *id_start += pad;
    }
    Ok(())
}

/// One-thread-per-member dispatch used by the reset kernels: thread `k`
/// within the merged group's range handles member `k` directly.
pub fn gen_per_member_group<M: DispatchableGroup>(
    os: &mut CodeStream,
    merged_groups: &[M],
    id_start: &mut usize,
    handler: &mut dyn FnMut(&mut CodeStream, &M) -> Result<(), GeneratorError>,
) -> Result<(), GeneratorError> {
    for merged in merged_groups {
        let group_start = *id_start;
        let members = merged.num_members();

        os.writeln(&format!("// merged{}Group{}", merged.prefix(), merged.index()));
        if group_start == 0 {
            os.write(&format!("if(id < {})", members));
        } else {
            os.write(&format!("if(id >= {} && id < {})", group_start, group_start + members));
        }
        os.scope::<_, GeneratorError>(|os| {
            let struct_name = format!("Merged{}Group{}", merged.prefix(), merged.index());
            let array_name = format!("d_merged{}Group{}", merged.prefix(), merged.index());
            os.writeln(&format!(
                "__global struct {} *group = &{}[id - {}];",
                struct_name, array_name, group_start
            ));
            handler(os, merged)
        })?;
        *id_start += members;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merger::NeuronRole;
    use crate::model::NeuronGroupId;

    fn merged(index: usize, members: usize) -> MergedNeuronGroup {
        MergedNeuronGroup {
            index,
            role: NeuronRole::Update,
            groups: (0..members).map(NeuronGroupId).collect(),
        }
    }

    #[test]
    fn ranges_are_contiguous_and_disjoint() {
        let groups = vec![merged(0, 1), merged(1, 2)];
        let mut os = CodeStream::new();
        let subs = Substitutions::new();
        let mut id_start = 0;
        gen_parallel_group(
            &mut os,
            &subs,
            &groups,
            &mut id_start,
            &|m: &MergedNeuronGroup| vec![128; m.num_members()],
            &mut |os, _, subs| {
                os.writeln(&format!("work({});", subs.var("id")?));
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(id_start, 384, "total padded size covers all members");
        let text = os.str();
        assert!(text.contains("if(id < 128)"));
        assert!(text.contains("if(id >= 128 && id < 384)"));
        assert!(text.contains("const unsigned int lid = id - groupStartID;"));
    }
}
