use std::collections::BTreeMap;

use super::SubstitutionError;
use crate::model::ScalarType;

/// A named device function with precision-specific bodies. Bodies use
/// `$(0)`..`$(n-1)` argument placeholders.
#[derive(Debug, Clone)]
pub struct FunctionTemplate {
    pub name: &'static str,
    pub arity: usize,
    pub double_body: &'static str,
    pub float_body: &'static str,
}

#[derive(Debug, Clone)]
struct FuncSubstitution {
    arity: usize,
    body: String,
}

/// One frame of the substitution stack: variable and function templates
/// plus a read-only link to the parent frame. Lookup walks the parent
/// chain; a frame never mutates its parent.
pub struct Substitutions<'p> {
    vars: BTreeMap<String, String>,
    funcs: BTreeMap<String, FuncSubstitution>,
    parent: Option<&'p Substitutions<'p>>,
}

impl<'p> Substitutions<'p> {
    pub fn new() -> Substitutions<'static> {
        Substitutions { vars: BTreeMap::new(), funcs: BTreeMap::new(), parent: None }
    }

    /// Root kernel frame: installs the given device function templates,
    /// choosing each body by scalar precision.
    pub fn with_functions(
        templates: &[FunctionTemplate],
        precision: ScalarType,
    ) -> Substitutions<'static> {
        let mut subs = Substitutions::new();
        for t in templates {
            let body = match precision {
                ScalarType::Double => t.double_body,
                ScalarType::Float => t.float_body,
            };
            subs.funcs.insert(
                t.name.to_string(),
                FuncSubstitution { arity: t.arity, body: body.to_string() },
            );
        }
        subs
    }

    pub fn with_parent(parent: &'p Substitutions<'p>) -> Substitutions<'p> {
        Substitutions { vars: BTreeMap::new(), funcs: BTreeMap::new(), parent: Some(parent) }
    }

    pub fn add_var_substitution(
        &mut self,
        name: &str,
        replacement: impl Into<String>,
    ) -> Result<(), SubstitutionError> {
        if self.vars.contains_key(name) {
            return Err(SubstitutionError::DuplicateVariable(name.to_string()));
        }
        self.vars.insert(name.to_string(), replacement.into());
        Ok(())
    }

    /// Like `add_var_substitution` but allowed to shadow a definition in
    /// this frame.
    pub fn override_var_substitution(&mut self, name: &str, replacement: impl Into<String>) {
        self.vars.insert(name.to_string(), replacement.into());
    }

    pub fn add_func_substitution(
        &mut self,
        name: &str,
        arity: usize,
        body: impl Into<String>,
    ) -> Result<(), SubstitutionError> {
        if self.funcs.contains_key(name) {
            return Err(SubstitutionError::DuplicateFunction(name.to_string()));
        }
        self.funcs.insert(name.to_string(), FuncSubstitution { arity, body: body.into() });
        Ok(())
    }

    pub fn has_var_substitution(&self, name: &str) -> bool {
        self.lookup_var(name).is_some()
    }

    /// Resolve a variable, walking the parent chain.
    pub fn var(&self, name: &str) -> Result<&str, SubstitutionError> {
        self.lookup_var(name).ok_or_else(|| SubstitutionError::Undefined(name.to_string()))
    }

    fn lookup_var(&self, name: &str) -> Option<&str> {
        match self.vars.get(name) {
            Some(v) => Some(v.as_str()),
            None => self.parent.and_then(|p| p.lookup_var(name)),
        }
    }

    fn lookup_func(&self, name: &str) -> Option<&FuncSubstitution> {
        match self.funcs.get(name) {
            Some(f) => Some(f),
            None => self.parent.and_then(|p| p.lookup_func(name)),
        }
    }

    /// One pass of substitution over `code`, leftmost token first.
    ///
    /// `$(name, …)` resolves through the function table, `$(name)`
    /// through the variable table (falling back to zero-arity
    /// functions). Function arguments are recursively substituted
    /// before being spliced into the template; spliced replacement text
    /// is not re-scanned, except that function bodies receive a single
    /// variable-only pass so frame bindings such as `$(rng)` resolve.
    /// Tokens that resolve to nothing are left in place for the audit.
    pub fn apply(&self, code: &str) -> String {
        let bytes = code.as_bytes();
        let mut out = String::new();
        let mut i = 0;

        while let Some(found) = code[i..].find("$(") {
            let start = i + found;
            out.push_str(&code[i..start]);

            let name_start = start + 2;
            let mut j = name_start;
            while j < bytes.len() && is_name_byte(bytes[j]) {
                j += 1;
            }
            let name = &code[name_start..j];

            if j < bytes.len() && bytes[j] == b',' {
                // Call syntax: function names take priority here.
                if let Some(func) = self.lookup_func(name) {
                    if let Some((args, end)) = parse_args(code, j + 1) {
                        if args.len() == func.arity {
                            let args: Vec<String> =
                                args.iter().map(|a| self.apply(a.trim())).collect();
                            out.push_str(&self.splice(&func.body, &args));
                            i = end;
                            continue;
                        }
                    }
                }
                // Unknown function or arity mismatch: emit the head and
                // keep scanning so nested tokens in the arguments still
                // get substituted.
                out.push_str("$(");
                out.push_str(name);
                i = j;
                continue;
            }

            if j < bytes.len() && bytes[j] == b')' {
                if let Some(v) = self.lookup_var(name) {
                    out.push_str(v);
                    i = j + 1;
                    continue;
                }
                // Zero-arity function fallback.
                if let Some(func) = self.lookup_func(name) {
                    if func.arity == 0 {
                        out.push_str(&self.splice(&func.body, &[]));
                        i = j + 1;
                        continue;
                    }
                }
                // Unresolved: copy the token verbatim.
                out.push_str(&code[start..j + 1]);
                i = j + 1;
                continue;
            }

            // Malformed token: copy the opener and move on.
            out.push_str("$(");
            i = name_start;
        }

        out.push_str(&code[i..]);
        out
    }

    /// Apply, then fail on any residual `$(…)` token.
    pub fn apply_check_unreplaced(
        &self,
        code: &str,
        context: &str,
    ) -> Result<String, SubstitutionError> {
        let applied = self.apply(code);
        check_unreplaced_variables(&applied, context)?;
        Ok(applied)
    }

    fn splice(&self, body: &str, args: &[String]) -> String {
        let mut text = body.to_string();
        for (k, arg) in args.iter().enumerate() {
            text = text.replace(&format!("$({})", k), arg);
        }
        // Variable-only pass over the template body.
        let mut out = String::new();
        let bytes = text.as_bytes();
        let mut i = 0;
        while let Some(found) = text[i..].find("$(") {
            let start = i + found;
            out.push_str(&text[i..start]);
            let name_start = start + 2;
            let mut j = name_start;
            while j < bytes.len() && is_name_byte(bytes[j]) {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b')' {
                if let Some(v) = self.lookup_var(&text[name_start..j]) {
                    out.push_str(v);
                    i = j + 1;
                    continue;
                }
            }
            out.push_str("$(");
            i = name_start;
        }
        out.push_str(&text[i..]);
        out
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Parse call arguments starting just after the first comma; returns the
/// raw argument slices and the index one past the closing parenthesis.
/// Commas only separate at the top nesting level.
fn parse_args(code: &str, from: usize) -> Option<(Vec<&str>, usize)> {
    let bytes = code.as_bytes();
    let mut depth = 0usize;
    let mut args = Vec::new();
    let mut arg_start = from;
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => {
                if depth == 0 {
                    args.push(&code[arg_start..i]);
                    return Some((args, i + 1));
                }
                depth -= 1;
            }
            b',' if depth == 0 => {
                args.push(&code[arg_start..i]);
                arg_start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Scan emitted code for any residual `$(…)` token and report the first
/// one with its context.
pub fn check_unreplaced_variables(code: &str, context: &str) -> Result<(), SubstitutionError> {
    if let Some(start) = code.find("$(") {
        let rest = &code[start..];
        let token: String = match rest.find(')') {
            Some(end) => rest[..end + 1].to_string(),
            None => rest.chars().take(32).collect(),
        };
        return Err(SubstitutionError::Unreplaced { context: context.to_string(), token });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_substitution() {
        let mut subs = Substitutions::new();
        subs.add_var_substitution("id", "lid").unwrap();
        assert_eq!(subs.apply("V[$(id)] += $(id);"), "V[lid] += lid;");
    }

    #[test]
    fn child_frame_shadows_parent() {
        let mut parent = Substitutions::new();
        parent.add_var_substitution("id", "id").unwrap();
        let mut child = Substitutions::with_parent(&parent);
        child.add_var_substitution("id", "n").unwrap();
        assert_eq!(child.apply("$(id)"), "n");
        assert_eq!(parent.apply("$(id)"), "id");
    }

    #[test]
    fn function_substitution_with_nested_args() {
        let mut subs = Substitutions::new();
        subs.add_var_substitution("id_pre", "i").unwrap();
        subs.add_func_substitution("addSynapse", 1, "ind[rowLength[i]++] = $(0)").unwrap();
        assert_eq!(subs.apply("$(addSynapse, $(id_pre));"), "ind[rowLength[i]++] = i;");
    }

    #[test]
    fn replacement_is_not_rescanned() {
        let mut subs = Substitutions::new();
        subs.add_var_substitution("a", "$(b)").unwrap();
        subs.add_var_substitution("b", "x").unwrap();
        // Single pass: the spliced $(b) is left alone.
        assert_eq!(subs.apply("$(a)"), "$(b)");
    }

    #[test]
    fn commas_nest_inside_parentheses() {
        let mut subs = Substitutions::new();
        subs.add_func_substitution("f", 2, "g($(0), $(1))").unwrap();
        assert_eq!(subs.apply("$(f, h(1, 2), 3)"), "g(h(1, 2), 3)");
    }

    #[test]
    fn unresolved_token_is_preserved_and_audited() {
        let subs = Substitutions::new();
        let applied = subs.apply("x = $(missing);");
        assert_eq!(applied, "x = $(missing);");
        let err = check_unreplaced_variables(&applied, "Pop1 : simCode").unwrap_err();
        match err {
            SubstitutionError::Unreplaced { context, token } => {
                assert_eq!(context, "Pop1 : simCode");
                assert_eq!(token, "$(missing)");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn duplicate_in_same_frame_rejected() {
        let mut subs = Substitutions::new();
        subs.add_var_substitution("id", "a").unwrap();
        assert!(subs.add_var_substitution("id", "b").is_err());
        subs.override_var_substitution("id", "b");
        assert_eq!(subs.apply("$(id)"), "b");
    }

    #[test]
    fn zero_arity_function_resolves_without_comma() {
        let mut subs = Substitutions::new();
        subs.add_var_substitution("rng", "&group->rng[lid]").unwrap();
        subs.add_func_substitution("gennrand_uniform", 0, "uniform($(rng))").unwrap();
        assert_eq!(subs.apply("const scalar u = $(gennrand_uniform);"),
                   "const scalar u = uniform(&group->rng[lid]);");
    }
}
