use crate::codestream::CodeStream;

/// Deduplicated user support-code blocks, each wrapped in a namespace so
/// identical code emitted for several groups exists once per kernel
/// program.
#[derive(Debug, Clone)]
pub struct SupportCodeMerged {
    prefix: String,
    codes: Vec<String>,
}

impl SupportCodeMerged {
    pub fn new(prefix: impl Into<String>) -> SupportCodeMerged {
        SupportCodeMerged { prefix: prefix.into(), codes: Vec::new() }
    }

    /// Register a support-code block; empty blocks and duplicates are
    /// ignored.
    pub fn add_support_code(&mut self, code: &str) {
        if !code.is_empty() && !self.codes.iter().any(|c| c == code) {
            self.codes.push(code.to_string());
        }
    }

    /// Namespace assigned to a previously registered block.
    pub fn support_code_namespace(&self, code: &str) -> Option<String> {
        self.codes.iter().position(|c| c == code).map(|i| format!("{}{}", self.prefix, i))
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Emit every namespace block.
    pub fn gen(&self, os: &mut CodeStream) {
        for (i, code) in self.codes.iter().enumerate() {
            os.writeln(&format!("namespace {}{} ", self.prefix, i));
            os.writeln("{");
            os.writeln(code);
            os.writeln("}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_blocks_share_a_namespace() {
        let mut sc = SupportCodeMerged::new("NeuronUpdateSupportCode");
        sc.add_support_code("scalar clip(scalar x) { return x; }");
        sc.add_support_code("scalar clip(scalar x) { return x; }");
        sc.add_support_code("scalar other(scalar x) { return -x; }");

        assert_eq!(
            sc.support_code_namespace("scalar clip(scalar x) { return x; }").as_deref(),
            Some("NeuronUpdateSupportCode0")
        );
        assert_eq!(
            sc.support_code_namespace("scalar other(scalar x) { return -x; }").as_deref(),
            Some("NeuronUpdateSupportCode1")
        );

        let mut os = CodeStream::new();
        sc.gen(&mut os);
        assert_eq!(os.str().matches("namespace").count(), 2);
    }
}
