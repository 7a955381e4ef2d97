//! Grounding context assembly.

use parley_core::types::Fragment;

/// Formats retrieved fragments into the context block of the answer prompt.
///
/// Each fragment is wrapped in `<doc>` tags and the blocks are joined with
/// newlines in ranking order. An empty input yields an empty string.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextAssembler;

impl ContextAssembler {
    pub fn assemble(&self, fragments: &[Fragment]) -> String {
        fragments
            .iter()
            .map(|fragment| format!("<doc>\n{}\n</doc>", fragment.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
