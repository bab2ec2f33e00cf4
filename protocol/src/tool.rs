//! Tool-class allow-lists (`spec.md` §6 "Tool-class allow-lists
//! (authoritative)"). The mapping below is the sole source of truth for
//! "is this tool exposed" — code, not configuration, per the spec's
//! insistence that the router never dispatch a tool absent from it
//! regardless of what the planner names.

use std::collections::HashSet;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolClass {
    Cpu,
    Gpu,
}

impl ToolClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolClass::Cpu => "cpu",
            ToolClass::Gpu => "gpu",
        }
    }
}

impl std::fmt::Display for ToolClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const CPU_TOOLS: &[&str] = &[
    "parse_score",
    "preprocess_voice_parts",
    "phonemize",
    "align_phonemes_to_notes",
    "list_voicebanks",
    "get_voicebank_info",
    "estimate_credits",
];

const GPU_TOOLS: &[&str] = &[
    "predict_durations",
    "predict_pitch",
    "predict_variance",
    "synthesize_audio",
    "synthesize",
    "save_audio",
];

/// Never exposed to the planner under any circumstance, even though a
/// worker may genuinely implement them (`spec.md` §6, §4.7).
pub const NEVER_EXPOSED: &[&str] = &["modify_score", "synthesize_mel", "vocode"];

/// Tools whose side effects are not safe to retry (`spec.md` §4.3).
pub const NON_IDEMPOTENT: &[&str] = &["save_audio", "persist_transformed_score"];

/// The long-running tool that triggers the background job workflow
/// (`spec.md` §4.7 step f).
pub const SYNTHESIZE_TOOL: &str = "synthesize";
pub const ESTIMATE_TOOL: &str = "estimate_credits";

fn classify_map() -> &'static std::collections::HashMap<&'static str, ToolClass> {
    static MAP: OnceLock<std::collections::HashMap<&'static str, ToolClass>> = OnceLock::new();
    MAP.get_or_init(|| {
        let mut m = std::collections::HashMap::new();
        for t in CPU_TOOLS {
            m.insert(*t, ToolClass::Cpu);
        }
        for t in GPU_TOOLS {
            m.insert(*t, ToolClass::Gpu);
        }
        m
    })
}

fn never_exposed_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| NEVER_EXPOSED.iter().copied().collect())
}

fn non_idempotent_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| NON_IDEMPOTENT.iter().copied().collect())
}

/// Authoritative lookup: resolves a tool name to the worker class that
/// serves it, or `None` if the tool is not routed at all.
pub fn classify(tool: &str) -> Option<ToolClass> {
    classify_map().get(tool).copied()
}

/// A tool is part of the planner-visible public catalog iff it is routed
/// *and* not explicitly blocked.
pub fn is_public(tool: &str) -> bool {
    !never_exposed_set().contains(tool) && classify(tool).is_some()
}

pub fn is_non_idempotent(tool: &str) -> bool {
    non_idempotent_set().contains(tool)
}

/// The full public tool catalog, for seeding the planner's tool list
/// (`spec.md` §4.7 step 3).
pub fn public_tool_names() -> Vec<&'static str> {
    CPU_TOOLS
        .iter()
        .chain(GPU_TOOLS.iter())
        .copied()
        .filter(|t| is_public(t))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exposed_tools_are_not_public_even_if_routed() {
        assert!(!is_public("modify_score"));
        assert!(!is_public("synthesize_mel"));
        assert!(!is_public("vocode"));
    }

    #[test]
    fn unrouted_tool_is_neither_classified_nor_public() {
        assert_eq!(classify("totally_unknown_tool"), None);
        assert!(!is_public("totally_unknown_tool"));
    }

    #[test]
    fn cpu_and_gpu_tools_classify_correctly() {
        assert_eq!(classify("parse_score"), Some(ToolClass::Cpu));
        assert_eq!(classify("synthesize_audio"), Some(ToolClass::Gpu));
    }

    #[test]
    fn non_idempotent_tools_flagged() {
        assert!(is_non_idempotent("save_audio"));
        assert!(is_non_idempotent("persist_transformed_score"));
        assert!(!is_non_idempotent("parse_score"));
    }

    #[test]
    fn public_catalog_excludes_blocked_tools() {
        let names = public_tool_names();
        assert!(names.contains(&"parse_score"));
        assert!(names.contains(&"synthesize"));
        assert!(!names.contains(&"modify_score"));
    }
}
