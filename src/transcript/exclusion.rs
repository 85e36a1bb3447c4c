//! Decides whether a conversation may enter the search index.

use serde::Serialize;

use super::Exchange;
use crate::config::IndexingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusion {
    Included,
    /// The literal exclusion sentinel appears somewhere in the conversation.
    Marker,
    /// The conversation is a summary-generation run for this archive.
    SummaryPrompt,
}

impl Exclusion {
    pub fn is_excluded(self) -> bool {
        self != Exclusion::Included
    }
}

/// Literal strings the detector looks for. Matching is verbatim and
/// case-sensitive; nothing here is interpreted as a pattern.
#[derive(Debug, Clone)]
pub struct ExclusionRules {
    pub marker: String,
    pub summary_markers: Vec<String>,
}

impl ExclusionRules {
    pub fn from_config(config: &IndexingConfig) -> Self {
        Self {
            marker: config.exclusion_marker.clone(),
            summary_markers: config
                .summary_markers
                .iter()
                .filter(|m| !m.is_empty())
                .cloned()
                .collect(),
        }
    }
}

impl Default for ExclusionRules {
    fn default() -> Self {
        Self::from_config(&IndexingConfig::default())
    }
}

/// Check decoded exchange text first, then the raw bytes so markers in
/// positions the parser never extracts (tool results, reasoning, unknown
/// records) still count.
pub fn detect(exchanges: &[Exchange], raw: &[u8], rules: &ExclusionRules) -> Exclusion {
    if !rules.marker.is_empty() {
        let in_text = exchanges.iter().any(|e| {
            e.user_message.contains(&rules.marker) || e.assistant_message.contains(&rules.marker)
        });
        if in_text || contains_bytes(raw, rules.marker.as_bytes()) {
            return Exclusion::Marker;
        }
    }

    if let Some(first) = exchanges.first() {
        if rules
            .summary_markers
            .iter()
            .any(|m| first.user_message.contains(m.as_str()))
        {
            return Exclusion::SummaryPrompt;
        }
    }

    Exclusion::Included
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && needle.len() <= haystack.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}
