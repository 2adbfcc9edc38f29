//! Tool-usage aggregation: totals, per-project breakdowns, and the
//! consecutive pair/sequence rankings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::analytics::{ConversationSlice, NamedCount, top_n};

/// How many top pairs / top sequences the snapshot keeps.
const TOP_PAIRS: usize = 10;
const TOP_SEQUENCES: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUsage {
    pub total: u64,
    pub by_tool: BTreeMap<String, u64>,
    pub by_project: BTreeMap<String, BTreeMap<String, u64>>,
    /// Top unordered pairs of consecutively used tools.
    pub combinations: Vec<NamedCount>,
    /// Top ordered triples of consecutively used tools.
    pub top_sequences: Vec<NamedCount>,
}

/// Key for an unordered consecutive pair: sorted names joined with `" + "`.
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a} + {b}")
    } else {
        format!("{b} + {a}")
    }
}

/// Key for an ordered consecutive triple, joined with `" → "`.
pub fn triple_key(a: &str, b: &str, c: &str) -> String {
    format!("{a} → {b} → {c}")
}

impl ToolUsage {
    pub fn build<'a, I>(slices: I) -> ToolUsage
    where
        I: IntoIterator<Item = &'a ConversationSlice>,
    {
        let mut out = ToolUsage::default();
        let mut pairs: BTreeMap<String, u64> = BTreeMap::new();
        let mut triples: BTreeMap<String, u64> = BTreeMap::new();

        for slice in slices {
            out.total += slice.tool_total;
            for (tool, count) in &slice.tool_counts {
                *out.by_tool.entry(tool.clone()).or_insert(0) += count;
                if !slice.project.is_empty() {
                    *out.by_project
                        .entry(slice.project.clone())
                        .or_default()
                        .entry(tool.clone())
                        .or_insert(0) += count;
                }
            }
            for (key, count) in &slice.pair_counts {
                *pairs.entry(key.clone()).or_insert(0) += count;
            }
            for (key, count) in &slice.triple_counts {
                *triples.entry(key.clone()).or_insert(0) += count;
            }
        }

        out.combinations = top_n(&pairs, TOP_PAIRS);
        out.top_sequences = top_n(&triples, TOP_SEQUENCES);
        out
    }
}
