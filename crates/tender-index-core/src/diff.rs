//! Shadow-diff summaries and similarity scoring.
//!
//! When a capability runs in SHADOW mode, the legacy and new outputs are
//! reduced to bounded [`Summary`] values and compared offline. Summaries
//! are truncated at construction so diagnostic logs never carry full
//! document content, and never grow without bound.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default similarity threshold below which a diff is significant.
pub const DEFAULT_DIFF_THRESHOLD: f64 = 0.7;

/// Max segment ids kept in a retrieval summary.
const MAX_SUMMARY_IDS: usize = 20;
/// Max chars kept per extracted field value.
const MAX_FIELD_CHARS: usize = 120;
/// Max chars kept of a free-text summary.
const MAX_TEXT_CHARS: usize = 240;

/// A bounded, capability-specific summary of one side's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Summary {
    /// Top-N segment ids of a retrieval result, in rank order.
    Retrieval { segment_ids: Vec<String> },
    /// Extracted structured fields (field name → truncated value).
    Fields { fields: BTreeMap<String, String> },
    /// Truncated prefix of free text.
    Text { prefix: String },
}

impl Summary {
    pub fn retrieval<I, S>(segment_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Summary::Retrieval {
            segment_ids: segment_ids
                .into_iter()
                .take(MAX_SUMMARY_IDS)
                .map(Into::into)
                .collect(),
        }
    }

    pub fn fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Summary::Fields {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), truncate_chars(&v.into(), MAX_FIELD_CHARS)))
                .collect(),
        }
    }

    pub fn text(text: &str) -> Self {
        Summary::Text {
            prefix: truncate_chars(text, MAX_TEXT_CHARS),
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Similarity in `[0.0, 1.0]` between two summaries.
///
/// - Retrieval: id-set overlap, `|intersection| / max(|a|, |b|)`; two empty
///   result sets are identical (1.0).
/// - Fields: ratio of keys present in both sides with equal values, over
///   the union of keys.
/// - Text: common-prefix length over the longer prefix.
/// - Mismatched variants: 0.0 (the two implementations disagree on shape,
///   which is itself the most significant diff possible).
pub fn similarity(legacy: &Summary, new: &Summary) -> f64 {
    match (legacy, new) {
        (Summary::Retrieval { segment_ids: a }, Summary::Retrieval { segment_ids: b }) => {
            if a.is_empty() && b.is_empty() {
                return 1.0;
            }
            let set_a: std::collections::HashSet<&String> = a.iter().collect();
            let set_b: std::collections::HashSet<&String> = b.iter().collect();
            let intersection = set_a.intersection(&set_b).count() as f64;
            intersection / a.len().max(b.len()) as f64
        }
        (Summary::Fields { fields: a }, Summary::Fields { fields: b }) => {
            if a.is_empty() && b.is_empty() {
                return 1.0;
            }
            let keys: std::collections::HashSet<&String> = a.keys().chain(b.keys()).collect();
            let matching = keys
                .iter()
                .filter(|k| a.get(**k).is_some() && a.get(**k) == b.get(**k))
                .count() as f64;
            matching / keys.len() as f64
        }
        (Summary::Text { prefix: a }, Summary::Text { prefix: b }) => {
            if a.is_empty() && b.is_empty() {
                return 1.0;
            }
            let common = a
                .chars()
                .zip(b.chars())
                .take_while(|(x, y)| x == y)
                .count() as f64;
            common / a.chars().count().max(b.chars().count()) as f64
        }
        _ => 0.0,
    }
}

/// Whether the divergence between two summaries crosses the threshold.
pub fn is_significant(legacy: &Summary, new: &Summary, threshold: f64) -> bool {
    similarity(legacy, new) < threshold
}
