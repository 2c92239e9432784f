//! Fragment compression: collapse duplicate and near-duplicate fragments.
//!
//! Fragments are grouped by a key derived from their content: the concept
//! signature in semantic mode, the whitespace-normalized lowercase text in
//! exact mode. Each group becomes one compacted fragment:
//!
//! - id: content address of the group key (`cf-` + SHA-256 prefix)
//! - content: the representative, i.e. the smallest member by
//!   `(length, content, id)`
//! - source_refs: union of every member's provenance
//! - created_at: newest member
//! - embedding: centroid when every member has one of the same size,
//!   otherwise the representative's
//!
//! Output is sorted by id, so neither the input order nor the number of
//! repetitions affects the result. Compressing an already compressed set
//! reproduces it.

use chrono::Utc;
use mnemo_config::CompressionMode;
use mnemo_core::{Fragment, RawFragment, concepts};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use tracing::debug;

use crate::vector::centroid;

/// Outcome of a compression pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionResult {
    pub compacted: Vec<Fragment>,

    /// `compacted / valid input`, 0 when nothing valid was given
    pub ratio: f64,

    /// Fragments received, valid or not
    pub input: usize,

    /// Fragments filtered out as malformed
    pub rejected: usize,
}

impl CompressionResult {
    /// The union of concepts across all compacted fragments.
    pub fn concept_set(&self) -> BTreeSet<String> {
        self.compacted
            .iter()
            .flat_map(|f| concepts::extract(&f.content))
            .collect()
    }
}

/// Compress loosely typed input. Malformed fragments are counted and skipped.
pub fn compress(fragments: &[RawFragment], mode: CompressionMode) -> CompressionResult {
    let now = Utc::now();
    let mut valid = Vec::with_capacity(fragments.len());
    let mut rejected = 0;

    for (index, raw) in fragments.iter().enumerate() {
        match raw.validate(now) {
            Ok(fragment) => valid.push(fragment),
            Err(e) => {
                rejected += 1;
                debug!(index, error = %e, "Skipping malformed fragment");
            }
        }
    }

    let mut result = compress_fragments(valid, mode);
    result.input = fragments.len();
    result.rejected = rejected;
    result
}

/// Compress already validated fragments.
pub fn compress_fragments(fragments: Vec<Fragment>, mode: CompressionMode) -> CompressionResult {
    let valid = fragments.len();
    let mut groups: BTreeMap<String, Vec<Fragment>> = BTreeMap::new();
    for fragment in fragments {
        groups
            .entry(group_key(&fragment.content, mode))
            .or_default()
            .push(fragment);
    }

    let mut compacted: Vec<Fragment> = groups
        .into_iter()
        .filter_map(|(key, members)| {
            merge_fragments(content_address(&[mode.as_str(), &key]), &members)
        })
        .collect();
    compacted.sort_by(|a, b| a.id.cmp(&b.id));

    let ratio = if valid == 0 {
        0.0
    } else {
        compacted.len() as f64 / valid as f64
    };

    debug!(
        mode = mode.as_str(),
        before = valid,
        after = compacted.len(),
        "Compression pass finished"
    );

    CompressionResult {
        input: valid,
        compacted,
        ratio,
        rejected: 0,
    }
}

/// The grouping key for a piece of content.
///
/// Text without concepts (only stopwords or punctuation) falls back to its
/// normalized form, so it never merges with unrelated concept-free text.
pub fn group_key(content: &str, mode: CompressionMode) -> String {
    match mode {
        CompressionMode::Exact => concepts::normalize(content),
        CompressionMode::Semantic => {
            let signature = concepts::signature(content);
            if signature.is_empty() {
                format!("={}", concepts::normalize(content))
            } else {
                signature
            }
        }
    }
}

/// A stable id derived from `parts`: `cf-` followed by 16 hex digits of
/// their SHA-256.
pub fn content_address(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();

    let mut id = String::with_capacity(19);
    id.push_str("cf-");
    for byte in &digest[..8] {
        let _ = write!(id, "{byte:02x}");
    }
    id
}

/// Merge `members` into one compacted fragment with the given id.
///
/// Returns `None` for an empty group.
pub fn merge_fragments(id: String, members: &[Fragment]) -> Option<Fragment> {
    let representative = members.iter().min_by(|a, b| {
        a.content
            .len()
            .cmp(&b.content.len())
            .then_with(|| a.content.cmp(&b.content))
            .then_with(|| a.id.cmp(&b.id))
    })?;

    let source_refs: BTreeSet<String> = members.iter().flat_map(|f| f.provenance()).collect();
    let created_at = members
        .iter()
        .map(|f| f.created_at)
        .max()
        .unwrap_or(representative.created_at);

    let embedding = if members.iter().all(|f| f.embedding.is_some()) {
        centroid(members.iter().filter_map(|f| f.embedding.as_deref()))
    } else {
        None
    }
    .or_else(|| representative.embedding.clone());

    Some(Fragment {
        id,
        content: representative.content.clone(),
        created_at,
        embedding,
        source_refs,
    })
}
