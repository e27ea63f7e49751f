//! Compact row-id selection encoding.
//!
//! A selection of glyphs travels as a flat list of integers. Plain entries are row
//! ids. `SENTINEL` followed by an id stands for every row in the same (X, Y) bucket
//! as that id; the id after the sentinel is only used to find the bucket.

use std::collections::HashSet;

use thiserror::Error;

use crate::config::EngineConfig;
use crate::error::AppError;

use super::bucket::GlyphBucket;

pub const SENTINEL: i64 = -9999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowIdRef {
    Direct(i64),
    Lookup(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowIdDecodeError {
    #[error("sentinel at position {position} has no following lookup id")]
    TrailingSentinel { position: usize },
    #[error("sentinel at position {position} is followed by another sentinel")]
    SentinelAsLookup { position: usize },
}

impl From<RowIdDecodeError> for AppError {
    fn from(err: RowIdDecodeError) -> Self {
        let code = match err {
            RowIdDecodeError::TrailingSentinel { .. } => "trailing_sentinel",
            RowIdDecodeError::SentinelAsLookup { .. } => "sentinel_as_lookup",
        };
        AppError::invalid_argument(code, err.to_string())
    }
}

/// Direct matches and bucket lookups, each de-duplicated in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedRowIds {
    pub good_ids: Vec<i64>,
    pub lookup_ids: Vec<i64>,
}

impl DecodedRowIds {
    pub fn is_empty(&self) -> bool { self.good_ids.is_empty() && self.lookup_ids.is_empty() }
}

/// Tag every entry of an encoded selection.
pub fn tag_row_ids(ids: &[i64]) -> Result<Vec<RowIdRef>, RowIdDecodeError> {
    let mut out = Vec::with_capacity(ids.len());
    let mut i = 0usize;
    while i < ids.len() {
        if ids[i] == SENTINEL {
            match ids.get(i + 1) {
                None => return Err(RowIdDecodeError::TrailingSentinel { position: i }),
                Some(&SENTINEL) => return Err(RowIdDecodeError::SentinelAsLookup { position: i }),
                Some(&lookup) => out.push(RowIdRef::Lookup(lookup)),
            }
            i += 2;
        } else {
            out.push(RowIdRef::Direct(ids[i]));
            i += 1;
        }
    }
    Ok(out)
}

pub fn decode_row_ids(ids: &[i64]) -> Result<DecodedRowIds, RowIdDecodeError> {
    let mut decoded = DecodedRowIds::default();
    let mut seen_good = HashSet::new();
    let mut seen_lookup = HashSet::new();
    for r in tag_row_ids(ids)? {
        match r {
            RowIdRef::Direct(id) => {
                if seen_good.insert(id) { decoded.good_ids.push(id); }
            }
            RowIdRef::Lookup(id) => {
                if seen_lookup.insert(id) { decoded.lookup_ids.push(id); }
            }
        }
    }
    Ok(decoded)
}

/// Encode a glyph selection: glyphs with at most `max_direct` rows list their ids,
/// larger ones collapse to `[SENTINEL, <first row id>]`. Empty glyphs contribute nothing.
pub fn encode_glyph_selection(buckets: &[GlyphBucket], max_direct: usize) -> Vec<i64> {
    let mut out = Vec::new();
    for b in buckets {
        match b.row_ids.first() {
            None => {}
            Some(&first) if b.row_ids.len() > max_direct => {
                out.push(SENTINEL);
                out.push(first);
            }
            Some(_) => out.extend_from_slice(&b.row_ids),
        }
    }
    out
}

/// `encode_glyph_selection` at the configured `max_direct_row_ids` threshold.
pub fn encode_glyph_selection_with(buckets: &[GlyphBucket], cfg: &EngineConfig) -> Vec<i64> {
    encode_glyph_selection(buckets, cfg.max_direct_row_ids)
}
