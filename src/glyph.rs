//!
//! Glyph aggregation and retrieval engine
//! --------------------------------------
//! Turns a project's axis configuration into a grouped aggregation over its view,
//! drives that aggregation on the external query service, and later reconstructs
//! the underlying rows of selected glyphs.
//!
//! Flow: `field` resolves per-axis select expressions, `compose` builds the SQL,
//! `runner` submits and polls it, `bucket` decodes the result rows, and `rows`
//! expands a (possibly compacted, see `rowids`) selection back into row data.

pub mod bucket;
pub mod compose;
pub mod field;
pub mod registry;
pub mod rowids;
pub mod rows;
pub mod runner;

pub use bucket::GlyphBucket;
pub use compose::{compose_aggregation_query, RunnerConfig};
pub use field::{resolve_axis_field, ResolvedField};
pub use registry::{RunnerRegistry, Submission};
pub use rowids::{decode_row_ids, encode_glyph_selection, encode_glyph_selection_with, DecodedRowIds, RowIdRef, SENTINEL};
pub use rows::RowRetriever;
pub use runner::{poll_until_terminal, QueryRunner, QueryState, QueryStatus};
