//! Glyph aggregation and retrieval engine.
//!
//! Turns a project's tabular view into a grid of glyphs by composing a grouped
//! aggregation, running it on an external asynchronous columnar query service and
//! reconstructing the rows behind selected glyphs on demand.

pub mod cli;
pub mod config;
pub mod error;
pub mod glyph;
pub mod ident;
pub mod project;
pub mod service;

pub use error::{AppError, AppResult};
