//! Glyph matching on top of the squared-distance kernels.
//!
//! A [`GlyphCatalog`] holds reference outlines grouped by point count; a
//! [`GlyphMatcher`] pre-filters them by extents and scores the survivors in
//! a single batch to find the glyph an obfuscated outline stands for.

pub mod catalog;
pub mod glyph;
pub mod matcher;

pub use catalog::{CatalogEntry, CatalogFile, GlyphCatalog};
pub use glyph::{flatten, parse_glyph, Extents, GlyphError, GlyphShape, Point};
pub use glyphdiff_kernel::{BatchConfig, Isa, Kernel, KernelError, TailPolicy};
pub use matcher::{GlyphMatch, GlyphMatcher, MatchConfig};

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("invalid glyph: {0}")]
    Glyph(#[from] GlyphError),

    #[error("no catalog glyph has {points} points")]
    NoCandidates { points: usize },

    #[error("no candidate glyph matched")]
    NoMatch,

    #[error("candidate pool of {0} coordinates exceeds the offset range")]
    PoolTooLarge(usize),

    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("catalog io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid catalog: {0}")]
    Catalog(#[from] serde_json::Error),
}
