use crate::glyph::{GlyphShape, Point};
use crate::MatchError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// On-disk catalog layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    pub glyphs: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub codepoint: u32,
    pub points: Vec<[i32; 2]>,
}

/// Reference glyphs grouped by point count.
#[derive(Debug, Clone, Default)]
pub struct GlyphCatalog {
    groups: HashMap<usize, Vec<GlyphShape>>,
    len: usize,
}

impl GlyphCatalog {
    /// Builds a catalog from `(codepoint, points)` pairs. Glyphs without
    /// points are skipped; insertion order is kept within each group.
    pub fn new<I, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (u32, P)>,
        P: AsRef<[Point]>,
    {
        let mut catalog = GlyphCatalog::default();
        for (codepoint, points) in entries {
            catalog.insert(codepoint, points.as_ref());
        }
        catalog
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, MatchError> {
        let file: CatalogFile = serde_json::from_reader(reader)?;
        Ok(Self::new(file.glyphs.into_iter().map(|entry| {
            let points: Vec<Point> = entry.points.into_iter().map(Point::from).collect();
            (entry.codepoint, points)
        })))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MatchError> {
        let path = path.as_ref();
        let catalog = Self::from_reader(BufReader::new(File::open(path)?))?;
        tracing::debug!(path = %path.display(), glyphs = catalog.len(), "loaded glyph catalog");
        Ok(catalog)
    }

    pub fn insert(&mut self, codepoint: u32, points: &[Point]) {
        if points.is_empty() {
            return;
        }
        self.groups
            .entry(points.len())
            .or_default()
            .push(GlyphShape::new(codepoint, points));
        self.len += 1;
    }

    /// Glyphs with exactly `points` points.
    pub fn candidates(&self, points: usize) -> Option<&[GlyphShape]> {
        self.groups.get(&points).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
