use crate::catalog::GlyphCatalog;
use crate::glyph::{flatten, parse_glyph, Extents, GlyphShape, Point};
use crate::MatchError;
use glyphdiff_kernel::{BatchConfig, BatchEvaluator, Kernel, RawBatch, MISMATCH_SCORE};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Largest allowed difference of any single extent bound
    pub extent_tolerance: u32,
    /// Candidates must differ from the input by fewer coordinates than this
    pub length_tolerance: usize,
    /// Closest-glyph results kept per input string; 0 disables the cache
    pub result_cache: usize,
    pub batch: BatchConfig,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            extent_tolerance: 3,
            length_tolerance: 2,
            result_cache: 1000,
            batch: BatchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlyphMatch {
    pub codepoint: u32,
    /// Squared point-wise distance; lower is closer.
    pub score: i64,
}

/// Finds the catalog glyphs closest to an input outline.
pub struct GlyphMatcher {
    catalog: GlyphCatalog,
    config: MatchConfig,
    evaluator: BatchEvaluator,
    results: Option<Mutex<LruCache<String, GlyphMatch>>>,
}

impl GlyphMatcher {
    pub fn new(catalog: GlyphCatalog, kernel: Kernel) -> Self {
        let config = MatchConfig::default();
        Self {
            catalog,
            results: result_cache(config.result_cache),
            config,
            evaluator: BatchEvaluator::new(kernel),
        }
    }

    pub fn with_config(
        catalog: GlyphCatalog,
        kernel: Kernel,
        config: MatchConfig,
    ) -> Result<Self, MatchError> {
        let evaluator = BatchEvaluator::new(kernel).with_config(config.batch.clone())?;
        Ok(Self {
            catalog,
            results: result_cache(config.result_cache),
            config,
            evaluator,
        })
    }

    pub fn catalog(&self) -> &GlyphCatalog {
        &self.catalog
    }

    pub fn kernel(&self) -> Kernel {
        self.evaluator.kernel()
    }

    /// The closest glyph to `input` (`x,y|x,y|...`). Ties go to the glyph
    /// inserted first. Successful lookups are cached; failures never are.
    pub fn find_closest(&self, input: &str) -> Result<GlyphMatch, MatchError> {
        if let Some(found) = self.cached(input) {
            tracing::trace!(codepoint = found.codepoint, "result cache hit");
            return Ok(found);
        }

        let found = self
            .rank(input, 1)?
            .into_iter()
            .next()
            .ok_or(MatchError::NoMatch)?;
        if let Some(mut results) = self.results.as_ref().and_then(|r| r.lock().ok()) {
            results.put(input.to_string(), found);
        }
        Ok(found)
    }

    /// Number of cached closest-glyph results.
    pub fn cached_results(&self) -> usize {
        self.results
            .as_ref()
            .and_then(|r| r.lock().ok().map(|results| results.len()))
            .unwrap_or(0)
    }

    pub fn clear_cache(&self) {
        if let Some(mut results) = self.results.as_ref().and_then(|r| r.lock().ok()) {
            results.clear();
        }
    }

    fn cached(&self, input: &str) -> Option<GlyphMatch> {
        let mut results = self.results.as_ref()?.lock().ok()?;
        results.get(input).copied()
    }

    /// Up to `limit` matches, best first.
    pub fn rank(&self, input: &str, limit: usize) -> Result<Vec<GlyphMatch>, MatchError> {
        let points = parse_glyph(input)?;
        self.rank_points(&points, limit)
    }

    pub fn rank_points(&self, points: &[Point], limit: usize) -> Result<Vec<GlyphMatch>, MatchError> {
        let group = self
            .catalog
            .candidates(points.len())
            .ok_or(MatchError::NoCandidates {
                points: points.len(),
            })?;

        let query = flatten(points);
        let extents = Extents::of(points);
        let survivors: Vec<&GlyphShape> = group
            .iter()
            .filter(|shape| {
                query.len().abs_diff(shape.coords.len()) < self.config.length_tolerance
                    && shape.extents.within(&extents, self.config.extent_tolerance)
            })
            .collect();
        tracing::debug!(
            points = points.len(),
            group = group.len(),
            survivors = survivors.len(),
            "filtered candidate glyphs"
        );

        let packed = PackedCandidates::pack(&survivors)?;
        let scores = self.evaluator.evaluate_raw(RawBatch {
            query: &query,
            pool: &packed.pool,
            offsets: &packed.offsets,
            metadata: Some(&packed.extents),
        })?;

        let mut ranked: Vec<GlyphMatch> = survivors
            .iter()
            .zip(scores)
            // Negative scores only come from sums that wrapped past i64.
            .filter(|(_, score)| (0..MISMATCH_SCORE).contains(score))
            .map(|(shape, score)| GlyphMatch {
                codepoint: shape.codepoint,
                score,
            })
            .collect();
        ranked.sort_by_key(|m| m.score);
        ranked.truncate(limit);
        Ok(ranked)
    }
}

fn result_cache(capacity: usize) -> Option<Mutex<LruCache<String, GlyphMatch>>> {
    NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)))
}

/// Candidates laid out for a single batch call.
struct PackedCandidates {
    pool: Vec<i32>,
    offsets: Vec<i32>,
    extents: Vec<i32>,
}

impl PackedCandidates {
    fn pack(shapes: &[&GlyphShape]) -> Result<Self, MatchError> {
        let total: usize = shapes.iter().map(|s| s.coords.len()).sum();
        if i32::try_from(total).is_err() {
            return Err(MatchError::PoolTooLarge(total));
        }

        let mut packed = PackedCandidates {
            pool: Vec::with_capacity(total),
            offsets: Vec::with_capacity(shapes.len() * 2),
            extents: Vec::with_capacity(shapes.len() * 4),
        };
        for shape in shapes {
            // Both fit: `total` was checked above.
            packed.offsets.push(packed.pool.len() as i32);
            packed.offsets.push(shape.coords.len() as i32);
            packed.pool.extend_from_slice(&shape.coords);
            packed.extents.extend(shape.extents.to_array());
        }
        Ok(packed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> GlyphCatalog {
        GlyphCatalog::new([
            (0x4e00, vec![Point::new(0, 10), Point::new(20, 10)]),
            (0x4e01, vec![Point::new(0, 11), Point::new(21, 11)]),
            (0x4e02, vec![Point::new(0, 12), Point::new(20, 12)]),
            (0x4e03, vec![Point::new(0, 90), Point::new(90, 90)]),
            (0x4e04, vec![Point::new(1, 1), Point::new(2, 2), Point::new(3, 3)]),
        ])
    }

    #[test]
    fn finds_closest_glyph() {
        let matcher = GlyphMatcher::new(catalog(), Kernel::select());
        let found = matcher.find_closest("0,12|20,12").unwrap();
        assert_eq!(
            found,
            GlyphMatch {
                codepoint: 0x4e02,
                score: 0
            }
        );
    }

    #[test]
    fn ranks_by_score_and_filters_on_extents() {
        let matcher = GlyphMatcher::new(catalog(), Kernel::scalar());
        let ranked = matcher.rank("0,10|20,10", 10).unwrap();
        let codepoints: Vec<u32> = ranked.iter().map(|m| m.codepoint).collect();
        // 0x4e03 is far outside the extent tolerance.
        assert_eq!(codepoints, vec![0x4e00, 0x4e01, 0x4e02]);
        let scores: Vec<i64> = ranked.iter().map(|m| m.score).collect();
        assert_eq!(scores, vec![0, 3, 8]);
    }

    #[test]
    fn ties_keep_catalog_order() {
        let catalog = GlyphCatalog::new([
            (1, vec![Point::new(0, 2), Point::new(4, 4)]),
            (2, vec![Point::new(0, 0), Point::new(4, 6)]),
        ]);
        let matcher = GlyphMatcher::new(catalog, Kernel::scalar());
        let found = matcher.find_closest("0,1|4,5").unwrap();
        assert_eq!(found, GlyphMatch { codepoint: 1, score: 2 });
    }

    #[test]
    fn reports_missing_groups_and_filtered_out_inputs() {
        let matcher = GlyphMatcher::new(catalog(), Kernel::select());
        assert!(matches!(
            matcher.find_closest("1,1"),
            Err(MatchError::NoCandidates { points: 1 })
        ));
        assert!(matches!(
            matcher.find_closest("0,500|500,500"),
            Err(MatchError::NoMatch)
        ));
        assert!(matches!(
            matcher.find_closest("0,a|1,1"),
            Err(MatchError::Glyph(_))
        ));
    }

    #[test]
    fn tolerance_is_configurable() {
        let config = MatchConfig {
            extent_tolerance: 100,
            ..Default::default()
        };
        let matcher = GlyphMatcher::with_config(catalog(), Kernel::select(), config).unwrap();
        assert_eq!(matcher.rank("0,10|20,10", 10).unwrap().len(), 4);
    }

    #[test]
    fn caches_successful_lookups_only() {
        let matcher = GlyphMatcher::new(catalog(), Kernel::select());
        assert_eq!(matcher.cached_results(), 0);

        let first = matcher.find_closest("0,11|21,11").unwrap();
        assert_eq!(matcher.cached_results(), 1);
        let again = matcher.find_closest("0,11|21,11").unwrap();
        assert_eq!(again, first);
        assert_eq!(matcher.cached_results(), 1);

        assert!(matcher.find_closest("0,500|500,500").is_err());
        assert!(matcher.find_closest("1,1").is_err());
        assert!(matcher.find_closest("x,1|1,1").is_err());
        assert_eq!(matcher.cached_results(), 1);

        matcher.clear_cache();
        assert_eq!(matcher.cached_results(), 0);
        assert_eq!(matcher.find_closest("0,11|21,11").unwrap(), first);
    }

    #[test]
    fn cache_is_bounded_and_can_be_disabled() {
        let bounded = GlyphMatcher::with_config(
            catalog(),
            Kernel::select(),
            MatchConfig {
                result_cache: 2,
                ..Default::default()
            },
        )
        .unwrap();
        for input in ["0,10|20,10", "0,11|21,11", "0,12|20,12"] {
            bounded.find_closest(input).unwrap();
        }
        assert_eq!(bounded.cached_results(), 2);

        let uncached = GlyphMatcher::with_config(
            catalog(),
            Kernel::select(),
            MatchConfig {
                result_cache: 0,
                ..Default::default()
            },
        )
        .unwrap();
        uncached.find_closest("0,10|20,10").unwrap();
        assert_eq!(uncached.cached_results(), 0);
    }

    #[test]
    fn wrapped_scores_never_rank() {
        let far = 1 << 30;
        // Three full-width deltas of 2^31 square to 3 * 2^62, which wraps negative.
        let catalog = GlyphCatalog::new([
            (1, vec![Point::new(-far, -far), Point::new(-far, 0)]),
            (2, vec![Point::new(far, far), Point::new(far, 1)]),
        ]);
        let matcher = GlyphMatcher::with_config(
            catalog,
            Kernel::scalar(),
            MatchConfig {
                extent_tolerance: u32::MAX,
                ..Default::default()
            },
        )
        .unwrap();
        let input = format!("{far},{far}|{far},0");
        let ranked = matcher.rank(&input, 10).unwrap();
        assert_eq!(ranked, vec![GlyphMatch { codepoint: 2, score: 1 }]);
    }

    #[test]
    fn packs_offsets_and_extents() {
        let a = GlyphShape::new(1, &[Point::new(1, 2)]);
        let b = GlyphShape::new(2, &[Point::new(-3, 4), Point::new(5, 6)]);
        let packed = PackedCandidates::pack(&[&a, &b]).unwrap();
        assert_eq!(packed.pool, vec![1, 2, -3, 4, 5, 6]);
        assert_eq!(packed.offsets, vec![0, 2, 2, 4]);
        assert_eq!(packed.extents, vec![1, 0, 2, 0, 5, -3, 6, 0]);
    }
}
