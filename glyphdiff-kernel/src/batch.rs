use crate::distance::{self, Isa, Kernel, TailPolicy};
use crate::{KernelError, MISMATCH_SCORE};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Configuration for batch evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// How vector kernels treat points past the last whole batch
    pub tail: TailPolicy,
    /// Minimum number of candidates handed to one rayon job
    pub min_chunk: usize,
    /// Maximum number of worker threads
    pub max_parallelism: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            tail: TailPolicy::default(),
            min_chunk: 32,
            max_parallelism: num_cpus::get(),
        }
    }
}

/// Candidate sequences packed back to back, with checked element ranges.
#[derive(Debug, Clone)]
pub struct CandidatePool<'a> {
    data: &'a [i32],
    ranges: Vec<Range<usize>>,
}

impl<'a> CandidatePool<'a> {
    /// Validates an offset table of `(start, length)` pairs, in elements,
    /// against `data`. Any pair reaching outside `data` fails the whole pool.
    pub fn new(data: &'a [i32], offsets: &[i32]) -> Result<Self, KernelError> {
        if offsets.len() % 2 != 0 {
            return Err(KernelError::OddOffsetTable { len: offsets.len() });
        }

        let ranges = offsets
            .chunks_exact(2)
            .enumerate()
            .map(|(index, pair)| {
                let (start, length) = (pair[0], pair[1]);
                let out_of_bounds = || KernelError::OffsetOutOfBounds {
                    index,
                    start,
                    length,
                    pool_len: data.len(),
                };
                let begin = usize::try_from(start).map_err(|_| out_of_bounds())?;
                let count = usize::try_from(length).map_err(|_| out_of_bounds())?;
                let end = begin
                    .checked_add(count)
                    .filter(|&end| end <= data.len())
                    .ok_or_else(out_of_bounds)?;
                Ok(begin..end)
            })
            .collect::<Result<Vec<_>, KernelError>>()?;

        Ok(Self { data, ranges })
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Batch inputs in the shape the host boundary hands them over.
#[derive(Debug, Clone, Copy)]
pub struct RawBatch<'a> {
    pub query: &'a [i32],
    pub pool: &'a [i32],
    pub offsets: &'a [i32],
    /// Per-candidate host data riding along with the batch. Never read.
    pub metadata: Option<&'a [i32]>,
}

/// Scores every candidate of a pool against one query
pub struct BatchEvaluator {
    kernel: Kernel,
    config: BatchConfig,
    workers: Option<rayon::ThreadPool>,
}

impl BatchEvaluator {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            config: BatchConfig::default(),
            workers: None,
        }
    }

    /// Applies `config`. A dedicated worker pool is built once when
    /// `max_parallelism` is below the size of the global rayon pool.
    pub fn with_config(mut self, config: BatchConfig) -> Result<Self, KernelError> {
        self.workers = if config.max_parallelism > 0
            && config.max_parallelism < rayon::current_num_threads()
        {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(config.max_parallelism)
                    .thread_name(|i| format!("glyphdiff-{i}"))
                    .build()?,
            )
        } else {
            None
        };
        self.config = config;
        Ok(self)
    }

    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// One score per candidate, in pool order; [`MISMATCH_SCORE`] where the
    /// candidate's element count differs from the query's.
    pub fn evaluate(&self, query: &[i32], pool: &CandidatePool<'_>) -> Result<Vec<i64>, KernelError> {
        let mut scores = vec![MISMATCH_SCORE; pool.len()];
        self.evaluate_into(query, pool, &mut scores)?;
        Ok(scores)
    }

    /// Validates and evaluates a batch given as raw buffers.
    pub fn evaluate_raw(&self, batch: RawBatch<'_>) -> Result<Vec<i64>, KernelError> {
        let pool = CandidatePool::new(batch.pool, batch.offsets)?;
        if let Some(metadata) = batch.metadata {
            tracing::trace!(metadata_len = metadata.len(), "carrying candidate metadata");
        }
        self.evaluate(batch.query, &pool)
    }

    /// Like [`evaluate`](Self::evaluate), writing into caller-owned storage.
    pub fn evaluate_into(
        &self,
        query: &[i32],
        pool: &CandidatePool<'_>,
        scores: &mut [i64],
    ) -> Result<(), KernelError> {
        if query.len() % 2 != 0 {
            return Err(KernelError::OddQueryLength { len: query.len() });
        }
        if scores.len() != pool.len() {
            return Err(KernelError::ResultLength {
                expected: pool.len(),
                actual: scores.len(),
            });
        }

        let tail = self.config.tail;
        tracing::debug!(
            candidates = pool.len(),
            query_points = query.len() / 2,
            kernel = %self.kernel.isa(),
            %tail,
            "evaluating candidate batch"
        );

        // Resolve the realization once; each arm runs its own monomorphized loop.
        // SAFETY: a `Kernel` only carries an instruction set the CPU supports.
        match self.kernel.isa() {
            Isa::Avx2 => self.fan_out(query, pool, scores, |a, b| unsafe { distance::avx2(a, b, tail) }),
            Isa::Sse41 => self.fan_out(query, pool, scores, |a, b| unsafe { distance::sse41(a, b, tail) }),
            Isa::Neon => self.fan_out(query, pool, scores, |a, b| unsafe { distance::neon(a, b, tail) }),
            Isa::NeonV7 => {
                self.fan_out(query, pool, scores, |a, b| unsafe { distance::neon_v7(a, b, tail) })
            }
            Isa::Scalar => self.fan_out(query, pool, scores, distance::scalar_squared_distance),
        }

        if tracing::enabled!(tracing::Level::TRACE) {
            let mismatched = scores.iter().filter(|&&s| s == MISMATCH_SCORE).count();
            tracing::trace!(mismatched, "batch complete");
        }
        Ok(())
    }

    fn fan_out<F>(&self, query: &[i32], pool: &CandidatePool<'_>, scores: &mut [i64], kernel: F)
    where
        F: Fn(&[i32], &[i32]) -> i64 + Sync,
    {
        let min_chunk = self.config.min_chunk.max(1);
        match &self.workers {
            Some(workers) => {
                workers.install(|| score_candidates(query, pool, scores, min_chunk, &kernel))
            }
            None => score_candidates(query, pool, scores, min_chunk, &kernel),
        }
    }
}

fn score_candidates<F>(
    query: &[i32],
    pool: &CandidatePool<'_>,
    scores: &mut [i64],
    min_chunk: usize,
    kernel: &F,
) where
    F: Fn(&[i32], &[i32]) -> i64 + Sync,
{
    scores
        .par_iter_mut()
        .zip(pool.ranges.par_iter())
        .with_min_len(min_chunk)
        .for_each(|(score, range)| {
            *score = if range.len() != query.len() {
                MISMATCH_SCORE
            } else {
                kernel(query, &pool.data[range.clone()])
            };
        });
}
