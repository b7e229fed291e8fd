//! Squared-distance scoring of integer point sequences.
//!
//! A [`Kernel`] is one realization of the distance function (AVX2, SSE4.1,
//! NEON, ARMv7 NEON or scalar). [`Kernel::select`] picks the best one for the
//! process once; a [`BatchEvaluator`] applies a kernel to every candidate of
//! a packed [`CandidatePool`] in parallel.
#![cfg_attr(
    all(target_arch = "arm", feature = "arm-neon"),
    feature(stdarch_arm_neon_intrinsics)
)]

mod distance;
pub mod batch;

pub use batch::{BatchConfig, BatchEvaluator, CandidatePool, RawBatch};
pub use distance::{scalar_squared_distance, Isa, Kernel, TailPolicy};

/// Score reported for a candidate whose length differs from the query.
///
/// Real scores are non-negative as long as the true sum fits in `i64`, which
/// holds for sequences of up to 4096 points with coordinates within ±2^24.
/// Larger inputs wrap.
pub const MISMATCH_SCORE: i64 = i64::MAX;

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("query holds {len} coordinates, an even count is required")]
    OddQueryLength { len: usize },

    #[error("offset table holds {len} entries, (start, length) pairs are required")]
    OddOffsetTable { len: usize },

    #[error("candidate {index} spans start={start} length={length}, outside a pool of {pool_len}")]
    OffsetOutOfBounds {
        index: usize,
        start: i32,
        length: i32,
        pool_len: usize,
    },

    #[error("result buffer holds {actual} slots for {expected} candidates")]
    ResultLength { expected: usize, actual: usize },

    #[error("{isa} kernel is not supported on this CPU")]
    Unsupported { isa: Isa },

    #[error("unknown instruction set {0:?}")]
    UnknownIsa(String),

    #[error("unknown tail policy {0:?}, expected truncate or remainder")]
    UnknownTailPolicy(String),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
