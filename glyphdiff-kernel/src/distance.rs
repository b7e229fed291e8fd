use crate::KernelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;
#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;
#[cfg(all(target_arch = "arm", feature = "arm-neon"))]
use std::arch::arm::*;

/// Instruction set a kernel realization is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Isa {
    Avx2,
    Sse41,
    /// 64-bit ARM.
    Neon,
    /// 32-bit ARM (ARMv7 with NEON).
    NeonV7,
    Scalar,
}

impl Isa {
    /// Dispatch preference, highest first.
    pub const PREFERENCE: [Isa; 5] = [Isa::Avx2, Isa::Sse41, Isa::Neon, Isa::NeonV7, Isa::Scalar];

    /// Points consumed per vector iteration.
    pub fn batch_points(self) -> usize {
        match self {
            Isa::Avx2 => 8,
            Isa::Sse41 | Isa::Neon | Isa::NeonV7 => 4,
            Isa::Scalar => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Isa::Avx2 => "avx2",
            Isa::Sse41 => "sse4.1",
            Isa::Neon => "neon",
            Isa::NeonV7 => "neon-v7",
            Isa::Scalar => "scalar",
        }
    }

    /// Whether the build target guarantees this instruction set.
    pub fn enabled_by_target(self) -> bool {
        match self {
            Isa::Avx2 => cfg!(all(target_arch = "x86_64", target_feature = "avx2")),
            Isa::Sse41 => cfg!(all(target_arch = "x86_64", target_feature = "sse4.1")),
            Isa::Neon => cfg!(all(target_arch = "aarch64", target_feature = "neon")),
            Isa::NeonV7 => cfg!(all(
                target_arch = "arm",
                target_feature = "neon",
                feature = "arm-neon"
            )),
            Isa::Scalar => true,
        }
    }

    /// Whether the running CPU can execute this realization.
    pub fn is_supported(self) -> bool {
        if self.enabled_by_target() {
            return true;
        }
        match self {
            #[cfg(target_arch = "x86_64")]
            Isa::Avx2 => is_x86_feature_detected!("avx2"),
            #[cfg(target_arch = "x86_64")]
            Isa::Sse41 => is_x86_feature_detected!("sse4.1"),
            #[cfg(target_arch = "aarch64")]
            Isa::Neon => std::arch::is_aarch64_feature_detected!("neon"),
            _ => false,
        }
    }
}

impl fmt::Display for Isa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Isa {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Isa::PREFERENCE
            .into_iter()
            .find(|isa| isa.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| KernelError::UnknownIsa(s.to_string()))
    }
}

/// What vector realizations do with points past the last whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TailPolicy {
    /// Drop the trailing points; they contribute zero. Matches the legacy
    /// native library bit for bit.
    Truncate,
    /// Finish the trailing points with the scalar loop, so every realization
    /// equals the scalar result.
    #[default]
    Remainder,
}

impl fmt::Display for TailPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TailPolicy::Truncate => f.write_str("truncate"),
            TailPolicy::Remainder => f.write_str("remainder"),
        }
    }
}

impl FromStr for TailPolicy {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "truncate" => Ok(TailPolicy::Truncate),
            "remainder" => Ok(TailPolicy::Remainder),
            _ => Err(KernelError::UnknownTailPolicy(s.to_string())),
        }
    }
}

static SELECTED: OnceLock<Kernel> = OnceLock::new();

/// A squared-distance realization the running CPU is able to execute.
///
/// The only way to obtain one is through the constructors below, which
/// check support, so every `Kernel` value is safe to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Kernel {
    isa: Isa,
}

impl Kernel {
    /// The process-wide kernel, chosen on first use and fixed afterwards.
    ///
    /// Without the `runtime-detect` feature the choice depends only on the
    /// instruction sets the build target guarantees.
    pub fn select() -> Kernel {
        *SELECTED.get_or_init(|| {
            let isa = Isa::PREFERENCE
                .into_iter()
                .find(|isa| {
                    if cfg!(feature = "runtime-detect") {
                        isa.is_supported()
                    } else {
                        isa.enabled_by_target()
                    }
                })
                .unwrap_or(Isa::Scalar);
            tracing::debug!(kernel = %isa, "selected squared-distance kernel");
            Kernel { isa }
        })
    }

    pub const fn scalar() -> Kernel {
        Kernel { isa: Isa::Scalar }
    }

    pub fn with_isa(isa: Isa) -> Result<Kernel, KernelError> {
        if isa.is_supported() {
            Ok(Kernel { isa })
        } else {
            Err(KernelError::Unsupported { isa })
        }
    }

    /// Every realization this host can run, best first.
    pub fn supported() -> Vec<Kernel> {
        Isa::PREFERENCE
            .into_iter()
            .filter(|isa| isa.is_supported())
            .map(|isa| Kernel { isa })
            .collect()
    }

    pub fn isa(self) -> Isa {
        self.isa
    }

    /// Sum of squared coordinate differences over the first `points` points
    /// of `a` and `b`.
    ///
    /// Panics if either slice holds fewer than `2 * points` elements.
    pub fn squared_distance(self, a: &[i32], b: &[i32], points: usize, tail: TailPolicy) -> i64 {
        let len = points * 2;
        let (a, b) = (&a[..len], &b[..len]);
        // SAFETY: `Kernel` is only constructed for supported instruction sets.
        unsafe {
            match self.isa {
                Isa::Avx2 => avx2(a, b, tail),
                Isa::Sse41 => sse41(a, b, tail),
                Isa::Neon => neon(a, b, tail),
                Isa::NeonV7 => neon_v7(a, b, tail),
                Isa::Scalar => scalar_squared_distance(a, b),
            }
        }
    }
}

/// Reference realization, one point at a time.
///
/// Deltas wrap in 32 bits and sums wrap in 64 bits, exactly like the vector
/// lanes, so every realization agrees on every input.
pub fn scalar_squared_distance(a: &[i32], b: &[i32]) -> i64 {
    a.chunks_exact(2)
        .zip(b.chunks_exact(2))
        .fold(0i64, |total, (p, q)| {
            let dx = p[0].wrapping_sub(q[0]) as i64;
            let dy = p[1].wrapping_sub(q[1]) as i64;
            total.wrapping_add(dx * dx).wrapping_add(dy * dy)
        })
}

/// Runs `body` over the whole batches of `a` and `b`, then applies `tail`.
#[inline(always)]
fn with_tail<F>(a: &[i32], b: &[i32], batch_points: usize, tail: TailPolicy, body: F) -> i64
where
    F: FnOnce(&[i32], &[i32]) -> i64,
{
    let step = batch_points * 2;
    let whole = a.len().min(b.len()) / step * step;
    let sum = body(&a[..whole], &b[..whole]);
    match tail {
        TailPolicy::Truncate => sum,
        TailPolicy::Remainder => sum.wrapping_add(scalar_squared_distance(&a[whole..], &b[whole..])),
    }
}

// --- Per-ISA entry points, callable on every target ---
//
// Safety: the caller must have checked the instruction set is supported,
// which holding a `Kernel` guarantees.

#[inline]
pub(crate) unsafe fn avx2(a: &[i32], b: &[i32], tail: TailPolicy) -> i64 {
    #[cfg(target_arch = "x86_64")]
    {
        with_tail(a, b, Isa::Avx2.batch_points(), tail, |a, b| squared_distance_avx2(a, b))
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = (a, b, tail);
        unreachable!("AVX2 kernel on a non-x86_64 target")
    }
}

#[inline]
pub(crate) unsafe fn sse41(a: &[i32], b: &[i32], tail: TailPolicy) -> i64 {
    #[cfg(target_arch = "x86_64")]
    {
        with_tail(a, b, Isa::Sse41.batch_points(), tail, |a, b| squared_distance_sse41(a, b))
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = (a, b, tail);
        unreachable!("SSE4.1 kernel on a non-x86_64 target")
    }
}

#[inline]
pub(crate) unsafe fn neon(a: &[i32], b: &[i32], tail: TailPolicy) -> i64 {
    #[cfg(target_arch = "aarch64")]
    {
        with_tail(a, b, Isa::Neon.batch_points(), tail, |a, b| squared_distance_neon(a, b))
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        let _ = (a, b, tail);
        unreachable!("NEON kernel on a non-aarch64 target")
    }
}

#[inline]
pub(crate) unsafe fn neon_v7(a: &[i32], b: &[i32], tail: TailPolicy) -> i64 {
    #[cfg(all(target_arch = "arm", feature = "arm-neon"))]
    {
        with_tail(a, b, Isa::NeonV7.batch_points(), tail, |a, b| squared_distance_neon_v7(a, b))
    }
    #[cfg(not(all(target_arch = "arm", feature = "arm-neon")))]
    {
        let _ = (a, b, tail);
        unreachable!("ARMv7 NEON kernel without the arm-neon feature")
    }
}

// --- x86_64 Implementations ---
//
// After a lanewise subtract the register holds [dx0, dy0, dx1, dy1, ..].
// `mul_epi32` multiplies the even 32-bit lanes into 64-bit products, so the
// x deltas are squared in place and the y deltas after a 32-bit shift.

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn squared_distance_avx2(a: &[i32], b: &[i32]) -> i64 {
    let mut total = _mm256_setzero_si256();
    for (ca, cb) in a.chunks_exact(16).zip(b.chunks_exact(16)) {
        let lo = _mm256_sub_epi32(
            _mm256_loadu_si256(ca.as_ptr() as *const __m256i),
            _mm256_loadu_si256(cb.as_ptr() as *const __m256i),
        );
        let hi = _mm256_sub_epi32(
            _mm256_loadu_si256(ca.as_ptr().add(8) as *const __m256i),
            _mm256_loadu_si256(cb.as_ptr().add(8) as *const __m256i),
        );
        let lo_y = _mm256_srli_epi64::<32>(lo);
        let hi_y = _mm256_srli_epi64::<32>(hi);
        total = _mm256_add_epi64(total, _mm256_mul_epi32(lo, lo));
        total = _mm256_add_epi64(total, _mm256_mul_epi32(lo_y, lo_y));
        total = _mm256_add_epi64(total, _mm256_mul_epi32(hi, hi));
        total = _mm256_add_epi64(total, _mm256_mul_epi32(hi_y, hi_y));
    }
    let mut lanes = [0i64; 4];
    _mm256_storeu_si256(lanes.as_mut_ptr() as *mut __m256i, total);
    lanes.iter().fold(0i64, |sum, &lane| sum.wrapping_add(lane))
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse4.1")]
unsafe fn squared_distance_sse41(a: &[i32], b: &[i32]) -> i64 {
    let mut total = _mm_setzero_si128();
    for (ca, cb) in a.chunks_exact(8).zip(b.chunks_exact(8)) {
        let lo = _mm_sub_epi32(
            _mm_loadu_si128(ca.as_ptr() as *const __m128i),
            _mm_loadu_si128(cb.as_ptr() as *const __m128i),
        );
        let hi = _mm_sub_epi32(
            _mm_loadu_si128(ca.as_ptr().add(4) as *const __m128i),
            _mm_loadu_si128(cb.as_ptr().add(4) as *const __m128i),
        );
        let lo_y = _mm_srli_epi64::<32>(lo);
        let hi_y = _mm_srli_epi64::<32>(hi);
        total = _mm_add_epi64(total, _mm_mul_epi32(lo, lo));
        total = _mm_add_epi64(total, _mm_mul_epi32(lo_y, lo_y));
        total = _mm_add_epi64(total, _mm_mul_epi32(hi, hi));
        total = _mm_add_epi64(total, _mm_mul_epi32(hi_y, hi_y));
    }
    let mut lanes = [0i64; 2];
    _mm_storeu_si128(lanes.as_mut_ptr() as *mut __m128i, total);
    lanes[0].wrapping_add(lanes[1])
}

// --- NEON Implementations ---
//
// `vld2q_s32` de-interleaves four points into an x register and a y
// register; widening multiplies square both halves of each.

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn squared_distance_neon(a: &[i32], b: &[i32]) -> i64 {
    let mut total = vdupq_n_s64(0);
    for (ca, cb) in a.chunks_exact(8).zip(b.chunks_exact(8)) {
        let va = vld2q_s32(ca.as_ptr());
        let vb = vld2q_s32(cb.as_ptr());
        let dx = vsubq_s32(va.0, vb.0);
        let dy = vsubq_s32(va.1, vb.1);
        total = vmlal_s32(total, vget_low_s32(dx), vget_low_s32(dx));
        total = vmlal_high_s32(total, dx, dx);
        total = vmlal_s32(total, vget_low_s32(dy), vget_low_s32(dy));
        total = vmlal_high_s32(total, dy, dy);
    }
    vaddvq_s64(total)
}

#[cfg(all(target_arch = "arm", feature = "arm-neon"))]
unsafe fn squared_distance_neon_v7(a: &[i32], b: &[i32]) -> i64 {
    let mut total = vdupq_n_s64(0);
    for (ca, cb) in a.chunks_exact(8).zip(b.chunks_exact(8)) {
        let va = vld2q_s32(ca.as_ptr());
        let vb = vld2q_s32(cb.as_ptr());
        let dx = vsubq_s32(va.0, vb.0);
        let dy = vsubq_s32(va.1, vb.1);
        let dx_sq = vaddq_s64(
            vmull_s32(vget_low_s32(dx), vget_low_s32(dx)),
            vmull_s32(vget_high_s32(dx), vget_high_s32(dx)),
        );
        let dy_sq = vaddq_s64(
            vmull_s32(vget_low_s32(dy), vget_low_s32(dy)),
            vmull_s32(vget_high_s32(dy), vget_high_s32(dy)),
        );
        total = vaddq_s64(total, vaddq_s64(dx_sq, dy_sq));
    }
    vgetq_lane_s64::<0>(total).wrapping_add(vgetq_lane_s64::<1>(total))
}
