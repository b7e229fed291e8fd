use glyphdiff_kernel::{
    scalar_squared_distance, BatchConfig, BatchEvaluator, CandidatePool, Kernel, KernelError,
    RawBatch, TailPolicy, MISMATCH_SCORE,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn pack(candidates: &[Vec<i32>]) -> (Vec<i32>, Vec<i32>) {
    let mut data = Vec::new();
    let mut offsets = Vec::with_capacity(candidates.len() * 2);
    for candidate in candidates {
        offsets.push(data.len() as i32);
        offsets.push(candidate.len() as i32);
        data.extend_from_slice(candidate);
    }
    (data, offsets)
}

#[test]
fn selected_kernel_scores_reference_batch() {
    let scores = BatchEvaluator::new(Kernel::select())
        .evaluate_raw(RawBatch {
            query: &[0, 0, 1, 1],
            pool: &[0, 0, 1, 1, 2, 2, 3, 3],
            offsets: &[0, 4, 4, 4],
            metadata: None,
        })
        .unwrap();
    assert_eq!(scores, vec![0, 16]);
}

#[test]
fn declared_length_mismatch_is_sentinel_whatever_the_contents() {
    let query = [5, 5, 6, 6];
    let data = [5, 5, 6, 6, 0, 0];
    let pool = CandidatePool::new(&data, &[0, 6]).unwrap();
    for kernel in Kernel::supported() {
        let scores = BatchEvaluator::new(kernel).evaluate(&query, &pool).unwrap();
        assert_eq!(scores, vec![MISMATCH_SCORE], "{}", kernel.isa());
    }
}

#[test]
fn all_kernels_agree_side_by_side() {
    let mut rng = StdRng::seed_from_u64(2024);
    // 48 squared deltas of up to 2^27 each stay well inside i64.
    let query: Vec<i32> = (0..2 * 24).map(|_| rng.gen_range(-(1 << 26)..(1 << 26))).collect();
    let candidates: Vec<Vec<i32>> = (0..500)
        .map(|i| {
            let points = if i % 11 == 0 { 23 } else { 24 };
            (0..2 * points)
                .map(|_| rng.gen_range(-(1 << 26)..(1 << 26)))
                .collect()
        })
        .collect();
    let (data, offsets) = pack(&candidates);
    let pool = CandidatePool::new(&data, &offsets).unwrap();

    let evaluators: Vec<BatchEvaluator> = Kernel::supported()
        .into_iter()
        .map(|kernel| {
            BatchEvaluator::new(kernel)
                .with_config(BatchConfig {
                    tail: TailPolicy::Truncate,
                    min_chunk: 8,
                    ..Default::default()
                })
                .unwrap()
        })
        .collect();

    let oracle: Vec<i64> = candidates
        .iter()
        .map(|c| {
            if c.len() == query.len() {
                scalar_squared_distance(&query, c)
            } else {
                MISMATCH_SCORE
            }
        })
        .collect();

    // 24 points fill whole batches for every width, so truncation never bites.
    for evaluator in &evaluators {
        let scores = evaluator.evaluate(&query, &pool).unwrap();
        assert_eq!(scores, oracle, "{}", evaluator.kernel().isa());
        assert!(scores.iter().all(|&s| s >= 0));
    }
}

#[test]
fn odd_point_counts_follow_tail_policy() {
    let query: Vec<i32> = (0..10).collect();
    let candidate: Vec<i32> = (0..10).map(|v| v + 2).collect();
    let (data, offsets) = pack(&[candidate.clone()]);
    let pool = CandidatePool::new(&data, &offsets).unwrap();

    for kernel in Kernel::supported() {
        let batch = kernel.isa().batch_points();
        let whole = 5 / batch * batch * 2;
        let truncated = BatchEvaluator::new(kernel)
            .with_config(BatchConfig {
                tail: TailPolicy::Truncate,
                ..Default::default()
            })
            .unwrap()
            .evaluate(&query, &pool)
            .unwrap();
        let finished = BatchEvaluator::new(kernel).evaluate(&query, &pool).unwrap();

        assert_eq!(finished, vec![40], "{}", kernel.isa());
        assert_eq!(
            truncated,
            vec![scalar_squared_distance(&query[..whole], &candidate[..whole])],
            "{}",
            kernel.isa()
        );
    }
}

#[test]
fn out_of_bounds_offsets_fail_the_batch() {
    let err = BatchEvaluator::new(Kernel::select())
        .evaluate_raw(RawBatch {
            query: &[0, 0],
            pool: &[0, 0, 1, 1],
            offsets: &[0, 2, 3, 2],
            metadata: None,
        })
        .unwrap_err();
    assert!(matches!(err, KernelError::OffsetOutOfBounds { index: 1, .. }));
}

#[test]
fn config_reads_from_json() {
    let config: BatchConfig =
        serde_json::from_str(r#"{"tail":"truncate","min_chunk":16,"max_parallelism":2}"#).unwrap();
    assert_eq!(config.tail, TailPolicy::Truncate);
    assert_eq!(config.min_chunk, 16);
}
