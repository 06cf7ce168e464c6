// Copyright 2026 the parafor authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![doc = include_str!("../README.md")]
#![forbid(missing_docs)]

mod foreach;
mod macros;
mod thread_pool;
mod util;

pub use foreach::{
    maybe_parallel_foreach_i, maybe_parallel_foreach_n, maybe_parallel_foreach_pair_i,
    parallel_foreach, parallel_foreach_adhoc, parallel_foreach_i, parallel_foreach_i_only,
    parallel_foreach_iter, parallel_foreach_mut, parallel_foreach_n, parallel_foreach_pair_i,
    MaybeParallel, Sequential,
};
pub use thread_pool::{SubmitError, ThreadCount, WorkerPool, WorkerPoolBuilder};

#[cfg(test)]
mod test {
    use super::*;
    use rand::Rng;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn pool_with(num_threads: usize) -> WorkerPool {
        let _ = env_logger::builder().is_test(true).try_init();
        WorkerPoolBuilder {
            num_threads: ThreadCount::try_from(num_threads).unwrap(),
        }
        .build()
    }

    macro_rules! expand_tests {
        ( $num_threads:expr, ) => {};
        ( $num_threads:expr, $case:ident, $( $others:tt )* ) => {
            #[test]
            fn $case() {
                $crate::test::$case($num_threads);
            }

            expand_tests!($num_threads, $($others)*);
        };
    }

    macro_rules! pool_size_tests {
        ( $mod:ident, $num_threads:expr ) => {
            mod $mod {
                use super::*;

                expand_tests!(
                    $num_threads,
                    test_sum_integers,
                    test_sum_random_integers,
                    test_indexed_weighted_sum,
                    test_pairwise_dot_product,
                    test_sequential_equivalence,
                );
            }
        };
    }

    pool_size_tests!(one_worker, 1);
    pool_size_tests!(two_workers, 2);
    pool_size_tests!(four_workers, 4);

    fn test_sum_integers(num_threads: usize) {
        let pool = pool_with(num_threads);
        let input: Vec<u64> = (0..=10_000).collect();
        let sum = AtomicU64::new(0);
        parallel_foreach(&pool, &input, |x| {
            sum.fetch_add(*x, Ordering::Relaxed);
        });
        assert_eq!(sum.load(Ordering::Relaxed), 5_000 * 10_001);
    }

    fn test_sum_random_integers(num_threads: usize) {
        let pool = pool_with(num_threads);
        let mut rng = rand::rng();
        let input: Vec<u64> = (0..4321).map(|_| rng.random_range(0..1000)).collect();
        let expected: u64 = input.iter().sum();
        let sum = AtomicU64::new(0);
        parallel_foreach(&pool, &input, |x| {
            sum.fetch_add(*x, Ordering::Relaxed);
        });
        assert_eq!(sum.load(Ordering::Relaxed), expected);
    }

    fn test_indexed_weighted_sum(num_threads: usize) {
        let pool = pool_with(num_threads);
        let input: Vec<u64> = (0..1000).map(|i| i * 3).collect();
        let expected: u64 = input.iter().enumerate().map(|(i, x)| i as u64 * x).sum();
        let sum = AtomicU64::new(0);
        parallel_foreach_i(&pool, &input, |x, i| {
            sum.fetch_add(i as u64 * x, Ordering::Relaxed);
        });
        assert_eq!(sum.load(Ordering::Relaxed), expected);
    }

    fn test_pairwise_dot_product(num_threads: usize) {
        let pool = pool_with(num_threads);
        let a: Vec<u64> = (0..500).collect();
        let b: Vec<u64> = (0..500).rev().collect();
        let expected: u64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let dot = AtomicU64::new(0);
        parallel_foreach_pair_i(&pool, &a, &b, |x, y, _| {
            dot.fetch_add(x * y, Ordering::Relaxed);
        });
        assert_eq!(dot.load(Ordering::Relaxed), expected);
    }

    fn test_sequential_equivalence(num_threads: usize) {
        let pool = pool_with(num_threads);
        let input: Vec<u64> = (0..777).collect();

        let sequential = AtomicU64::new(0);
        maybe_parallel_foreach_i(&Sequential, &input, |x, i| {
            sequential.fetch_add(x + i as u64, Ordering::Relaxed);
        });

        let parallel = AtomicU64::new(0);
        maybe_parallel_foreach_i(&pool, &input, |x, i| {
            parallel.fetch_add(x + i as u64, Ordering::Relaxed);
        });

        assert_eq!(
            sequential.load(Ordering::Relaxed),
            parallel.load(Ordering::Relaxed)
        );
    }
}
