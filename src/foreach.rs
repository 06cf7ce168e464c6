// Copyright 2026 the parafor authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Parallel for-each dispatch over a [`WorkerPool`].
//!
//! The functions in this module translate "apply `f` to every element" into
//! a minimal set of pool submissions and block until the pool has drained.
//!
//! For indexed input of length `total` over a pool of `P` workers, the
//! partitioning policy is two-tier: with `part = total / P`, inputs where
//! `part < 2` are dispatched fine-grained (one task per element), otherwise
//! `P` contiguous batches of `part` elements are submitted, followed by the
//! `total % P` trailing elements as individual tasks. Batching amortizes
//! queue locking on large inputs while staying fine-grained on small ones;
//! the threshold is fixed.
//!
//! Elements within one batch are processed in order on one worker; batches
//! interleave arbitrarily across workers. Index-aware variants always pass
//! an element's offset in the source range, never its offset within a batch.

#[cfg(feature = "log_parallelism")]
use crate::macros::log_trace;
use crate::thread_pool::WorkerPool;
use crate::util::assume_static_task;
use std::ops::Range;

/// Erases the task's lifetime and appends it to the pool's queue.
///
/// # Safety
///
/// The caller must drain the pool before `'env` ends.
///
/// # Panics
///
/// Panics if the pool has been shut down.
unsafe fn submit_erased<'env>(pool: &WorkerPool, task: Box<dyn FnOnce() + Send + 'env>) {
    // SAFETY: the caller drains the pool before `'env` ends.
    let task = unsafe { assume_static_task(task) };
    if pool.push_task(task).is_err() {
        // The pool was shut down mid-dispatch. Tasks from earlier
        // iterations may still be running or queued with their lifetimes
        // erased: let running ones complete, then drop the queued ones (the
        // stop flag guarantees they will never be dispatched), so that no
        // erased task outlives the caller's frame during the unwind.
        pool.wait();
        pool.discard_queued();
        panic!("worker pool was shut down during dispatch");
    }
}

/// Partitions the index range `0..len` according to the two-tier policy,
/// submits one task per batch or element applying `apply` to each index, and
/// drains the pool.
fn dispatch_indexed<A>(pool: &WorkerPool, len: usize, apply: &A)
where
    A: Fn(usize) + Sync,
{
    if len == 0 {
        return;
    }
    let num_threads = pool.size();
    let batch_len = len / num_threads;
    if batch_len < 2 {
        #[cfg(feature = "log_parallelism")]
        log_trace!("[dispatch] {len} item(s) over {num_threads} worker(s): fine-grained");
        for i in 0..len {
            // SAFETY: the pool is drained below, before `apply` and its
            // captures go out of scope.
            unsafe { submit_erased(pool, Box::new(move || apply(i))) };
        }
    } else {
        #[cfg(feature = "log_parallelism")]
        log_trace!(
            "[dispatch] {len} item(s) over {num_threads} worker(s): {num_threads} batch(es) of {batch_len} + {} single(s)",
            len % num_threads
        );
        for batch in 0..num_threads {
            let start = batch * batch_len;
            let end = start + batch_len;
            // SAFETY: as above.
            unsafe {
                submit_erased(
                    pool,
                    Box::new(move || {
                        for i in start..end {
                            apply(i);
                        }
                    }),
                )
            };
        }
        for i in (num_threads * batch_len)..len {
            // SAFETY: as above.
            unsafe { submit_erased(pool, Box::new(move || apply(i))) };
        }
    }
    pool.wait();
}

/// Applies `f` to every element of the slice on the pool's workers, blocking
/// until all applications have completed.
///
/// ```
/// # use parafor::WorkerPoolBuilder;
/// # use std::sync::atomic::{AtomicU64, Ordering};
/// let pool = WorkerPoolBuilder::default().build();
/// let input: Vec<u64> = (1..=10).collect();
/// let sum = AtomicU64::new(0);
/// parafor::parallel_foreach(&pool, &input, |x| {
///     sum.fetch_add(*x, Ordering::Relaxed);
/// });
/// assert_eq!(sum.load(Ordering::Relaxed), 55);
/// ```
///
/// # Panics
///
/// Panics if the pool has been shut down.
pub fn parallel_foreach<T, F>(pool: &WorkerPool, items: &[T], f: F)
where
    T: Sync,
    F: Fn(&T) + Sync,
{
    dispatch_indexed(pool, items.len(), &|i| f(&items[i]));
}

/// Applies `f` to every element of the slice together with the element's
/// zero-based position, blocking until all applications have completed.
///
/// The position passed to `f` is always the element's offset in `items`,
/// regardless of how the slice was partitioned into batches.
///
/// # Panics
///
/// Panics if the pool has been shut down.
pub fn parallel_foreach_i<T, F>(pool: &WorkerPool, items: &[T], f: F)
where
    T: Sync,
    F: Fn(&T, usize) + Sync,
{
    dispatch_indexed(pool, items.len(), &|i| f(&items[i], i));
}

/// Applies `f` to a mutable reference to every element of the slice,
/// blocking until all applications have completed.
///
/// Partitioning follows the same two-tier policy as [`parallel_foreach`],
/// splitting the slice into disjoint mutable chunks.
///
/// # Panics
///
/// Panics if the pool has been shut down.
pub fn parallel_foreach_mut<T, F>(pool: &WorkerPool, items: &mut [T], f: F)
where
    T: Send,
    F: Fn(&mut T) + Sync,
{
    let len = items.len();
    if len == 0 {
        return;
    }
    let num_threads = pool.size();
    let batch_len = len / num_threads;
    let f = &f;
    if batch_len < 2 {
        for item in items.iter_mut() {
            // SAFETY: the pool is drained below, before `f` and the slice
            // borrow go out of scope.
            unsafe { submit_erased(pool, Box::new(move || f(item))) };
        }
    } else {
        let (batched, rest) = items.split_at_mut(batch_len * num_threads);
        for chunk in batched.chunks_mut(batch_len) {
            // SAFETY: as above.
            unsafe {
                submit_erased(
                    pool,
                    Box::new(move || {
                        for item in chunk {
                            f(item);
                        }
                    }),
                )
            };
        }
        for item in rest.iter_mut() {
            // SAFETY: as above.
            unsafe { submit_erased(pool, Box::new(move || f(item))) };
        }
    }
    pool.wait();
}

/// Applies `f` to the zero-based position of every element of the slice,
/// blocking until all applications have completed.
///
/// # Panics
///
/// Panics if the pool has been shut down.
pub fn parallel_foreach_i_only<T, F>(pool: &WorkerPool, items: &[T], f: F)
where
    F: Fn(usize) + Sync,
{
    dispatch_indexed(pool, items.len(), &f);
}

/// Applies `f` to every index in the given range, blocking until all
/// applications have completed.
///
/// # Panics
///
/// Panics if the pool has been shut down.
pub fn parallel_foreach_n<F>(pool: &WorkerPool, range: Range<usize>, f: F)
where
    F: Fn(usize) + Sync,
{
    let start = range.start;
    dispatch_indexed(pool, range.len(), &|i| f(start + i));
}

/// Applies the binary function `f` pairwise over two same-length slices,
/// passing both elements and their shared position, blocking until all
/// applications have completed.
///
/// Partitioning is computed on the first slice's positions; the second slice
/// is indexed by the same offset.
///
/// # Panics
///
/// Panics if the slices have different lengths, or if the pool has been shut
/// down.
pub fn parallel_foreach_pair_i<A, B, F>(pool: &WorkerPool, a: &[A], b: &[B], f: F)
where
    A: Sync,
    B: Sync,
    F: Fn(&A, &B, usize) + Sync,
{
    assert_eq!(
        a.len(),
        b.len(),
        "parallel_foreach_pair_i requires same-length slices"
    );
    dispatch_indexed(pool, a.len(), &|i| f(&a[i], &b[i], i));
}

/// Applies `f` to every element produced by the iterator, submitting one
/// task per element and blocking until all applications have completed.
///
/// This is the fallback for inputs without random access: batch boundaries
/// require O(1) offset computation, so no batching is performed and each
/// element is moved into its own task.
///
/// # Panics
///
/// Panics if the pool has been shut down.
pub fn parallel_foreach_iter<I, F>(pool: &WorkerPool, items: I, f: F)
where
    I: IntoIterator,
    I::Item: Send,
    F: Fn(I::Item) + Sync,
{
    let f = &f;
    for item in items {
        // SAFETY: the pool is drained below, before `f` and the elements go
        // out of scope.
        unsafe { submit_erased(pool, Box::new(move || f(item))) };
    }
    pool.wait();
}

/// Applies `f` to every element of the slice without a pool, spawning one
/// ad-hoc thread per element and joining them all before returning.
///
/// Functionally equivalent to dispatching on a pool and waiting, but with
/// per-call thread spawn overhead and no thread reuse. Intended for callers
/// without a persistent pool.
pub fn parallel_foreach_adhoc<T, F>(items: &[T], f: F)
where
    T: Sync,
    F: Fn(&T) + Sync,
{
    let f = &f;
    std::thread::scope(|scope| {
        for item in items {
            scope.spawn(move || f(item));
        }
    });
}

/// Compile-time selection between pool-backed parallel dispatch and a
/// sequential fallback sharing the same call sites.
///
/// Implemented by [`WorkerPool`] (parallel) and [`Sequential`] (plain
/// in-order loops with no thread involvement). Because the choice
/// monomorphizes, sequential builds carry no pool or locking overhead.
pub trait MaybeParallel {
    /// Applies `f` to every element of the slice with its zero-based
    /// position.
    fn foreach_i<T, F>(&self, items: &[T], f: F)
    where
        T: Sync,
        F: Fn(&T, usize) + Sync;

    /// Applies `f` to every index in the given range.
    fn foreach_n<F>(&self, range: Range<usize>, f: F)
    where
        F: Fn(usize) + Sync;

    /// Applies the binary function `f` pairwise over two same-length slices
    /// with their shared position.
    fn foreach_pair_i<A, B, F>(&self, a: &[A], b: &[B], f: F)
    where
        A: Sync,
        B: Sync,
        F: Fn(&A, &B, usize) + Sync;
}

/// Sequential implementation of [`MaybeParallel`]: elements are processed
/// in order on the calling thread.
pub struct Sequential;

impl MaybeParallel for Sequential {
    fn foreach_i<T, F>(&self, items: &[T], f: F)
    where
        T: Sync,
        F: Fn(&T, usize) + Sync,
    {
        for (i, item) in items.iter().enumerate() {
            f(item, i);
        }
    }

    fn foreach_n<F>(&self, range: Range<usize>, f: F)
    where
        F: Fn(usize) + Sync,
    {
        for i in range {
            f(i);
        }
    }

    fn foreach_pair_i<A, B, F>(&self, a: &[A], b: &[B], f: F)
    where
        A: Sync,
        B: Sync,
        F: Fn(&A, &B, usize) + Sync,
    {
        assert_eq!(
            a.len(),
            b.len(),
            "foreach_pair_i requires same-length slices"
        );
        for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
            f(x, y, i);
        }
    }
}

impl MaybeParallel for WorkerPool {
    fn foreach_i<T, F>(&self, items: &[T], f: F)
    where
        T: Sync,
        F: Fn(&T, usize) + Sync,
    {
        parallel_foreach_i(self, items, f);
    }

    fn foreach_n<F>(&self, range: Range<usize>, f: F)
    where
        F: Fn(usize) + Sync,
    {
        parallel_foreach_n(self, range, f);
    }

    fn foreach_pair_i<A, B, F>(&self, a: &[A], b: &[B], f: F)
    where
        A: Sync,
        B: Sync,
        F: Fn(&A, &B, usize) + Sync,
    {
        parallel_foreach_pair_i(self, a, b, f);
    }
}

/// Applies `f` to every element of the slice with its zero-based position,
/// in parallel or sequentially depending on the dispatcher.
///
/// ```
/// # use parafor::{maybe_parallel_foreach_i, Sequential, WorkerPoolBuilder};
/// # use std::sync::atomic::{AtomicU64, Ordering};
/// let input: Vec<u64> = (1..=10).collect();
///
/// let sum = AtomicU64::new(0);
/// maybe_parallel_foreach_i(&Sequential, &input, |x, _| {
///     sum.fetch_add(*x, Ordering::Relaxed);
/// });
/// assert_eq!(sum.load(Ordering::Relaxed), 55);
///
/// let pool = WorkerPoolBuilder::default().build();
/// let sum = AtomicU64::new(0);
/// maybe_parallel_foreach_i(&pool, &input, |x, _| {
///     sum.fetch_add(*x, Ordering::Relaxed);
/// });
/// assert_eq!(sum.load(Ordering::Relaxed), 55);
/// ```
pub fn maybe_parallel_foreach_i<P, T, F>(dispatcher: &P, items: &[T], f: F)
where
    P: MaybeParallel,
    T: Sync,
    F: Fn(&T, usize) + Sync,
{
    dispatcher.foreach_i(items, f);
}

/// Applies `f` to every index in the given range, in parallel or
/// sequentially depending on the dispatcher.
pub fn maybe_parallel_foreach_n<P, F>(dispatcher: &P, range: Range<usize>, f: F)
where
    P: MaybeParallel,
    F: Fn(usize) + Sync,
{
    dispatcher.foreach_n(range, f);
}

/// Applies the binary function `f` pairwise over two same-length slices, in
/// parallel or sequentially depending on the dispatcher.
pub fn maybe_parallel_foreach_pair_i<P, A, B, F>(dispatcher: &P, a: &[A], b: &[B], f: F)
where
    P: MaybeParallel,
    A: Sync,
    B: Sync,
    F: Fn(&A, &B, usize) + Sync,
{
    dispatcher.foreach_pair_i(a, b, f);
}
