// Copyright 2026 the parafor authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Lifetime erasure at the task-queue boundary.

use crate::thread_pool::Task;

/// Extends the lifetime of a boxed task to `'static` so that it can be
/// stored in a worker pool's queue.
///
/// # Safety
///
/// The caller must ensure that the task has been executed and dropped before
/// `'env` ends. The dispatch functions in this crate uphold this by draining
/// the pool before returning: a worker drops a task at the end of its call,
/// before marking itself waiting again, so a drained pool holds no live
/// tasks.
pub(crate) unsafe fn assume_static_task<'env>(
    task: Box<dyn FnOnce() + Send + 'env>,
) -> Task {
    // SAFETY: `Box<dyn FnOnce() + Send + 'env>` and
    // `Box<dyn FnOnce() + Send + 'static>` have the same representation; the
    // caller guarantees that the task doesn't outlive `'env`.
    unsafe { std::mem::transmute(task) }
}
