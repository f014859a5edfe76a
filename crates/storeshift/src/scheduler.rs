//! Bounded-concurrency scheduling of transfer units
//!
//! Tables and key batches are independent units. They are driven through a
//! `buffer_unordered` stream so at most `concurrency` units are in flight;
//! each unit stays internally sequential. The first failing unit stops the
//! rest.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;

use crate::error::Result;

/// Run `work` for every unit with at most `concurrency` in flight
///
/// With `concurrency == 1` units run strictly in order, one after another.
/// Results come back in completion order.
pub async fn run_bounded<U, T, F, Fut>(units: Vec<U>, concurrency: usize, work: F) -> Result<Vec<T>>
where
    F: FnMut(U) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    stream::iter(units)
        .map(work)
        .buffer_unordered(concurrency.max(1))
        .try_collect()
        .await
}
