pub mod checkpoint;
pub mod config;
pub mod quota;
pub mod review;
pub mod run;
pub mod scan;
pub mod ship;
pub mod status;

use anyhow::Context;
use std::future::Future;

/// Drive an async core operation to completion on a fresh runtime.
pub(crate) fn block_on<F: Future>(fut: F) -> anyhow::Result<F::Output> {
    let rt = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    Ok(rt.block_on(fut))
}
