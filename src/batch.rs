//! Verifying several artifacts at once.
//!
//! Each artifact is verified on its own blocking worker with its own
//! interpreter. Nothing is shared between runs except the read-only pipeline
//! and context.

use log::debug;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::error::{Result, VerifyError};
use crate::pipeline::{VerificationPipeline, VerifyContext};
use crate::report::VerificationReport;

/// Outcome for one artifact of a batch.
pub struct BatchItem {
    pub path: PathBuf,
    pub result: Result<VerificationReport>,
}

/// Verifies every path independently. Results come back in input order.
pub async fn verify_many(
    pipeline: Arc<VerificationPipeline>,
    context: Arc<VerifyContext>,
    paths: Vec<PathBuf>,
) -> Vec<BatchItem> {
    let mut tasks = JoinSet::new();
    for (index, path) in paths.iter().cloned().enumerate() {
        let pipeline = Arc::clone(&pipeline);
        let context = Arc::clone(&context);
        tasks.spawn_blocking(move || {
            let result = pipeline.run(&path, &context);
            (index, result)
        });
    }

    let mut results: Vec<Option<Result<VerificationReport>>> = paths.iter().map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, result)) => {
                debug!("finished {}", paths[index].display());
                results[index] = Some(result);
            }
            // The index is lost with a panicked task; its slot stays empty and
            // is reported below.
            Err(err) => debug!("verification worker failed: {}", err),
        }
    }

    paths
        .into_iter()
        .zip(results)
        .map(|(path, result)| {
            let result = result.unwrap_or_else(|| {
                Err(VerifyError::Worker {
                    path: path.clone(),
                    reason: "worker panicked".to_string(),
                })
            });
            BatchItem { path, result }
        })
        .collect()
}
