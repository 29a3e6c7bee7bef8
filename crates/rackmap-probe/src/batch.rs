//! Probe batch engine
//!
//! Runs one concurrent worker per candidate against a hard wall-clock
//! budget. A worker that completes before the budget elapses confirmed its
//! candidate (positive); a worker still running at the deadline was blocked
//! waiting for data that never arrived, which means the candidate does not
//! host the probed interface (negative). Deadline stragglers are aborted and
//! given a short grace period to unwind, and their results are discarded.
//!
//! A worker error counts as a negative, never as a batch failure.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, trace};

/// Errors a probe worker can produce; all of them downgrade to a negative
/// result when they happen inside a batch
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("unexpected reply: {0}")]
    Protocol(String),
}

/// Run `probe` once per candidate, all workers started together, and return
/// the candidates whose worker completed within `budget`.
pub async fn probe_batch<C, F, Fut>(
    candidates: Vec<C>,
    budget: Duration,
    grace: Duration,
    probe: F,
) -> Vec<C>
where
    C: std::fmt::Display + Clone + Send + 'static,
    F: Fn(C) -> Fut,
    Fut: Future<Output = Result<(), ProbeError>> + Send + 'static,
{
    let total = candidates.len();
    let deadline = Instant::now() + budget;
    let mut workers = JoinSet::new();

    for candidate in candidates {
        let work = probe(candidate.clone());
        workers.spawn(async move {
            match work.await {
                Ok(()) => Some(candidate),
                Err(err) => {
                    debug!(candidate = %candidate, error = %err, "Probe worker failed");
                    None
                }
            }
        });
    }

    let mut positives = Vec::new();
    loop {
        match timeout_at(deadline, workers.join_next()).await {
            Ok(Some(Ok(Some(candidate)))) => {
                trace!(candidate = %candidate, "Probe confirmed");
                positives.push(candidate);
            }
            // Worker error or panic: negative
            Ok(Some(Ok(None))) | Ok(Some(Err(_))) => {}
            // All workers done before the deadline
            Ok(None) => break,
            // Budget spent; the rest are negatives
            Err(_) => break,
        }
    }

    // Stragglers were blocked on reads that will never complete. Abort them
    // and wait briefly so their device files are closed before the caller
    // probes again.
    if !workers.is_empty() {
        workers.abort_all();
        let _ = timeout(grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
    }

    debug!(
        positives = positives.len(),
        total = total,
        "Probe batch complete"
    );
    positives
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_early_finisher_is_positive() {
        let positives = probe_batch(
            vec!["fast".to_string()],
            Duration::from_millis(500),
            Duration::from_millis(100),
            |_| async {
                sleep(Duration::from_millis(50)).await;
                Ok(())
            },
        )
        .await;

        assert_eq!(positives, vec!["fast".to_string()]);
    }

    #[tokio::test]
    async fn test_blocked_worker_is_negative_and_cancelled() {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&dropped);
        let started = std::time::Instant::now();

        let positives = probe_batch(
            vec!["stuck".to_string()],
            Duration::from_millis(200),
            Duration::from_millis(100),
            move |_| {
                let guard = DropFlag(Arc::clone(&flag));
                async move {
                    let _guard = guard;
                    sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            },
        )
        .await;

        assert!(positives.is_empty());
        // The worker future must have been torn down within the grace period
        assert!(dropped.load(Ordering::SeqCst));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_worker_error_is_negative() {
        let positives = probe_batch(
            vec!["good".to_string(), "broken".to_string()],
            Duration::from_millis(500),
            Duration::from_millis(100),
            |candidate| async move {
                if candidate == "broken" {
                    Err(ProbeError::Protocol("gone".to_string()))
                } else {
                    Ok(())
                }
            },
        )
        .await;

        assert_eq!(positives, vec!["good".to_string()]);
    }

    #[tokio::test]
    async fn test_mixed_batch_keeps_only_finishers() {
        let candidates: Vec<String> = (0..4).map(|i| format!("p{}", i)).collect();
        let positives = probe_batch(
            candidates,
            Duration::from_millis(300),
            Duration::from_millis(100),
            |candidate| async move {
                // p0 and p2 answer, the others block past the budget
                if candidate == "p0" || candidate == "p2" {
                    sleep(Duration::from_millis(20)).await;
                    Ok(())
                } else {
                    sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            },
        )
        .await;

        let mut positives = positives;
        positives.sort();
        assert_eq!(positives, vec!["p0".to_string(), "p2".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_candidate_set() {
        let positives = probe_batch(
            Vec::<String>::new(),
            Duration::from_millis(100),
            Duration::from_millis(50),
            |_| async { Ok(()) },
        )
        .await;
        assert!(positives.is_empty());
    }
}
