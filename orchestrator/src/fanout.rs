//! Bounded-parallelism fan-out with ordered, per-item results.

use anyhow::{anyhow, Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::{DeployError, NodeFailure};
use crate::types::NodeId;

/// Apply `f` to every item with at most `limit` calls in flight.
///
/// `limit == 0` runs the items one after another on the calling task. With a
/// positive limit, the caller waits for a free slot before starting the next
/// item. A failing item never stops the others; every item gets exactly one
/// result, at its input position. A worker that panics is reported as that
/// item's error.
pub async fn map_limit<T, R, F, Fut>(items: Vec<T>, limit: usize, f: F) -> Vec<Result<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    if limit == 0 {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            results.push(f(item).await);
        }
        return results;
    }

    let semaphore = Arc::new(Semaphore::new(limit));
    let f = Arc::new(f);
    let mut handles = Vec::with_capacity(items.len());

    for item in items {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Fan-out semaphore closed");
        let f = f.clone();
        handles.push(tokio::spawn(async move {
            let _permit = permit?;
            f(item).await
        }));
    }

    debug!("Fan-out started {} workers (limit {})", handles.len(), limit);

    let mut results = Vec::with_capacity(handles.len());
    for (idx, handle) in handles.into_iter().enumerate() {
        results.push(match handle.await {
            Ok(result) => result,
            Err(e) => Err(anyhow!("worker for item {} did not complete: {}", idx, e)),
        });
    }
    results
}

/// Zip fan-out results with the nodes they ran on.
///
/// Returns every value when all nodes succeeded, otherwise a
/// [`DeployError::Distribution`] naming each failing node. A result count
/// that differs from the node count is a [`DeployError::Backend`] error.
pub fn collect_node_results<R>(
    step: &str,
    nodes: &[NodeId],
    results: Vec<Result<R>>,
) -> Result<Vec<R>, DeployError> {
    if nodes.len() != results.len() {
        return Err(DeployError::Backend(anyhow!(
            "{}: {} results for {} nodes",
            step,
            results.len(),
            nodes.len()
        )));
    }
    let mut values = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (node, result) in nodes.iter().zip(results) {
        match result {
            Ok(v) => values.push(v),
            Err(e) => failures.push(NodeFailure {
                node: *node,
                error: format!("{:#}", e),
            }),
        }
    }
    if failures.is_empty() {
        Ok(values)
    } else {
        Err(DeployError::distribution(step, failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn run_with_limit(limit: usize) -> Vec<Result<usize>> {
        let items: Vec<usize> = (0..10).collect();
        map_limit(items, limit, |i| async move {
            tokio::time::sleep(Duration::from_millis((10 - i as u64) * 2)).await;
            if i % 3 == 0 {
                anyhow::bail!("item {} failed", i);
            }
            Ok(i * 10)
        })
        .await
    }

    #[tokio::test]
    async fn test_failures_reported_at_input_positions() {
        for limit in [0, 1, 4] {
            let results = run_with_limit(limit).await;
            assert_eq!(results.len(), 10);

            let failed: Vec<usize> = results
                .iter()
                .enumerate()
                .filter(|(_, r)| r.is_err())
                .map(|(i, _)| i)
                .collect();
            assert_eq!(failed, vec![0, 3, 6, 9], "limit {}", limit);

            for (i, r) in results.iter().enumerate() {
                if let Ok(v) = r {
                    assert_eq!(*v, i * 10);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_limit_bounds_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (f_in, f_peak) = (in_flight.clone(), peak.clone());
        let results = map_limit((0..12).collect::<Vec<u32>>(), 4, move |_| {
            let in_flight = f_in.clone();
            let peak = f_peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_panicking_worker_becomes_error() {
        let results = map_limit(vec![1u32, 2, 3], 2, |i| async move {
            if i == 2 {
                panic!("boom");
            }
            Ok(i)
        })
        .await;

        assert_eq!(results[0].as_ref().unwrap(), &1);
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap(), &3);
    }

    #[test]
    fn test_collect_node_results() {
        let nodes = [NodeId(1), NodeId(2), NodeId(3)];
        let ok = collect_node_results("copy", &nodes, vec![Ok(1), Ok(2), Ok(3)]).unwrap();
        assert_eq!(ok, vec![1, 2, 3]);

        let err = collect_node_results(
            "copy",
            &nodes,
            vec![Ok(1), Err(anyhow!("no space")), Err(anyhow!("gone"))],
        )
        .unwrap_err();
        assert_eq!(err.failed_nodes(), vec![NodeId(2), NodeId(3)]);
    }

    #[test]
    fn test_collect_node_results_rejects_count_mismatch() {
        let nodes = [NodeId(1), NodeId(2), NodeId(3)];
        let err = collect_node_results("copy", &nodes, vec![Ok(1), Ok(2)]).unwrap_err();
        assert!(matches!(err, DeployError::Backend(_)));
        assert!(err.to_string().contains("2 results for 3 nodes"));
        assert!(err.failed_nodes().is_empty());
    }
}
