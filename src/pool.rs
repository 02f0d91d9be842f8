use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinError;

/// Runs tasks with at most `width` of them in flight at any time.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    width: usize,
}

impl WorkerPool {
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(width)),
            width,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Spawns one task per item and waits for all of them. Results come back in item order;
    /// a panicking task yields its `JoinError` without affecting the others.
    pub async fn run_all<T, F, Fut>(&self, items: Vec<T>, task: F) -> Vec<Result<Fut::Output, JoinError>>
    where
        F: Fn(T) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let handles: Vec<_> = items
            .into_iter()
            .map(|item| {
                let semaphore = Arc::clone(&self.semaphore);
                let fut = task(item);
                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("worker pool semaphore is closed");
                    fut.await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_width_and_keeps_order() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = pool
            .run_all((0..8).collect(), |n: u32| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    n * 10
                }
            })
            .await;

        let values: Vec<u32> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 10, 20, 30, 40, 50, 60, 70]);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn panicking_task_is_isolated() {
        let pool = WorkerPool::new(3);
        let results = pool
            .run_all(vec![1, 2, 3], |n: u32| async move {
                if n == 2 {
                    panic!("boom");
                }
                n
            })
            .await;
        assert!(results[0].is_ok());
        assert!(results[1].as_ref().is_err_and(|e| e.is_panic()));
        assert_eq!(results[2].as_ref().ok(), Some(&3));
    }

    #[test]
    fn zero_width_is_clamped() {
        assert_eq!(WorkerPool::new(0).width(), 1);
    }
}
