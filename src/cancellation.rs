//! Cancellation for an upload session: one CancellationToken plus a
//! generation counter, so a response that lands after a cancel is dropped.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Issues generation guards. Advancing cancels every task started under the
/// previous generation.
pub struct TaskGeneration {
    current_token: RwLock<CancellationToken>,
    generation: Arc<AtomicU64>,
}

impl Default for TaskGeneration {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGeneration {
    pub fn new() -> Self {
        Self {
            current_token: RwLock::new(CancellationToken::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cancel the current generation and return a guard for the next one.
    pub fn cancel_and_advance(&self) -> GenerationGuard {
        let mut token_guard = self.current_token.write();
        token_guard.cancel();
        let new_root = CancellationToken::new();
        let child = new_root.child_token();
        *token_guard = new_root;
        let gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        GenerationGuard::new(self.generation.clone(), gen, child)
    }

    /// Guard for the current generation, without cancelling anything.
    pub fn guard(&self) -> GenerationGuard {
        let token_guard = self.current_token.read();
        let gen = self.generation.load(Ordering::SeqCst);
        GenerationGuard::new(self.generation.clone(), gen, token_guard.child_token())
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Cancel in-flight work and make every outstanding guard stale.
    pub fn invalidate(&self) -> u64 {
        self.cancel_and_advance().my_generation()
    }
}

/// Checked by a task before it publishes anything.
#[derive(Clone)]
pub struct GenerationGuard {
    generation: Arc<AtomicU64>,
    my_generation: u64,
    token: CancellationToken,
}

impl GenerationGuard {
    fn new(generation: Arc<AtomicU64>, my_generation: u64, token: CancellationToken) -> Self {
        Self {
            generation,
            my_generation,
            token,
        }
    }

    #[inline]
    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.my_generation
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[inline]
    pub fn should_continue(&self) -> bool {
        !self.is_cancelled() && self.is_current()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn my_generation(&self) -> u64 {
        self.my_generation
    }

    /// Drive `fut` until it completes or this generation is cancelled.
    /// Cancellation drops the future, aborting whatever request it holds.
    /// A result that arrives after the generation moved on is discarded.
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            out = fut => self.is_current().then_some(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn advancing_makes_old_guards_stale() {
        let tasks = TaskGeneration::new();
        let first = tasks.cancel_and_advance();
        assert!(first.should_continue());

        let second = tasks.cancel_and_advance();
        assert!(first.is_cancelled());
        assert!(!first.is_current());
        assert!(second.should_continue());
        assert_eq!(second.my_generation(), 2);
    }

    #[test]
    fn plain_guard_tracks_the_shared_counter() {
        let tasks = TaskGeneration::new();
        let guard = tasks.guard();
        assert!(guard.is_current());
        tasks.invalidate();
        assert!(!guard.is_current());
        assert!(guard.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_a_pending_future() {
        let tasks = Arc::new(TaskGeneration::new());
        let guard = tasks.cancel_and_advance();

        let canceller = tasks.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.invalidate();
        });

        let out = guard
            .run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                "late"
            })
            .await;
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn completed_future_passes_through() {
        let tasks = TaskGeneration::new();
        let guard = tasks.cancel_and_advance();
        assert_eq!(guard.run(async { 7 }).await, Some(7));
    }
}
