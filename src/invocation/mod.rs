//! Remote invocation engine (§4.F): resolves an actor identity to a
//! hosting node, issues the call through an abstract `Remote`, classifies
//! the outcome, and retries with exponential backoff across candidates
//! and cycles until success, an application error, or exhaustion.

mod backoff;

pub use backoff::ExponentialBackOff;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;

use crate::placement::PlacementRegistry;
use crate::types::{ActorId, ApplicationError, CoreError, FrameworkError, FrameworkErrorCode, NodeName};

/// One method-call request to be routed to whichever node hosts `id`.
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    pub destination: NodeName,
    pub actor_id: ActorId,
    pub action_name: String,
    pub arguments: Vec<u8>,
    /// Caller-supplied deadline for this attempt (§6). `None` means no
    /// deadline; the `Remote` implementation may use it to bound its own
    /// transport-level wait.
    pub deadline: Option<Instant>,
}

/// The outcome of one remote call attempt.
#[derive(Debug, Clone)]
pub enum InvokeOutcome {
    /// A framework-level failure: retriable while attempts remain.
    Error { code: FrameworkErrorCode, message: String },
    /// The callee's runtime responded, with either a successful body or
    /// an application-level error raised by the actor's own logic.
    Content(ContentResult),
}

#[derive(Debug, Clone)]
pub enum ContentResult {
    Result(Vec<u8>),
    Error(ApplicationError),
}

/// Abstract remote transport. The engine never frames or transports
/// bytes itself; it only classifies what `Remote::invoke` hands back.
#[async_trait]
pub trait Remote: Send + Sync {
    async fn invoke(&self, options: InvokeOptions) -> InvokeOutcome;
}

/// One recorded attempt of a single logical call, in the order it ran.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub destination: NodeName,
    pub outcome_code: Option<FrameworkErrorCode>,
    pub at: Instant,
}

/// Drives retries for one logical proxy call against a placement
/// registry and an abstract `Remote`. A single call is strictly
/// sequential: no two attempts of the same call overlap.
pub struct InvocationEngine {
    registry: Arc<PlacementRegistry>,
    remote: Arc<dyn Remote>,
    backoff: ExponentialBackOff,
}

impl InvocationEngine {
    pub fn new(registry: Arc<PlacementRegistry>, remote: Arc<dyn Remote>, backoff: ExponentialBackOff) -> Self {
        Self { registry, remote, backoff }
    }

    /// Invoke `action_name` with `arguments` against the actor identified
    /// by `id`, retrying through location and transport failures per
    /// §4.F until success, an application error, or attempt exhaustion.
    pub async fn invoke(&self, id: &ActorId, action_name: &str, arguments: Vec<u8>) -> Result<Vec<u8>, CoreError> {
        self.invoke_with_deadline(id, action_name, arguments, None).await
    }

    /// As [`invoke`](Self::invoke), but aborts the attempt in progress and
    /// returns `TimedOut` the moment `deadline` passes, per §4.F step 7 and
    /// §6's `deadline?`. `None` behaves exactly like `invoke`.
    pub async fn invoke_with_deadline(
        &self,
        id: &ActorId,
        action_name: &str,
        arguments: Vec<u8>,
        deadline: Option<Instant>,
    ) -> Result<Vec<u8>, CoreError> {
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut cycle = 0usize;

        loop {
            if past_deadline(deadline) {
                return Err(self.timed_out(&attempts));
            }

            let candidates = match race_deadline(self.resolve_or_wait(id, cycle), deadline).await {
                Some(c) => c,
                None => return Err(self.timed_out(&attempts)),
            };
            let candidates = match candidates {
                Some(c) => c,
                None => {
                    attempts.push(AttemptRecord {
                        destination: NodeName::new("<unresolved>"),
                        outcome_code: Some(FrameworkErrorCode::Unregistered),
                        at: Instant::now(),
                    });
                    if cycle >= self.backoff.attempts() as usize {
                        return Err(self.exhausted(&attempts));
                    }
                    cycle += 1;
                    continue;
                }
            };

            for destination in &candidates {
                if past_deadline(deadline) {
                    return Err(self.timed_out(&attempts));
                }
                let options = InvokeOptions {
                    destination: destination.clone(),
                    actor_id: id.clone(),
                    action_name: action_name.to_string(),
                    arguments: arguments.clone(),
                    deadline,
                };
                let outcome = match race_deadline(self.remote.invoke(options), deadline).await {
                    Some(o) => o,
                    None => return Err(self.timed_out(&attempts)),
                };
                match outcome {
                    InvokeOutcome::Content(ContentResult::Result(body)) => return Ok(body),
                    InvokeOutcome::Content(ContentResult::Error(app_err)) => {
                        return Err(CoreError::Application(app_err));
                    }
                    InvokeOutcome::Error { code, message } => {
                        tracing::warn!(
                            actor_type = %id.actor_type,
                            destination = %destination,
                            ?code,
                            %message,
                            "invocation attempt failed"
                        );
                        attempts.push(AttemptRecord {
                            destination: destination.clone(),
                            outcome_code: Some(code),
                            at: Instant::now(),
                        });
                        // Next candidate in the same cycle, no delay.
                    }
                }
            }

            // Wait out this cycle's backoff window before deciding whether
            // attempts are exhausted, matching `resolve_or_wait`'s wait in
            // the unregistered-type branch above: the full `attempts + 1`
            // windows elapse even on the final, failing cycle.
            let delay = self.backoff.delay(cycle);
            tracing::debug!(cycle, ?delay, "backing off before next invocation cycle");
            if race_deadline(tokio::time::sleep(delay), deadline).await.is_none() {
                return Err(self.timed_out(&attempts));
            }

            if cycle >= self.backoff.attempts() as usize {
                tracing::error!(actor_type = %id.actor_type, attempts = attempts.len(), "invocation exhausted all attempts");
                return Err(self.exhausted(&attempts));
            }
            cycle += 1;
        }
    }

    async fn resolve_or_wait(&self, id: &ActorId, cycle: usize) -> Option<Vec<NodeName>> {
        let candidates = self.registry.resolve(id);
        if !candidates.is_empty() {
            return Some(candidates);
        }
        let wait = self.backoff.delay(cycle).max(Duration::from_millis(1));
        let seq = self.registry.sequence();
        self.registry.wait_for_change(seq, wait).await?;
        let candidates = self.registry.resolve(id);
        if candidates.is_empty() {
            None
        } else {
            Some(candidates)
        }
    }

    fn exhausted(&self, attempts: &[AttemptRecord]) -> CoreError {
        let nested: Vec<FrameworkError> = attempts
            .iter()
            .map(|a| {
                FrameworkError::new(
                    a.outcome_code.unwrap_or(FrameworkErrorCode::Other),
                    format!("attempt against {} failed", a.destination),
                )
            })
            .collect();
        CoreError::Framework(FrameworkError::with_nested(
            FrameworkErrorCode::TimedOut,
            format!("exhausted {} attempts", attempts.len()),
            nested,
        ))
    }

    /// §4.F step 7 / §5 cancellation: a caller deadline aborts the current
    /// attempt and surfaces `TimedOut` with every attempt made so far.
    fn timed_out(&self, attempts: &[AttemptRecord]) -> CoreError {
        let nested: Vec<FrameworkError> = attempts
            .iter()
            .map(|a| {
                FrameworkError::new(
                    a.outcome_code.unwrap_or(FrameworkErrorCode::Other),
                    format!("attempt against {} failed", a.destination),
                )
            })
            .collect();
        CoreError::Framework(FrameworkError::with_nested(
            FrameworkErrorCode::TimedOut,
            format!("call deadline passed after {} attempts", attempts.len()),
            nested,
        ))
    }
}

fn past_deadline(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Race `fut` against `deadline`; `None` means the deadline won first and
/// `fut` was dropped without completing.
async fn race_deadline<T>(fut: impl std::future::Future<Output = T>, deadline: Option<Instant>) -> Option<T> {
    match deadline {
        None => Some(fut.await),
        Some(d) => {
            let now = Instant::now();
            if now >= d {
                return None;
            }
            tokio::select! {
                result = fut => Some(result),
                _ = tokio::time::sleep(d - now) => None,
            }
        }
    }
}

/// Add uniform jitter in `[0, 0.25 * delay]`, per §4.F step 5.
pub(crate) fn jitter(base: Duration) -> Duration {
    let max_extra = base.mul_f64(0.25);
    if max_extra.is_zero() {
        return base;
    }
    let extra_ms = rand::thread_rng().gen_range(0..=max_extra.as_millis().max(1) as u64);
    base + Duration::from_millis(extra_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysUnreachable;

    #[async_trait]
    impl Remote for AlwaysUnreachable {
        async fn invoke(&self, _options: InvokeOptions) -> InvokeOutcome {
            InvokeOutcome::Error { code: FrameworkErrorCode::Unreachable, message: "down".into() }
        }
    }

    struct AlwaysApplicationError;

    #[async_trait]
    impl Remote for AlwaysApplicationError {
        async fn invoke(&self, _options: InvokeOptions) -> InvokeOutcome {
            InvokeOutcome::Content(ContentResult::Error(ApplicationError::new("BAD_INPUT", "nope")))
        }
    }

    struct CountingSuccess(Arc<AtomicUsize>);

    #[async_trait]
    impl Remote for CountingSuccess {
        async fn invoke(&self, _options: InvokeOptions) -> InvokeOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            InvokeOutcome::Content(ContentResult::Result(b"ok".to_vec()))
        }
    }

    fn test_id() -> ActorId {
        ActorId::new("Order", vec!["1".into()])
    }

    #[tokio::test]
    async fn unregistered_type_exhausts_after_backoff_window() {
        let registry = Arc::new(PlacementRegistry::new());
        let engine = InvocationEngine::new(registry, Arc::new(AlwaysUnreachable), ExponentialBackOff::new(Duration::from_millis(10), 4));
        let start = Instant::now();
        let err = engine.invoke(&test_id(), "do", vec![]).await.unwrap_err();
        assert!(err.is_retriable());
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn framework_error_on_every_attempt_records_all_and_retries() {
        let registry = Arc::new(PlacementRegistry::new());
        registry.add_mapping("Order", "n1", None, None);
        let engine = InvocationEngine::new(registry, Arc::new(AlwaysUnreachable), ExponentialBackOff::new(Duration::from_millis(10), 4));
        let start = Instant::now();
        let err = engine.invoke(&test_id(), "do", vec![]).await.unwrap_err();
        match err {
            CoreError::Framework(f) => {
                assert_eq!(f.nested.len(), 5);
                assert_eq!(f.first_code(), FrameworkErrorCode::Unreachable);
            }
            _ => panic!("expected framework error"),
        }
        // §8: "registered type returning framework error on every
        // attempt … elapsed ≥1500 ms" — the engine waits out the backoff
        // window of the final, failing cycle too, not just the first four.
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn application_error_terminates_on_first_attempt() {
        let registry = Arc::new(PlacementRegistry::new());
        registry.add_mapping("Order", "n1", None, None);
        let engine = InvocationEngine::new(registry, Arc::new(AlwaysApplicationError), ExponentialBackOff::new(Duration::from_millis(10), 4));
        let start = Instant::now();
        let err = engine.invoke(&test_id(), "do", vec![]).await.unwrap_err();
        assert!(!err.is_retriable());
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn success_returns_result_body() {
        let registry = Arc::new(PlacementRegistry::new());
        registry.add_mapping("Order", "n1", None, None);
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = InvocationEngine::new(registry, Arc::new(CountingSuccess(calls.clone())), ExponentialBackOff::new(Duration::from_millis(10), 4));
        let body = engine.invoke(&test_id(), "do", vec![]).await.unwrap();
        assert_eq!(body, b"ok".to_vec());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct HangsForever;

    #[async_trait]
    impl Remote for HangsForever {
        async fn invoke(&self, _options: InvokeOptions) -> InvokeOutcome {
            std::future::pending::<()>().await;
            unreachable!("deadline should have aborted this attempt first")
        }
    }

    #[tokio::test]
    async fn deadline_aborts_a_hanging_attempt() {
        let registry = Arc::new(PlacementRegistry::new());
        registry.add_mapping("Order", "n1", None, None);
        let engine = InvocationEngine::new(registry, Arc::new(HangsForever), ExponentialBackOff::new(Duration::from_millis(10), 4));
        let deadline = Instant::now() + Duration::from_millis(50);
        let start = Instant::now();
        let err = engine
            .invoke_with_deadline(&test_id(), "do", vec![], Some(deadline))
            .await
            .unwrap_err();
        assert!(start.elapsed() < Duration::from_millis(500));
        match err {
            CoreError::Framework(f) => assert_eq!(f.code, FrameworkErrorCode::TimedOut),
            _ => panic!("expected framework timeout error"),
        }
    }

    #[tokio::test]
    async fn deadline_already_passed_times_out_without_any_attempt() {
        let registry = Arc::new(PlacementRegistry::new());
        registry.add_mapping("Order", "n1", None, None);
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = InvocationEngine::new(registry, Arc::new(CountingSuccess(calls.clone())), ExponentialBackOff::new(Duration::from_millis(10), 4));
        let deadline = Instant::now() - Duration::from_millis(1);
        let err = engine
            .invoke_with_deadline(&test_id(), "do", vec![], Some(deadline))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Framework(f) if f.code == FrameworkErrorCode::TimedOut));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn late_mapping_lets_a_waiting_call_succeed() {
        let registry = Arc::new(PlacementRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = Arc::new(InvocationEngine::new(
            registry.clone(),
            Arc::new(CountingSuccess(calls.clone())),
            ExponentialBackOff::new(Duration::from_millis(100), 4),
        ));
        let started = Instant::now();
        let engine2 = engine.clone();
        let handle = tokio::spawn(async move { engine2.invoke(&test_id(), "do", vec![]).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        registry.add_mapping("Order", "late-node", None, None);
        let result = handle.await.unwrap();
        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
