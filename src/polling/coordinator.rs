//! Async driver that polls one target until its payload is ready or the retry
//! budget runs out.
//!
//! The coordinator owns a [`RetrySession`] behind a mutex and publishes every
//! accepted transition on a `watch` channel. Each target gets its own loop
//! task with a child [`CancellationToken`]; switching targets cancels the old
//! loop and any result it still produces is discarded.

use super::backoff::{sleep_with_cancellation, DelayPolicy, SleepOutcome};
use super::predicate::Completion;
use super::session::{AttemptOutcome, PollEvent, PollState, RetrySession};
use crate::fetch::{FetchExecutor, FetchFuture, FetchRequest};
use crate::runtime::config::CoordinatorConfig;
use crate::runtime::telemetry::Telemetry;
use anyhow::Result;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

type FetchFn<T> = dyn Fn(&str) -> FetchFuture<T> + Send + Sync;

/// Caller-visible terminal conditions of [`PollingCoordinator::wait_for_outcome`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("no polling target has been set")]
    Idle,
    /// Degraded state: the data may still show up later.
    #[error("{target} still processing after {attempts} attempts")]
    BudgetExhausted { target: String, attempts: u32 },
    #[error("polling target changed from {previous} while waiting")]
    Retargeted { previous: String },
    #[error("polling coordinator shut down")]
    Shutdown,
}

struct CoordinatorState<T> {
    session: RetrySession<T>,
    loop_token: Option<CancellationToken>,
}

impl<T> CoordinatorState<T> {
    fn apply(&mut self, event: PollEvent<T>) {
        let placeholder = RetrySession::new(self.session.max_attempts());
        let session = std::mem::replace(&mut self.session, placeholder);
        self.session = session.apply(event);
    }
}

struct CoordinatorInner<T> {
    state: Mutex<CoordinatorState<T>>,
    updates: watch::Sender<RetrySession<T>>,
    fetch: Box<FetchFn<T>>,
    predicate: Box<dyn Completion<T>>,
    delay: DelayPolicy,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
}

/// Polls a target with a bounded number of sequential attempts.
///
/// Share it behind an `Arc`; dropping the coordinator stops its loops.
pub struct PollingCoordinator<T> {
    inner: Arc<CoordinatorInner<T>>,
}

impl<T> PollingCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F, C>(config: &CoordinatorConfig, fetch: F, predicate: C) -> Self
    where
        F: Fn(&str) -> FetchFuture<T> + Send + Sync + 'static,
        C: Completion<T>,
    {
        Self::with_telemetry(config, Arc::new(Telemetry::default()), fetch, predicate)
    }

    pub fn with_telemetry<F, C>(
        config: &CoordinatorConfig,
        telemetry: Arc<Telemetry>,
        fetch: F,
        predicate: C,
    ) -> Self
    where
        F: Fn(&str) -> FetchFuture<T> + Send + Sync + 'static,
        C: Completion<T>,
    {
        let session = RetrySession::new(config.max_attempts());
        let (updates, _) = watch::channel(session.clone());
        Self {
            inner: Arc::new(CoordinatorInner {
                state: Mutex::new(CoordinatorState {
                    session,
                    loop_token: None,
                }),
                updates,
                fetch: Box::new(fetch),
                predicate: Box::new(predicate),
                delay: config.delay(),
                telemetry,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.inner.telemetry.clone()
    }

    /// Points the coordinator at `target` and starts polling it.
    ///
    /// Repeating the current target is a no-op, whatever state it is in.
    /// A different target resets the session, cancels the previous loop and
    /// starts a fresh one. Must be called from within a tokio runtime.
    pub fn set_target(&self, target: impl Into<String>) {
        let target = target.into();
        let mut state = self.inner.lock_state();

        if state.session.is_current(&target) && state.session.state() != PollState::Idle {
            tracing::trace!(poll_target = %target, "polling target unchanged; ignoring");
            return;
        }

        if let Some(previous) = state.loop_token.take() {
            previous.cancel();
        }
        state.apply(PollEvent::Retarget(target.clone()));
        self.inner.updates.send_replace(state.session.clone());

        let token = self.inner.shutdown.child_token();
        state.loop_token = Some(token.clone());
        drop(state);

        tracing::debug!(poll_target = %target, "polling target set");
        tokio::spawn(drive(Arc::clone(&self.inner), target, token));
    }

    /// Starts a fresh budget for the current target after it succeeded or
    /// degraded. Returns `false` when there is nothing to restart.
    pub fn refresh(&self) -> bool {
        let mut state = self.inner.lock_state();
        if !state.session.accepts(&PollEvent::Restart) {
            return false;
        }
        let Some(target) = state.session.target().map(str::to_owned) else {
            return false;
        };

        state.apply(PollEvent::Restart);
        self.inner.updates.send_replace(state.session.clone());

        let token = self.inner.shutdown.child_token();
        if let Some(previous) = state.loop_token.replace(token.clone()) {
            previous.cancel();
        }
        drop(state);

        tracing::debug!(poll_target = %target, "polling target refreshed");
        tokio::spawn(drive(Arc::clone(&self.inner), target, token));
        true
    }

    /// Current session state.
    pub fn snapshot(&self) -> RetrySession<T> {
        self.inner.lock_state().session.clone()
    }

    /// Receives every accepted transition.
    pub fn subscribe(&self) -> watch::Receiver<RetrySession<T>> {
        self.inner.updates.subscribe()
    }

    /// Waits until the current target reaches a terminal state.
    ///
    /// Budget exhaustion is reported as [`PollError::BudgetExhausted`]; the
    /// individual attempt failures that led there are not surfaced.
    pub async fn wait_for_outcome(&self) -> Result<T, PollError> {
        let mut updates = self.inner.updates.subscribe();
        let target = match updates.borrow().target() {
            Some(target) => target.to_owned(),
            None => return Err(PollError::Idle),
        };

        loop {
            {
                let session = updates.borrow_and_update();
                if !session.is_current(&target) {
                    return Err(PollError::Retargeted { previous: target });
                }
                match session.state() {
                    PollState::Succeeded => {
                        if let Some(result) = session.result() {
                            return Ok(result.clone());
                        }
                    }
                    PollState::Exhausted => {
                        return Err(PollError::BudgetExhausted {
                            target,
                            attempts: session.attempts(),
                        });
                    }
                    PollState::Idle | PollState::Fetching => {}
                }
            }

            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return Err(PollError::Shutdown),
                changed = updates.changed() => {
                    if changed.is_err() {
                        return Err(PollError::Shutdown);
                    }
                }
            }
        }
    }

    /// Stops every polling loop. The last published session stays readable.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

impl PollingCoordinator<Value> {
    /// Polls through an application executor, e.g. a
    /// [`DedupExecutor`](crate::dedup::DedupExecutor) so concurrent pollers of
    /// the same resource share requests.
    pub fn for_executor<E, R, C>(
        config: &CoordinatorConfig,
        telemetry: Arc<Telemetry>,
        executor: E,
        request: R,
        predicate: C,
    ) -> Self
    where
        E: FetchExecutor,
        R: Fn(&str) -> Result<FetchRequest> + Send + Sync + 'static,
        C: Completion<Value>,
    {
        let fetch = move |target: &str| -> FetchFuture {
            match request(target) {
                Ok(request) => executor.execute(request),
                Err(err) => Box::pin(async move { Err(err) }),
            }
        };
        Self::with_telemetry(config, telemetry, fetch, predicate)
    }
}

impl<T> Drop for PollingCoordinator<T> {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl<T> CoordinatorInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn lock_state(&self) -> std::sync::MutexGuard<'_, CoordinatorState<T>> {
        self.state.lock().expect("polling coordinator mutex poisoned")
    }

    /// Applies `event` unless the loop that produced it was cancelled or the
    /// session rejects it. Returns the new session when accepted.
    fn transition(
        &self,
        event: PollEvent<T>,
        token: &CancellationToken,
    ) -> Option<RetrySession<T>> {
        let mut state = self.lock_state();
        if token.is_cancelled() || !state.session.accepts(&event) {
            return None;
        }
        state.apply(event);
        self.updates.send_replace(state.session.clone());
        Some(state.session.clone())
    }

    fn classify(&self, result: Result<T>) -> AttemptOutcome<T> {
        match result {
            Ok(payload) if self.predicate.is_complete(&payload) => AttemptOutcome::Ready(payload),
            Ok(_) => AttemptOutcome::Incomplete,
            Err(err) => AttemptOutcome::Failed(format!("{err:#}")),
        }
    }

    /// Counts and logs an outcome that the session accepted.
    fn record_outcome(&self, target: &str, attempt: u32, outcome: &AttemptOutcome<T>) {
        match outcome {
            AttemptOutcome::Ready(_) => {}
            AttemptOutcome::Incomplete => {
                self.telemetry.record_incomplete();
                tracing::debug!(poll_target = %target, attempt, "payload not ready yet");
            }
            AttemptOutcome::Failed(message) => {
                self.telemetry.record_fetch_failure();
                tracing::warn!(poll_target = %target, attempt, error = %message, "polling attempt failed");
            }
        }
    }
}

/// Runs one fetch and its completion check on a separate task, so a panic in
/// either settles as a failed attempt instead of stalling the session.
async fn run_attempt<T>(
    inner: &Arc<CoordinatorInner<T>>,
    target: &str,
) -> Option<AttemptOutcome<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let mut attempt = tokio::spawn({
        let inner = Arc::clone(inner);
        let target = target.to_owned();
        async move {
            let result = (inner.fetch)(target.as_str()).await;
            inner.classify(result)
        }
    });

    tokio::select! {
        _ = inner.shutdown.cancelled() => {
            attempt.abort();
            None
        }
        joined = &mut attempt => Some(match joined {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => {
                AttemptOutcome::Failed(format!("polling attempt for {target} panicked"))
            }
            Err(_) => AttemptOutcome::Failed(format!("polling attempt for {target} was aborted")),
        }),
    }
}

async fn drive<T>(inner: Arc<CoordinatorInner<T>>, target: String, token: CancellationToken)
where
    T: Clone + Send + Sync + 'static,
{
    loop {
        let started = PollEvent::AttemptStarted {
            target: target.clone(),
        };
        let Some(session) = inner.transition(started, &token) else {
            break;
        };
        let attempt = session.attempts() + 1;
        inner.telemetry.record_attempt();
        tracing::trace!(poll_target = %target, attempt, "polling attempt started");

        // A retarget does not interrupt the fetch itself: its result is
        // dropped by `transition` once it settles.
        let Some(outcome) = run_attempt(&inner, &target).await else {
            break;
        };

        let settled = PollEvent::AttemptSettled {
            target: target.clone(),
            outcome: outcome.clone(),
        };
        let Some(session) = inner.transition(settled, &token) else {
            inner.telemetry.record_stale_discard();
            tracing::debug!(poll_target = %target, attempt, "discarding result for superseded target");
            break;
        };
        inner.record_outcome(&target, attempt, &outcome);

        match session.state() {
            PollState::Succeeded => {
                inner.telemetry.record_succeeded();
                tracing::info!(poll_target = %target, attempts = session.attempts(), "polling target ready");
                break;
            }
            PollState::Exhausted => {
                inner.telemetry.record_exhausted();
                tracing::warn!(
                    poll_target = %target,
                    attempts = session.attempts(),
                    last_error = session.last_error().unwrap_or("none"),
                    "polling budget exhausted; reporting degraded state"
                );
                break;
            }
            PollState::Fetching => {
                let delay = inner.delay.delay_after(session.attempts());
                tracing::debug!(
                    poll_target = %target,
                    attempt,
                    backoff_ms = delay.as_millis().min(u128::from(u64::MAX)) as u64,
                    "scheduling next polling attempt"
                );
                if let SleepOutcome::Cancelled = sleep_with_cancellation(delay, &token).await {
                    break;
                }
            }
            PollState::Idle => break,
        }
    }
}
