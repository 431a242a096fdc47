//! # Marquee Runtime
//!
//! Runtime support for the Marquee scheduling engines.
//!
//! ## Core Components
//!
//! - **Driver**: runs one command through a reducer, executes the effects it
//!   returns and feeds every produced action back until nothing is left
//! - **Retry**: bounded exponential backoff for store failures
//! - **Metrics**: recorder structs and a Prometheus exporter
//!
//! The engines are invoked from short-lived client interactions, so there is
//! no long-running event loop: each [`Driver::run`] call owns its session
//! state, finishes when the feedback queue drains and holds nothing across
//! calls.
//!
//! ## Example
//!
//! ```ignore
//! use marquee_runtime::Driver;
//!
//! let driver = Driver::new(ShowtimeApprovalReducer::new(), environment);
//! let mut session = ApprovalSession::default();
//! let trail = driver
//!     .run(&mut session, ApprovalAction::Approve { request_id, approver })
//!     .await?;
//! ```

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use marquee_core::{effect::Effect, reducer::Reducer};
use std::collections::VecDeque;
use std::time::Instant;

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

use crate::metrics::DriverMetrics;

/// Default bound on actions processed by one [`Driver::run`] call.
pub const DEFAULT_MAX_STEPS: usize = 32;

/// Error types for the driver
pub mod error {
    use thiserror::Error;

    /// Errors that can occur while driving a command to completion
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum DriverError {
        /// The reducer kept producing actions past the configured bound.
        ///
        /// A reducer whose effects always feed back another action would
        /// otherwise never return.
        #[error("Feedback loop exceeded {limit} actions")]
        FeedbackLimit {
            /// Configured bound
            limit: usize,
        },

        /// A detached effect task panicked or was aborted.
        #[error("Effect task failed: {0}")]
        TaskFailed(String),
    }
}

pub use error::DriverError;

/// Drives commands through a reducer and its effects.
///
/// A driver is stateless between calls and can be shared; concurrent calls
/// each pass their own session state.
///
/// # Effect Execution
///
/// Effects returned by one `reduce` call run in the order returned.
/// `Parallel` children run concurrently, `Sequential` children in order.
/// Every `Some(action)` an effect yields is appended to the feedback queue
/// and reduced after the current one.
pub struct Driver<R>
where
    R: Reducer,
{
    reducer: R,
    environment: R::Environment,
    max_steps: usize,
}

impl<R> Driver<R>
where
    R: Reducer + Sync,
    R::State: Send,
    R::Action: Clone + Send + std::fmt::Debug + 'static,
    R::Environment: Sync,
{
    /// Create a driver with the default step bound.
    #[must_use]
    pub const fn new(reducer: R, environment: R::Environment) -> Self {
        Self {
            reducer,
            environment,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Override the bound on actions processed per call.
    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Injected collaborators
    #[must_use]
    pub const fn environment(&self) -> &R::Environment {
        &self.environment
    }

    /// Reduce `action`, execute its effects and every action they feed back.
    ///
    /// Returns the feedback actions in the order they were reduced (the
    /// initial action is not included).
    ///
    /// # Cancellation
    ///
    /// Dropping the returned future abandons the effects not yet started.
    /// Effects that must finish regardless are expected to spawn their work.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::FeedbackLimit`] when more than the configured
    /// number of actions would be processed.
    pub async fn run(
        &self,
        state: &mut R::State,
        action: R::Action,
    ) -> Result<Vec<R::Action>, DriverError> {
        let mut queue = VecDeque::from([action]);
        let mut trail = Vec::new();
        let mut steps = 0usize;

        while let Some(next) = queue.pop_front() {
            steps += 1;
            if steps > self.max_steps {
                DriverMetrics::record_feedback_limit();
                tracing::error!(limit = self.max_steps, "Feedback loop exceeded step bound");
                return Err(DriverError::FeedbackLimit {
                    limit: self.max_steps,
                });
            }

            tracing::trace!(action = ?next, step = steps, "Reducing action");
            let started = Instant::now();
            let effects = self.reducer.reduce(state, next, &self.environment);
            DriverMetrics::record_action(started.elapsed());

            for effect in effects {
                for produced in execute(effect).await {
                    trail.push(produced.clone());
                    queue.push_back(produced);
                }
            }
        }

        Ok(trail)
    }
}

/// Run `future` on its own task and await its output.
///
/// Dropping the returned future does not cancel the work: once spawned it
/// runs to completion on the runtime. Used for commit points that must not be
/// abandoned half way.
///
/// # Errors
///
/// Returns [`DriverError::TaskFailed`] if the task panicked or was aborted.
pub async fn run_detached<F>(future: F) -> Result<F::Output, DriverError>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future)
        .await
        .map_err(|join_error| DriverError::TaskFailed(join_error.to_string()))
}

/// Execute an effect tree, collecting the actions it yields.
fn execute<A>(effect: Effect<A>) -> BoxFuture<'static, Vec<A>>
where
    A: Send + 'static,
{
    async move {
        match effect {
            Effect::None => Vec::new(),
            Effect::Future(future) => {
                let started = Instant::now();
                let produced = future.await;
                DriverMetrics::record_effect(started.elapsed());
                produced.into_iter().collect()
            },
            Effect::Sequential(effects) => {
                let mut produced = Vec::new();
                for effect in effects {
                    produced.extend(execute(effect).await);
                }
                produced
            },
            Effect::Parallel(effects) => join_all(effects.into_iter().map(execute))
                .await
                .into_iter()
                .flatten()
                .collect(),
        }
    }
    .boxed()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use marquee_core::{smallvec, SmallVec};

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum CountdownAction {
        Start(u32),
        Tick(u32),
        Fanout,
        Done,
    }

    #[derive(Default)]
    struct CountdownState {
        ticks: Vec<u32>,
        finished: bool,
    }

    struct CountdownReducer;

    impl Reducer for CountdownReducer {
        type State = CountdownState;
        type Action = CountdownAction;
        type Environment = ();

        fn reduce(
            &self,
            state: &mut CountdownState,
            action: CountdownAction,
            _env: &(),
        ) -> SmallVec<[Effect<CountdownAction>; 4]> {
            match action {
                CountdownAction::Start(n) | CountdownAction::Tick(n) => {
                    state.ticks.push(n);
                    let next = if n == 0 {
                        CountdownAction::Done
                    } else {
                        CountdownAction::Tick(n - 1)
                    };
                    smallvec![Effect::future(async move { Some(next) })]
                },
                CountdownAction::Fanout => smallvec![Effect::Parallel(vec![
                    Effect::future(async { Some(CountdownAction::Done) }),
                    Effect::Sequential(vec![
                        Effect::None,
                        Effect::future(async { None }),
                        Effect::future(async { Some(CountdownAction::Done) }),
                    ]),
                ])],
                CountdownAction::Done => {
                    state.finished = true;
                    SmallVec::new()
                },
            }
        }
    }

    #[tokio::test]
    async fn runs_feedback_until_quiescent() {
        let driver = Driver::new(CountdownReducer, ());
        let mut state = CountdownState::default();

        let trail = driver.run(&mut state, CountdownAction::Start(2)).await.unwrap();

        assert_eq!(state.ticks, vec![2, 1, 0]);
        assert!(state.finished);
        assert_eq!(
            trail,
            vec![
                CountdownAction::Tick(1),
                CountdownAction::Tick(0),
                CountdownAction::Done
            ]
        );
    }

    #[tokio::test]
    async fn nested_effects_yield_every_action() {
        let driver = Driver::new(CountdownReducer, ());
        let mut state = CountdownState::default();

        let trail = driver.run(&mut state, CountdownAction::Fanout).await.unwrap();

        assert_eq!(trail, vec![CountdownAction::Done, CountdownAction::Done]);
    }

    #[tokio::test]
    async fn runaway_feedback_is_bounded() {
        let driver = Driver::new(CountdownReducer, ()).with_max_steps(3);
        let mut state = CountdownState::default();

        let result = driver.run(&mut state, CountdownAction::Start(10)).await;

        assert_eq!(result, Err(DriverError::FeedbackLimit { limit: 3 }));
        assert!(!state.finished);
    }

    #[tokio::test]
    async fn detached_work_survives_caller_drop() {
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let caller = tokio::spawn(run_detached(async move {
            let _ = started_tx.send(());
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let _ = done_tx.send("committed");
        }));
        started_rx.await.unwrap();
        caller.abort();

        assert_eq!(done_rx.await.unwrap(), "committed");
    }

    #[tokio::test]
    #[allow(clippy::panic)]
    async fn detached_panic_is_reported() {
        let should_panic = true;
        let result = run_detached(async move {
            if should_panic {
                panic!("boom");
            }
            1u8
        })
        .await;
        assert!(matches!(result, Err(DriverError::TaskFailed(_))));
    }
}
