//! # Marquee Core
//!
//! Core traits and value types for showtime scheduling.
//!
//! This crate holds everything the scheduling engines share without doing any
//! I/O themselves:
//!
//! - **Reducer / Effect**: pure decision functions that return effect
//!   descriptions for the runtime to execute
//! - **Interval Model**: a showtime's occupied time range and overlap testing
//! - **Domain types**: identifiers, showtime and owner-registration requests,
//!   conflict results, streaming entitlements
//! - **Collaborator contracts**: the ledger, registration store, entitlement
//!   store, notifier and movie catalog the engines are wired to
//!
//! ## Example
//!
//! ```
//! use chrono::{NaiveDate, NaiveTime};
//! use marquee_core::interval::Interval;
//!
//! let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap_or_default();
//! let evening = Interval::for_showtime(
//!     date,
//!     NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
//!     120,
//!     15,
//! );
//! let late = Interval::for_showtime(
//!     date,
//!     NaiveTime::from_hms_opt(20, 15, 0).unwrap_or_default(),
//!     90,
//!     15,
//! );
//!
//! // Half-open: ending exactly when the next one starts is not an overlap
//! assert!(!evening.overlaps(&late));
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{smallvec, SmallVec};

pub mod catalog;
pub mod entitlement;
pub mod interval;
pub mod ledger;
pub mod notify;
pub mod registration;
pub mod types;

/// Reducer module - pure decision logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
/// Every engine decision (is this request still pending, is a reason present,
/// did the commit land) is made inside a reducer so it can be tested without
/// a store.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for engine decisions
    ///
    /// # Type Parameters
    ///
    /// - `State`: The session state this reducer operates on
    /// - `Action`: Commands from callers and results fed back by effects
    /// - `Environment`: The injected collaborators this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// Implementations validate the action, update state in place and
        /// return descriptions of the I/O that should follow. They never
        /// perform I/O themselves.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects are values returned by reducers and executed by the runtime
/// driver. Actions produced by effects are fed back into the same reducer.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;

    /// Effect type - describes a side effect to be executed
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects concurrently, feeding back every produced action
        Parallel(Vec<Effect<Action>>),

        /// Run effects one after another, in order
        Sequential(Vec<Effect<Action>>),

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Wrap an async block producing an optional feedback action
        pub fn future<F>(future: F) -> Self
        where
            F: Future<Output = Option<Action>> + Send + 'static,
        {
            Effect::Future(Box::pin(future))
        }

        /// Whether this effect does nothing when executed
        #[must_use]
        pub fn is_none(&self) -> bool {
            match self {
                Effect::None => true,
                Effect::Parallel(effects) | Effect::Sequential(effects) => {
                    effects.iter().all(Effect::is_none)
                },
                Effect::Future(_) => false,
            }
        }
    }
}

/// Environment module - time abstraction
///
/// Collaborator traits live in their own modules ([`ledger`], [`registration`],
/// [`entitlement`], [`notify`], [`catalog`]); the clock lives here because every
/// engine needs it.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock backed by [`Utc::now`]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
