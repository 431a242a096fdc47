//! # Marquee Scheduling
//!
//! Showtime scheduling engines built on the reducer/effect runtime:
//!
//! - [`conflict`]: classifies a proposed showtime against a screen's ledger
//!   and suggests the next free slot
//! - [`approval`]: the owner to admin workflow for showtime requests and
//!   theatre-owner registrations
//! - [`entitlement`]: rent/buy access for streamed movies
//!
//! ## Example
//!
//! ```no_run
//! use marquee_scheduling::{ApprovalDependencies, ApprovalWorkflow, SchedulingConfig};
//! # async fn demo(deps: ApprovalDependencies, proposal: marquee_core::types::ShowtimeProposal)
//! #     -> Result<(), marquee_scheduling::ApprovalError> {
//! let workflow = ApprovalWorkflow::new(deps, SchedulingConfig::from_env());
//!
//! let receipt = workflow.propose(proposal).await?;
//! if let Some(advisory) = &receipt.advisory {
//!     println!("Competing request for {:?}", advisory.conflicting_movie_title);
//! }
//! # Ok(())
//! # }
//! ```

pub mod approval;
pub mod config;
pub mod conflict;
pub mod entitlement;
pub mod error;

pub use approval::{ApprovalDependencies, ApprovalWorkflow, Decision, SubmissionReceipt};
pub use config::SchedulingConfig;
pub use conflict::ConflictDetector;
pub use entitlement::EntitlementTracker;
pub use error::{ApprovalError, EntitlementError};
