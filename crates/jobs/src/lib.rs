//! Job lifecycle tracking for crewdeck.
//!
//! A [`JobStore`] owns every job record, a [`ProgressBroadcaster`] fans
//! progress out to subscribed connections, and a [`JobRunner`] drives each
//! job from `running` to a terminal state while feeding both.

pub mod broadcast;
pub mod error;
pub mod runner;
pub mod sanitize;
pub mod store;
pub mod types;

pub use broadcast::{EventSender, ProgressBroadcaster, SubscriberId};
pub use error::{DeliveryError, JobError};
pub use runner::{JobRunner, ProgressReporter, WorkContext};
pub use sanitize::Sanitizer;
pub use store::JobStore;
pub use types::{EventKind, Job, JobEvent, JobId, JobPhase, JobSnapshot, JobStatus, JobUpdate};
