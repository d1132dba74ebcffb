//! Provisioning workflow: poll a source resource until it is ready, then
//! create the derived resource and record the outcome on the owner.

pub mod clock;
pub mod engine;
pub mod errors;
pub mod registry;
pub mod scheduler;
pub mod transition;
pub mod types;
pub mod writer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::WorkflowEngine;
pub use errors::WorkflowError;
pub use registry::{JobRegistry, PendingSnapshot};
pub use scheduler::{BackgroundScheduler, TickReport};
pub use transition::{SideEffect, TickStart, Transition};
pub use types::{
    DerivedResourceId, Job, JobState, OwnerContext, OwnerId, SourceResourceId, StatusReport,
    UpstreamStatus,
};
pub use writer::PersistenceWriter;
