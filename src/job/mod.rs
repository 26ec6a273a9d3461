//! Job lifecycle bookkeeping shared between the orchestrator and its caller.

pub mod guard;
pub mod session;
pub mod state;

pub use guard::ResourceGuard;
pub use session::Session;
pub use state::{JobSnapshot, JobState};
