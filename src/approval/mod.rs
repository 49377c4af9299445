//! Approval: permission tiers, the pending queue and the resolved history

mod engine;
mod policy;
mod store;

pub use engine::{ApprovalEngine, SubmitOutcome};
pub use policy::PermissionPolicy;
pub use store::{ActionStore, InMemoryActionStore, SledActionStore, StoreError};
