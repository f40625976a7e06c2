//! Stock opname workflow for Gudang: submission, approval with history
//! locking and balance rebuild, revert, and the resolver seams to master
//! data.

mod error;
mod opname;
mod resolver;
mod service;
mod store;

pub use error::{Conflict, OpnameError, OpnameResult};
pub use opname::{DraftLine, Opname, OpnameDraft, OpnameLine, OpnameStatus};
pub use resolver::{LocationResolver, ProductResolver, ResolveError};
pub use service::{
    ApprovalOutcome, MovementOutcome, MovementRequest, OpnameService, RevertOutcome,
};
pub use store::{MemoryOpnameRepository, OpnameClaim, OpnameRepository, SqliteOpnameRepository};
