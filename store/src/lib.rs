//! Run database and checkpointing for the Cylc scheduler core.
//!
//! `cylc-store` owns the schema and the two SQLite handles (private and
//! public). It deliberately knows nothing
//! about cycle points, task proxies, or the prerequisite engine — those
//! live in `cylc-core`, which converts to/from the row types here at the
//! restart-protocol boundary.

pub mod error;
pub mod private;
pub mod public;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use private::PrivateStore;
pub use public::PublicStore;
pub use schema::LATEST_CHECKPOINT_ID;
pub use types::{
    AbsOutputRow, BroadcastStateRow, TaskEventRow, TaskJobRow, TaskOutputRow, TaskPoolRow, WorkflowParams,
    XtriggerRow,
};
