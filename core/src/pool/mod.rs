//! The task pool: proxy storage, prerequisite matching, internal queues,
//! and runahead/stall/housekeeping accounting.

mod prerequisite;
mod proxy;
mod queue;
mod task_pool;

pub use prerequisite::{
    child_point_for_offset, deliver_output, resolve_producer_point, DeliveryResult, PrerequisiteGroup,
};
pub use proxy::{ExternalTriggers, ProxyId, TaskProxy, TaskState, TaskStateParseError, Timers};
pub use queue::{InternalQueue, QueueSet};
pub use task_pool::{RunaheadLimit, TaskPool};
