//! Messaging: the main loop's inbound queue, task-message interpretation
//! and event-handler dispatch, and external trigger evaluation.

mod bus;
mod events;
mod xtrigger;

pub use bus::{channel, BusReceiver, BusSender};
pub use events::{
    interpret, render_template, standard_substitutions, EventHandlers, EventKind, Interpretation, Severity,
    TaskMessage,
};
pub use xtrigger::{default_poll_interval, evaluate_clock_xtrigger, signature, XtriggerCache, XtriggerResult};
