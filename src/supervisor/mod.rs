//! Supervisor: the control loop and everything it owns

mod alerts;
mod commands;
mod control_loop;
mod feed;
mod schedule;
mod snapshot;

pub use alerts::AlertLimiter;
pub use commands::{
    command_channel, Advisor, Command, CommandError, CommandSender, NullAdvisor, OperatorCommand,
};
pub use control_loop::{Collaborators, ControlLoop};
pub use feed::{EventFeed, FeedEntry, FeedLevel};
pub use schedule::{Check, CheckSchedule};
pub use snapshot::{SharedSnapshot, SupervisorSnapshot};
