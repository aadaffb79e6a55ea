mod logic;
mod trigger;

pub use logic::run_scheduled;
pub use trigger::{CronTrigger, Schedule};

#[cfg(test)]
pub(crate) use trigger::trigger_channel;
