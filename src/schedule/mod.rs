// Schedule drivers and parsing: the cron tick loop for periodic jobs, the
// one-shot timer for scheduled one-time jobs, and the schedule-literal
// parser.

pub mod cron;
pub mod parse;
pub mod timer;

pub use cron::{next_occurrence, parse_cron, CronDriver, CronDrain, EntryId};
pub use parse::{cron_to_english, parse_duration_literal, parse_schedule};
pub use timer::{run_at, ScheduledTimer};
