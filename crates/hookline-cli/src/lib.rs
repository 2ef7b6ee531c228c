//! Crate implementing the CLI commands.

mod cli;
mod config;
mod dump;
mod run;

pub use self::cli::{CliAction, CliOpts, CliTarget};
pub use self::config::{RelayConfig, ReplyConfig, ReplyError};
pub use self::dump::{dump_event_to_kdl_node, write_events};
pub use self::run::{REPLAY_PID, evaluate_check_config, evaluate_replay};
