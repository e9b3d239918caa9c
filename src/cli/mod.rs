mod command;
mod runner;
mod util;

pub use command::Command;
pub use runner::{OutputMode, Shell, describe, run, run_shell};
pub use util::parse_seed;
