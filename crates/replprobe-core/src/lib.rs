//! Scripted stdin/stdout harness for line-oriented command-line programs.
//!
//! A [`Harness`] launches the program under test, writes a
//! [`CommandSequence`] to its stdin (flushing each command and closing stdin
//! afterwards), waits for output, captures one bounded buffer of stdout, and
//! returns the first lines of it in a [`RunReport`].
//!
//! ```text
//! Harness::run(commands)
//!     |
//!     v
//! process::launch ---> writer::write_commands ---> drain::capture
//!                                                       |
//!     RunReport <--- extract::extract_lines <-----------+
//!     (child torn down on every path after launch)
//! ```

pub mod command;
pub mod config;
pub mod drain;
pub mod error;
pub mod extract;
pub mod harness;
pub mod process;
pub mod report;
pub mod script;
pub mod writer;

pub use command::CommandSequence;
pub use config::{AvailabilityWait, ConfigError, DrainStrategy, HarnessConfig, ProgramSpec};
pub use error::{HarnessError, Phase};
pub use harness::Harness;
pub use report::RunReport;
pub use script::{ScriptError, ScriptToml, parse_script};
