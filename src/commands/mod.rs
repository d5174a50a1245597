//! Slash commands issued in issue and pull request comments.
//!
//! ```
//! use otto::commands::{is_slash_command, parse_slash_command};
//!
//! let body = "Looking into it.\n/oncall ack";
//! assert!(is_slash_command(body));
//!
//! let cmd = parse_slash_command(body).unwrap();
//! assert_eq!(cmd.name, "oncall");
//! assert_eq!(cmd.args, vec!["ack"]);
//! ```

mod parser;
mod types;

pub use parser::{is_slash_command, parse_slash_command, parse_slash_commands};
pub use types::{CommandContext, SlashCommand};
