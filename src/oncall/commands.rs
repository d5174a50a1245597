//! `/oncall` subcommands.

use thiserror::Error;

/// The slash-command name this module answers to.
pub const COMMAND: &str = "oncall";

pub const USAGE: &str = "Usage:\n\
    - `/oncall page <schedule> [title]` page the on-call responder for this issue\n\
    - `/oncall ack` acknowledge your assignment\n\
    - `/oncall done` complete the on-call task(s) for this issue\n\
    - `/oncall escalate` hand the task to the next responder\n\
    - `/oncall status` show on-call tasks for this issue";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnCallCommand {
    Page {
        schedule: String,
        title: Option<String>,
    },
    Ack,
    Done,
    Escalate,
    Status,
}

impl OnCallCommand {
    /// Metric label for the subcommand.
    pub fn label(&self) -> &'static str {
        match self {
            OnCallCommand::Page { .. } => "page",
            OnCallCommand::Ack => "ack",
            OnCallCommand::Done => "done",
            OnCallCommand::Escalate => "escalate",
            OnCallCommand::Status => "status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("missing subcommand")]
    MissingSubcommand,

    #[error("unknown subcommand: {0}")]
    UnknownSubcommand(String),

    #[error("`page` needs a schedule name")]
    MissingSchedule,
}

/// Parses the arguments following `/oncall`.
pub fn parse_oncall_command(args: &[String]) -> Result<OnCallCommand, CommandError> {
    let (sub, rest) = args.split_first().ok_or(CommandError::MissingSubcommand)?;

    match sub.to_ascii_lowercase().as_str() {
        "page" => {
            let (schedule, title) = rest.split_first().ok_or(CommandError::MissingSchedule)?;
            let title = (!title.is_empty()).then(|| title.join(" "));
            Ok(OnCallCommand::Page {
                schedule: schedule.clone(),
                title,
            })
        }
        "ack" | "acknowledge" => Ok(OnCallCommand::Ack),
        "done" | "complete" | "resolve" => Ok(OnCallCommand::Done),
        "escalate" => Ok(OnCallCommand::Escalate),
        "status" => Ok(OnCallCommand::Status),
        _ => Err(CommandError::UnknownSubcommand(sub.clone())),
    }
}
