//! Slash-command recognition in free text.
//!
//! A command is a line whose trimmed form starts with a single `/` followed
//! by at least one more character. Lines starting with `//` are not commands,
//! which keeps code comments pasted into issue bodies from triggering the bot.

use super::types::SlashCommand;

/// Returns true if any line of `text` is a slash command.
///
/// ```
/// use otto::commands::is_slash_command;
///
/// assert!(is_slash_command("/oncall ack"));
/// assert!(is_slash_command("thanks!\n  /oncall done"));
/// assert!(!is_slash_command("/"));
/// assert!(!is_slash_command("// not a command"));
/// assert!(!is_slash_command("see /usr/bin in the logs"));
/// ```
pub fn is_slash_command(text: &str) -> bool {
    text.lines().any(|line| command_line(line).is_some())
}

/// Parses every slash command in `text`, in order of appearance.
///
/// Lines that look like commands but carry no name (`/   `) are skipped.
pub fn parse_slash_commands(text: &str) -> Vec<SlashCommand> {
    text.lines()
        .filter_map(command_line)
        .filter_map(parse_line)
        .collect()
}

/// Parses the first slash command in `text`.
///
/// ```
/// use otto::commands::parse_slash_command;
///
/// let cmd = parse_slash_command("/oncall page db \"disk full\"").unwrap();
/// assert_eq!(cmd.name, "oncall");
/// assert_eq!(cmd.args, vec!["page", "db", "disk full"]);
/// ```
pub fn parse_slash_command(text: &str) -> Option<SlashCommand> {
    text.lines().filter_map(command_line).find_map(parse_line)
}

/// Returns the text after the leading `/` if the line is a command line.
fn command_line(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.len() <= 1 || trimmed.starts_with("//") {
        return None;
    }
    trimmed.strip_prefix('/')
}

fn parse_line(rest: &str) -> Option<SlashCommand> {
    let mut tokens = tokenize(rest).into_iter();
    let name = tokens.next().filter(|name| !name.is_empty())?;
    Some(SlashCommand {
        name,
        args: tokens.collect(),
    })
}

/// Splits on whitespace, treating a double-quoted span as one token.
///
/// An unterminated quote runs to the end of the line.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn detects_commands_on_any_line() {
        assert!(is_slash_command("/deploy"));
        assert!(is_slash_command("   /deploy   "));
        assert!(is_slash_command("context first\n\n/oncall ack\nmore text"));
    }

    #[test]
    fn rejects_non_commands() {
        assert!(!is_slash_command(""));
        assert!(!is_slash_command("/"));
        assert!(!is_slash_command("  /  "));
        assert!(!is_slash_command("//"));
        assert!(!is_slash_command("// comment"));
        assert!(!is_slash_command("plain text"));
        assert!(!is_slash_command("path /etc/hosts mid-line"));
    }

    #[test]
    fn parses_name_and_args() {
        let cmd = parse_slash_command("/oncall   page\tdatabase").unwrap();
        assert_eq!(cmd.name, "oncall");
        assert_eq!(cmd.args, vec!["page", "database"]);
    }

    #[test]
    fn space_after_slash_still_names_command() {
        let cmd = parse_slash_command("/ oncall ack").unwrap();
        assert_eq!(cmd.name, "oncall");
        assert_eq!(cmd.args, vec!["ack"]);
    }

    #[test]
    fn names_are_case_sensitive() {
        let cmd = parse_slash_command("/OnCall ack").unwrap();
        assert_eq!(cmd.name, "OnCall");
    }

    #[test]
    fn quoted_spans_form_one_argument() {
        let cmd = parse_slash_command(r#"/oncall page db "disk full on db-1" now"#).unwrap();
        assert_eq!(cmd.args, vec!["page", "db", "disk full on db-1", "now"]);
    }

    #[test]
    fn empty_quotes_yield_empty_argument() {
        let cmd = parse_slash_command(r#"/label "" x"#).unwrap();
        assert_eq!(cmd.args, vec!["", "x"]);
    }

    #[test]
    fn empty_quoted_name_is_skipped() {
        assert_eq!(parse_slash_command(r#"/""#), None);
        assert_eq!(parse_slash_command(r#"/"" ack"#), None);

        let cmds = parse_slash_commands("/\"\n/oncall status");
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].name, "oncall");
    }

    #[test]
    fn unterminated_quote_runs_to_end_of_line() {
        let cmd = parse_slash_command("/say \"hello world\n/next").unwrap();
        assert_eq!(cmd.args, vec!["hello world"]);
    }

    #[test]
    fn collects_all_commands_in_order() {
        let text = "/oncall ack\nnot a command\n// nope\n/oncall done\n";
        let names: Vec<_> = parse_slash_commands(text)
            .into_iter()
            .map(|c| c.args.join(" "))
            .collect();
        assert_eq!(names, vec!["ack", "done"]);
    }

    #[test]
    fn first_command_wins() {
        let cmd = parse_slash_command("/a 1\n/b 2").unwrap();
        assert_eq!(cmd.name, "a");
    }

    proptest! {
        #[test]
        fn parsed_names_are_never_empty(text: String) {
            let _ = is_slash_command(&text);
            for cmd in parse_slash_commands(&text) {
                prop_assert!(!cmd.name.is_empty());
            }
        }

        #[test]
        fn detection_agrees_with_parsing(text: String) {
            // Every detected line that has a name parses; nothing parses without detection.
            if !is_slash_command(&text) {
                prop_assert!(parse_slash_command(&text).is_none());
            }
        }

        #[test]
        fn simple_commands_parse(
            name in "[a-z][a-z0-9_-]{0,15}",
            args in proptest::collection::vec("[a-zA-Z0-9#._-]{1,12}", 0..5),
        ) {
            let text = format!("/{} {}", name, args.join(" "));
            let cmd = parse_slash_command(&text).unwrap();
            prop_assert_eq!(cmd.name, name);
            prop_assert_eq!(cmd.args, args);
        }
    }
}
