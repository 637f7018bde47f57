//! REPL command parsing and definitions
//!
//! Dot-commands inspect the program, manage the session transaction and
//! mutate types. Anything else typed at the prompt is an expression.

use anyhow::{anyhow, Result};

/// Available REPL commands
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    /// Show help information
    Help,
    /// Exit the REPL
    Quit,
    /// Toggle quiet mode
    Quiet,
    /// List loaded types with their current generation
    Types,
    /// Print the regenerated source of a type
    Source(String),
    /// List every published version of a type
    History(String),
    /// Show engine statistics, optionally as JSON
    Stats { json: bool },
    /// Instantiate a type and bind it to a session variable
    New { name: String, ty: String },
    /// List session variables
    Vars,
    /// Open the session transaction
    Begin,
    /// Commit the session transaction
    Commit,
    /// Discard the session transaction
    Discard,
    /// Show mutations recorded in the session transaction
    Pending,
    /// Add a field or method given as member source
    Add { target: String, member: String },
    /// Replace the body of a method
    Replace { target: String, member: String, body: String },
    /// Remove a member
    Remove { target: String, member: String },
    /// Set an annotation on a type, or on one of its members
    Annotate {
        target: String,
        member: Option<String>,
        annotation: String,
    },
    /// Add an import to a type
    Import { target: String, import: String },
    /// Change or clear the superclass of a type
    Extends { target: String, parent: Option<String> },
}

/// Split off the first whitespace-delimited word
fn next_word(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    match input.find(char::is_whitespace) {
        Some(end) => Some((&input[..end], input[end..].trim_start())),
        None => Some((input, "")),
    }
}

fn one_arg(rest: &str, usage: &str) -> Result<String> {
    match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
        [arg] => Ok(arg.to_string()),
        _ => Err(anyhow!("Usage: {usage}")),
    }
}

/// Parse a command string into a ReplCommand
pub fn parse_command(input: &str) -> Result<ReplCommand> {
    let trimmed = input.trim();

    let Some(body) = trimmed.strip_prefix('.') else {
        return Err(anyhow!("Commands must start with '.'"));
    };
    let Some((name, rest)) = next_word(body) else {
        return Err(anyhow!("Empty command"));
    };

    match name {
        "help" | "h" => Ok(ReplCommand::Help),
        "quit" | "q" | "exit" => Ok(ReplCommand::Quit),
        "quiet" => Ok(ReplCommand::Quiet),
        "types" => Ok(ReplCommand::Types),
        "source" | "src" => Ok(ReplCommand::Source(one_arg(rest, ".source <type>")?)),
        "history" => Ok(ReplCommand::History(one_arg(rest, ".history <type>")?)),
        "stats" | "statistics" => match rest {
            "" => Ok(ReplCommand::Stats { json: false }),
            "json" => Ok(ReplCommand::Stats { json: true }),
            _ => Err(anyhow!("Usage: .stats [json]")),
        },
        "new" => match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
            [name, ty] => Ok(ReplCommand::New {
                name: name.to_string(),
                ty: ty.to_string(),
            }),
            _ => Err(anyhow!("Usage: .new <variable> <type>")),
        },
        "vars" => Ok(ReplCommand::Vars),
        "begin" => Ok(ReplCommand::Begin),
        "commit" => Ok(ReplCommand::Commit),
        "discard" | "rollback" => Ok(ReplCommand::Discard),
        "pending" => Ok(ReplCommand::Pending),
        "add" => match next_word(rest) {
            Some((target, member)) if !member.is_empty() => Ok(ReplCommand::Add {
                target: target.to_string(),
                member: member.to_string(),
            }),
            _ => Err(anyhow!("Usage: .add <type> <field or method source>")),
        },
        "replace" => {
            let parsed = next_word(rest).and_then(|(target, rest)| {
                next_word(rest).map(|(member, body)| (target, member, body))
            });
            match parsed {
                Some((target, member, body)) if !body.is_empty() => Ok(ReplCommand::Replace {
                    target: target.to_string(),
                    member: member.to_string(),
                    body: body.to_string(),
                }),
                _ => Err(anyhow!("Usage: .replace <type> <method> <body>")),
            }
        }
        "remove" => match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
            [target, member] => Ok(ReplCommand::Remove {
                target: target.to_string(),
                member: member.to_string(),
            }),
            _ => Err(anyhow!("Usage: .remove <type> <member>")),
        },
        "annotate" => {
            let words: Vec<_> = rest.split_whitespace().collect();
            let annotation_at = words.iter().position(|w| w.starts_with('@'));
            match (words.as_slice(), annotation_at) {
                ([target, annotation @ ..], Some(1)) => Ok(ReplCommand::Annotate {
                    target: target.to_string(),
                    member: None,
                    annotation: annotation.join(" "),
                }),
                ([target, member, annotation @ ..], Some(2)) => Ok(ReplCommand::Annotate {
                    target: target.to_string(),
                    member: Some(member.to_string()),
                    annotation: annotation.join(" "),
                }),
                _ => Err(anyhow!("Usage: .annotate <type> [member] @Name[(\"value\")]")),
            }
        }
        "import" => match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
            [target, import] => Ok(ReplCommand::Import {
                target: target.to_string(),
                import: import.to_string(),
            }),
            _ => Err(anyhow!("Usage: .import <type> <package.Type | package.*>")),
        },
        "extends" => match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
            [target, "none"] => Ok(ReplCommand::Extends {
                target: target.to_string(),
                parent: None,
            }),
            [target, parent] => Ok(ReplCommand::Extends {
                target: target.to_string(),
                parent: Some(parent.to_string()),
            }),
            _ => Err(anyhow!("Usage: .extends <type> <parent | none>")),
        },
        _ => Err(anyhow!("Unknown command: .{}", name)),
    }
}
