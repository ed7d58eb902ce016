//! Interactive chat loop for `pdfqa chat` and turn rendering shared with
//! `pdfqa ask`.
//!
//! Free text is a question. Lines starting with `/` are commands:
//!
//! | Command | Effect |
//! |---------|--------|
//! | `/key <value>` | set the API key (a new key clears the conversation) |
//! | `/fallback on\|off` | allow or forbid general-knowledge answers |
//! | `/reset` | clear the conversation and cached index |
//! | `/help` | list commands |
//! | `/quit` | exit |

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::QaError;
use crate::session::{Session, TurnMode, TurnOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Ask(String),
    Key(String),
    Fallback(bool),
    Reset,
    Help,
    Quit,
    Invalid(String),
}

const HELP: &str = "\
Commands:
  /key <value>        set the API key
  /fallback on|off    allow general-knowledge answers when no passage is relevant
  /reset              clear the conversation
  /help               show this help
  /quit               exit
Anything else is asked as a question.";

/// Parse one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<ReplCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Some(ReplCommand::Ask(line.to_string()));
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    Some(match (name, arg) {
        ("key", "") => ReplCommand::Invalid("usage: /key <value>".into()),
        ("key", key) => ReplCommand::Key(key.to_string()),
        ("fallback", "on") => ReplCommand::Fallback(true),
        ("fallback", "off") => ReplCommand::Fallback(false),
        ("fallback", _) => ReplCommand::Invalid("usage: /fallback on|off".into()),
        ("reset", _) => ReplCommand::Reset,
        ("help", _) => ReplCommand::Help,
        ("quit", _) | ("exit", _) => ReplCommand::Quit,
        (other, _) => ReplCommand::Invalid(format!("unknown command: /{} (try /help)", other)),
    })
}

/// Human-readable rendering of a finished turn.
pub fn render_turn(turn: &TurnOutcome) -> String {
    let mut out = String::new();
    out.push_str(&turn.answer);
    out.push('\n');

    if turn.mode == TurnMode::Grounded && !turn.citations.is_empty() {
        out.push('\n');
        out.push_str(&turn.evidence_header());
        out.push('\n');
        for cite in &turn.citations {
            out.push_str(&format!("- {}\n", cite));
        }
    }
    if let Some(err) = &turn.retrieval_error {
        out.push_str(&format!("\n(document search unavailable: {})\n", err));
    }
    out.push('\n');
    out.push_str(turn.mode_note());
    out
}

/// Run the chat loop on stdin until `/quit` or end of input.
pub async fn run_chat(mut session: Session) -> anyhow::Result<()> {
    println!("pdf-qa chat. Type /help for commands.");
    if !session.is_ready() {
        println!("No API key found. Enter one with /key <value>.");
    }
    println!(
        "Fallback to general answers is {}.",
        if session.allow_fallback() { "on" } else { "off" }
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let Some(command) = parse_line(&line) else {
            continue;
        };

        match command {
            ReplCommand::Quit => break,
            ReplCommand::Help => println!("{}", HELP),
            ReplCommand::Invalid(msg) => println!("{}", msg),
            ReplCommand::Reset => {
                session.reset();
                println!("Conversation cleared.");
            }
            ReplCommand::Fallback(allow) => {
                session.set_allow_fallback(allow);
                println!("Fallback {}.", if allow { "enabled" } else { "disabled" });
            }
            ReplCommand::Key(key) => match session.set_api_key(&key) {
                Ok(true) => println!("API key set. Conversation cleared."),
                Ok(false) => println!("API key unchanged."),
                Err(e) => println!("{}", e),
            },
            ReplCommand::Ask(question) => {
                if !session.is_ready() {
                    println!("Enter an API key with /key <value> to start asking.");
                    continue;
                }
                match session.handle_turn(&question).await {
                    Ok(Some(turn)) => println!("\n{}\n", render_turn(&turn)),
                    Ok(None) => {}
                    Err(e @ QaError::IndexLoad { .. }) => {
                        println!("{}", e);
                        println!("Run `pdfqa index` first, then /reset.");
                    }
                    Err(e) => println!("{}", e),
                }
            }
        }
    }

    Ok(())
}
