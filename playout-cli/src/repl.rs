//! Interactive REPL.
//!
//! Each input line is parsed as an AMCP command, sent, and its response
//! printed. Lines starting with `.` are console commands.

use crate::commands::{format_error, format_response};
use colored::Colorize;
use playout_client::{Client, ClientError, ConnectionEvent};
use playout_protocol::{AssembledResponse, Command};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use tokio::sync::broadcast::error::RecvError;

const HELP_TEXT: &str = r#"
Type any AMCP command, for example:
  VERSION                       Server version
  INFO [channel[-layer]]        Channel information
  CLS / TLS                     List media / templates
  LOAD 1-10 "clip"              Load a clip paused
  PLAY 1-10 ["clip"] [LOOP]     Play
  STOP 1-10 / CLEAR 1-10        Stop / clear a layer
  MIXER 1-10 OPACITY 0.5 25     Fade a layer

Console commands:
  .help                         Show this help
  .status                       Connection status
  .quit, .exit                  Exit the REPL
"#;

pub async fn run(
    client: Client,
    host: &str,
    port: u16,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "playout console".bold().cyan());
    println!("Connecting to {}:{}...", host, port);

    // Subscribe before connecting so no state change is missed.
    let events = client.subscribe();
    client.connect(host, port).await?;
    println!("{}", "Connected!".green());

    let printer = tokio::spawn(print_events(events, json));

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".playout_history"))
        .unwrap_or_else(|_| ".playout_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type '.help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "amcp>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_line(&client, line, json).await {
                    Some(output) => println!("{}\n", output),
                    None => break,
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    client.disconnect().await;
    printer.abort();
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

/// Runs one input line. Returns `None` when the REPL should exit.
async fn execute_repl_line(client: &Client, line: &str, json: bool) -> Option<String> {
    if let Some(console) = line.strip_prefix('.') {
        return match console.to_lowercase().as_str() {
            "help" | "?" => Some(HELP_TEXT.to_string()),
            "quit" | "exit" | "q" => None,
            "status" => Some(status(client)),
            other => Some(format!(
                "Unknown console command: .{}. Type '.help' for help.",
                other
            )),
        };
    }

    if matches!(line.to_lowercase().as_str(), "quit" | "exit") {
        return None;
    }

    let command = match Command::parse(line) {
        Ok(command) => command,
        Err(e) => return Some(format!("{}: {}", "Error".red(), e)),
    };

    Some(match send(client, command).await {
        Ok(response) => format_response(&response, json),
        Err(e) => format_error(&e),
    })
}

/// Sends a command without mapping 4xx/5xx replies to errors, so they are
/// printed like any other response.
async fn send(client: &Client, command: Command) -> Result<AssembledResponse, ClientError> {
    client
        .connection()
        .submit(command)
        .await?
        .wait()
        .await?
        .into_response()
}

fn status(client: &Client) -> String {
    let conn = client.connection();
    let endpoint = conn
        .endpoint()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "-".to_string());
    let last = conn
        .last_received()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    format!(
        "{} {}\n  pending: {}\n  last received: {}",
        endpoint.cyan(),
        conn.state().to_string().yellow(),
        conn.pending_count(),
        last
    )
}

async fn print_events(
    mut events: tokio::sync::broadcast::Receiver<ConnectionEvent>,
    json: bool,
) {
    loop {
        match events.recv().await {
            Ok(ConnectionEvent::StateChanged { endpoint, state }) => {
                eprintln!("{} {} {}", "*".dimmed(), endpoint, state.to_string().yellow());
            }
            Ok(ConnectionEvent::Unsolicited(response)) => {
                eprintln!("{} {}", "unsolicited:".dimmed(), format_response(&response, json));
            }
            Ok(ConnectionEvent::ProtocolError { message, .. }) => {
                eprintln!("{}: {}", "Warning".yellow(), message);
            }
            Err(RecvError::Lagged(n)) => {
                eprintln!("{}: lagged {} events", "Warning".yellow(), n);
            }
            Err(RecvError::Closed) => break,
        }
    }
}
