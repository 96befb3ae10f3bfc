//! Command execution.

use crate::Commands;
use colored::Colorize;
use playout_client::{Client, ClientError};
use playout_protocol::{AssembledResponse, Command, PlayOptions};

/// Executes a command and returns the formatted output.
pub async fn execute(
    client: &Client,
    cmd: Commands,
    json: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    let command = match cmd {
        Commands::Repl => unreachable!(),

        Commands::Version => Command::Version { component: None },

        Commands::Info { target } => Command::Info { target },

        Commands::Cls => Command::Cls { directory: None },

        Commands::Tls => Command::Tls { directory: None },

        Commands::Load { target, clip } => Command::load(target, clip),

        Commands::Play {
            target,
            clip,
            looping,
        } => Command::Play {
            target,
            clip,
            options: PlayOptions {
                looping,
                ..Default::default()
            },
        },

        Commands::Stop { target } => Command::Stop { target },

        Commands::Clear { target } => Command::Clear { target },

        Commands::Raw { line } => Command::parse(&line.join(" "))?,
    };

    let response = client.execute(command).await?;
    Ok(format_response(&response, json))
}

/// Renders a response for the terminal, or as pretty JSON.
pub fn format_response(response: &AssembledResponse, json: bool) -> String {
    if json {
        return serde_json::to_string_pretty(response).unwrap_or_else(|e| e.to_string());
    }

    let code = response.code.to_string();
    let code = if response.is_error() {
        code.red()
    } else if response.is_info() {
        code.yellow()
    } else {
        code.green()
    };

    let mut output = format!("{} {}", code.bold(), response.message());
    for line in &response.body {
        output.push('\n');
        output.push_str("  ");
        output.push_str(line);
    }
    output
}

/// Renders a client error, including the server's reply for 4xx/5xx.
pub fn format_error(err: &ClientError) -> String {
    match err {
        ClientError::ServerError { code, message } => {
            format!("{} {}", code.to_string().red().bold(), message)
        }
        other => format!("{}: {}", "Error".red(), other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playout_protocol::{RawLine, ResponseAssembler};

    fn response(lines: &[&str]) -> AssembledResponse {
        let mut assembler = ResponseAssembler::new();
        lines
            .iter()
            .find_map(|line| assembler.push_line(RawLine::from(*line)).unwrap())
            .unwrap()
    }

    #[test]
    fn test_format_plain() {
        colored::control::set_override(false);
        let output = format_response(&response(&["200 CLS OK", "\"AMB\" MOVIE", ""]), false);
        assert_eq!(output, "200 CLS OK\n  \"AMB\" MOVIE");
    }

    #[test]
    fn test_format_json() {
        let output = format_response(&response(&["201 VERSION OK", "2.3.0"]), true);
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["code"], 201);
        assert_eq!(value["kind"], "VERSION");
        assert_eq!(value["body"][0], "2.3.0");
    }

    #[test]
    fn test_format_server_error() {
        colored::control::set_override(false);
        let err = ClientError::ServerError {
            code: 404,
            message: "LOAD ERROR".into(),
        };
        assert_eq!(format_error(&err), "404 LOAD ERROR");
    }
}
