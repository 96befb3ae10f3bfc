//! Line-oriented operator console.

use crate::controller::Controller;
use crate::rundown::Action;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP_TEXT: &str = "\
Navigation:
  list                 Show the rundown
  select N             Select item N
  up / down            Move the selection
Playout (selected item):
  load  play  pause  stop  next
  clear  clear-layer  clear-channel
Other:
  status               Device connection states
  help                 Show this help
  quit                 Exit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    List,
    Select(usize),
    Up,
    Down,
    Action(Action),
    Status,
    Help,
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Err("empty command".to_string());
        };
        let command = match word.to_lowercase().as_str() {
            "list" | "ls" => ConsoleCommand::List,
            "select" => {
                let index = words
                    .next()
                    .ok_or_else(|| "usage: select N".to_string())?
                    .parse()
                    .map_err(|_| "usage: select N".to_string())?;
                ConsoleCommand::Select(index)
            }
            "up" => ConsoleCommand::Up,
            "down" => ConsoleCommand::Down,
            "status" => ConsoleCommand::Status,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => ConsoleCommand::Action(other.parse().map_err(|_| {
                format!("unknown command '{}', type 'help' for help", other)
            })?),
        };
        if words.next().is_some() {
            return Err(format!("unexpected arguments after '{}'", word));
        }
        Ok(command)
    }
}

/// Reads commands from stdin until `quit`, end of input or Ctrl-C.
pub async fn run(controller: &mut Controller) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print!("{}", controller.list());

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let command = match ConsoleCommand::parse(line) {
            Ok(command) => command,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };

        match command {
            ConsoleCommand::Quit => break,
            ConsoleCommand::Help => println!("{}", HELP_TEXT),
            ConsoleCommand::List => print!("{}", controller.list()),
            ConsoleCommand::Status => print!("{}", controller.status()),
            ConsoleCommand::Up => {
                controller.up();
                print!("{}", controller.list());
            }
            ConsoleCommand::Down => {
                controller.down();
                print!("{}", controller.list());
            }
            ConsoleCommand::Select(index) => match controller.select(index) {
                Ok(()) => print!("{}", controller.list()),
                Err(e) => println!("{}", e),
            },
            ConsoleCommand::Action(action) => {
                if controller.is_empty() {
                    println!("rundown is empty");
                    continue;
                }
                let index = controller.selected();
                match controller.execute(action).await {
                    Ok(()) => {
                        if let (Some(item), Some(state)) =
                            (controller.item(index), controller.state(index))
                        {
                            println!("{} {}: {}", action, item.title(), state);
                        }
                    }
                    Err(e) => println!("{} failed: {}", action, e),
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_navigation() {
        assert_eq!(ConsoleCommand::parse("list").unwrap(), ConsoleCommand::List);
        assert_eq!(
            ConsoleCommand::parse("select 3").unwrap(),
            ConsoleCommand::Select(3)
        );
        assert_eq!(ConsoleCommand::parse(" UP ").unwrap(), ConsoleCommand::Up);
        assert_eq!(ConsoleCommand::parse("down").unwrap(), ConsoleCommand::Down);
        assert_eq!(ConsoleCommand::parse("quit").unwrap(), ConsoleCommand::Quit);
        assert_eq!(ConsoleCommand::parse("status").unwrap(), ConsoleCommand::Status);
    }

    #[test]
    fn test_parse_actions() {
        assert_eq!(
            ConsoleCommand::parse("play").unwrap(),
            ConsoleCommand::Action(Action::Play)
        );
        assert_eq!(
            ConsoleCommand::parse("clear-layer").unwrap(),
            ConsoleCommand::Action(Action::ClearVideolayer)
        );
        assert_eq!(
            ConsoleCommand::parse("clear-channel").unwrap(),
            ConsoleCommand::Action(Action::ClearChannel)
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(ConsoleCommand::parse("").is_err());
        assert!(ConsoleCommand::parse("select").is_err());
        assert!(ConsoleCommand::parse("select two").is_err());
        assert!(ConsoleCommand::parse("play now").is_err());
        assert!(ConsoleCommand::parse("rewind").is_err());
    }
}
