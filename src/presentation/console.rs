//! Console front end
//!
//! Line commands read from stdin and human readable rendering of controller
//! events. Stands in for the desktop UI.

use crate::domain::models::{ControllerEvent, LatencyMode, MessageSeverity};
use crate::infrastructure::bluetooth::protocol;
use std::io::BufRead;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Delay between a mode acknowledgment and the battery request it triggers
pub const BATTERY_POLL_DELAY: Duration = Duration::from_secs(1);

pub const HELP: &str = "\
Commands:
  low          switch to low latency mode
  standard     switch to standard mode (alias: std)
  battery      request battery status
  raw <hex>    send raw bytes, e.g. raw fedcbac40200050bffffffffef4f
  connect      connect now instead of waiting for the listener
  state        show the connection state
  help         show this text
  quit         stop and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Mode(LatencyMode),
    Battery,
    Raw(Vec<u8>),
    Connect,
    State,
    Help,
    Quit,
}

/// Parse one input line. `Ok(None)` for blank lines.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Ok(None);
    };

    let command = match word.to_lowercase().as_str() {
        "low" => ConsoleCommand::Mode(LatencyMode::Low),
        "standard" | "std" => ConsoleCommand::Mode(LatencyMode::Standard),
        "battery" | "bat" => ConsoleCommand::Battery,
        "raw" => {
            let hex: String = parts.collect();
            let bytes = protocol::parse_hex(&hex)
                .ok_or_else(|| format!("Invalid hex payload: {:?}", hex))?;
            ConsoleCommand::Raw(bytes)
        }
        "connect" => ConsoleCommand::Connect,
        "state" | "status" => ConsoleCommand::State,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("Unknown command: {}", other)),
    };
    Ok(Some(command))
}

/// One line summary of an event
pub fn describe_event(event: &ControllerEvent) -> String {
    match event {
        ControllerEvent::Status(status) => {
            let tag = match status.severity {
                MessageSeverity::Info => "info",
                MessageSeverity::Success => "ok",
                MessageSeverity::Error => "error",
            };
            format!("[{}] {}", tag, status.message)
        }
        ControllerEvent::Battery(status) => format!(
            "Battery  L: {}  R: {}  Case: {}",
            status.left_level(),
            status.right_level(),
            status.case_level()
        ),
        ControllerEvent::BatteryPollRequested => "Mode acknowledged".to_string(),
    }
}

/// Forward lines from `reader` over a channel, reading on a plain thread. A
/// read blocked there never holds up runtime shutdown. The channel closes on
/// EOF or a read error.
pub fn spawn_line_reader<R>(reader: R) -> mpsc::UnboundedReceiver<String>
where
    R: BufRead + Send + 'static,
{
    let (line_tx, line_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read input: {}", e);
                    break;
                }
            }
        }
    });
    line_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{BatteryStatus, StatusMessage};

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_command("low").unwrap(),
            Some(ConsoleCommand::Mode(LatencyMode::Low))
        );
        assert_eq!(
            parse_command("  STD ").unwrap(),
            Some(ConsoleCommand::Mode(LatencyMode::Standard))
        );
        assert_eq!(parse_command("battery").unwrap(), Some(ConsoleCommand::Battery));
        assert_eq!(parse_command("").unwrap(), None);
        assert_eq!(parse_command("quit").unwrap(), Some(ConsoleCommand::Quit));
        assert!(parse_command("fly").is_err());
    }

    #[test]
    fn test_parse_raw_command() {
        assert_eq!(
            parse_command("raw fedc ba").unwrap(),
            Some(ConsoleCommand::Raw(vec![0xFE, 0xDC, 0xBA]))
        );
        assert!(parse_command("raw xyz").is_err());
        assert!(parse_command("raw").is_err());
    }

    #[test]
    fn test_describe_events() {
        let battery = ControllerEvent::Battery(BatteryStatus {
            left: 50,
            right: 178,
            case: 0xFF,
        });
        assert_eq!(
            describe_event(&battery),
            "Battery  L: 50%  R: 50% (charging)  Case: --"
        );

        let status = ControllerEvent::Status(StatusMessage {
            message: "Connection lost".to_string(),
            severity: MessageSeverity::Error,
        });
        assert_eq!(describe_event(&status), "[error] Connection lost");
    }

    #[tokio::test]
    async fn test_line_reader_forwards_until_eof() {
        let input = std::io::Cursor::new("low\nraw fedc\n\nquit\n");
        let mut lines = spawn_line_reader(input);

        assert_eq!(lines.recv().await.as_deref(), Some("low"));
        assert_eq!(lines.recv().await.as_deref(), Some("raw fedc"));
        assert_eq!(lines.recv().await.as_deref(), Some(""));
        assert_eq!(lines.recv().await.as_deref(), Some("quit"));
        assert_eq!(lines.recv().await, None);
    }
}
