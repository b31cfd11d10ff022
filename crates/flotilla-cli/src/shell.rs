//! Line commands for the interactive shell.

use flotilla_node::NodeId;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Broadcast(Value),
    Direct(NodeId, Value),
    Connect(String),
    Neighbors,
    Peers,
    Id,
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  broadcast <message>          Flood a message to every node
  direct <node-id> <message>   Send a message to one node
  connect <host:port>          Dial another node
  neighbors                    List bound neighbors
  peers                        Show the peer directory
  id                           Print this node's id
  quit                         Close all connections and exit

Messages that parse as JSON are sent as JSON, anything else as a string.";

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<ShellCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    let command = match verb {
        "broadcast" | "b" => {
            if rest.is_empty() {
                return Err("usage: broadcast <message>".into());
            }
            ShellCommand::Broadcast(payload(rest))
        }
        "direct" | "d" => {
            let (target, message) = rest
                .split_once(char::is_whitespace)
                .ok_or("usage: direct <node-id> <message>")?;
            ShellCommand::Direct(NodeId::from(target), payload(message.trim()))
        }
        "connect" | "c" => {
            if rest.is_empty() {
                return Err("usage: connect <host:port>".into());
            }
            ShellCommand::Connect(rest.to_string())
        }
        "neighbors" | "n" => ShellCommand::Neighbors,
        "peers" | "p" => ShellCommand::Peers,
        "id" => ShellCommand::Id,
        "help" | "?" => ShellCommand::Help,
        "quit" | "exit" | "q" => ShellCommand::Quit,
        other => return Err(format!("unknown command: {other} (try `help`)")),
    };
    Ok(Some(command))
}

fn payload(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_messages() {
        assert_eq!(
            parse("broadcast hello there").unwrap(),
            Some(ShellCommand::Broadcast(json!("hello there")))
        );
        assert_eq!(
            parse("b {\"n\": 1}").unwrap(),
            Some(ShellCommand::Broadcast(json!({ "n": 1 })))
        );
        assert_eq!(
            parse("direct abcd-0001 hi").unwrap(),
            Some(ShellCommand::Direct(NodeId::from("abcd-0001"), json!("hi")))
        );
    }

    #[test]
    fn parses_bare_verbs() {
        assert_eq!(parse("  neighbors ").unwrap(), Some(ShellCommand::Neighbors));
        assert_eq!(parse("quit").unwrap(), Some(ShellCommand::Quit));
        assert_eq!(parse("").unwrap(), None);
    }

    #[test]
    fn rejects_incomplete_commands() {
        assert!(parse("direct onlyid").is_err());
        assert!(parse("broadcast").is_err());
        assert!(parse("launch").is_err());
    }
}
