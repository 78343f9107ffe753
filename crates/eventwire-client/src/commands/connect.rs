//! Connect command: an interactive client for the relay server.

use std::io::{self, BufRead};

use tracing::{debug, warn};

use eventwire_core::Value;
use eventwire_protocol::Registry;

use crate::client::{Client, Connection};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::events::ClientEvents;

/// One line typed by the user.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Blank line.
    Empty,
    /// Plain text, sent as `say(text)`.
    Say(String),
    /// `/emit NAME [JSON ARRAY]`.
    Emit { name: String, args: Vec<Value> },
    /// `/raw TEXT`, written verbatim.
    Raw(String),
    /// `/reconnect`.
    Reconnect,
    /// `/quit`.
    Quit,
}

impl Input {
    /// Parses one line of user input.
    pub fn parse(line: &str) -> ClientResult<Self> {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return Ok(Self::Empty);
        }
        let Some(command) = line.strip_prefix('/') else {
            return Ok(Self::Say(line.to_string()));
        };

        let (verb, rest) = command.split_once(' ').unwrap_or((command, ""));
        match verb {
            "quit" | "q" => Ok(Self::Quit),
            "reconnect" => Ok(Self::Reconnect),
            "raw" => Ok(Self::Raw(rest.to_string())),
            "emit" => {
                let rest = rest.trim_start();
                let (name, json) = rest.split_once(' ').unwrap_or((rest, ""));
                if name.is_empty() {
                    return Err(ClientError::input("usage: /emit NAME [JSON ARRAY]"));
                }
                let args = if json.trim().is_empty() {
                    Vec::new()
                } else {
                    json_args(json)?
                };
                Ok(Self::Emit {
                    name: name.to_string(),
                    args,
                })
            }
            other => Err(ClientError::input(format!("unknown command /{other}"))),
        }
    }
}

/// Parses a JSON array into event arguments.
pub fn json_args(text: &str) -> ClientResult<Vec<Value>> {
    let parsed: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| ClientError::input(format!("invalid JSON: {e}")))?;
    match parsed {
        serde_json::Value::Array(items) => items.into_iter().map(json_value).collect(),
        _ => Err(ClientError::input("arguments must be a JSON array")),
    }
}

fn json_value(json: serde_json::Value) -> ClientResult<Value> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| ClientError::input(format!("unsupported number {n}")))?,
        },
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => {
            Value::List(items.into_iter().map(json_value).collect::<ClientResult<_>>()?)
        }
        serde_json::Value::Object(_) => {
            return Err(ClientError::input("objects cannot be sent as arguments"));
        }
    })
}

/// Prints what the relay server sends.
#[derive(Debug, Default)]
pub struct Console;

fn register_commands(registry: &mut Registry<()>) -> eventwire_protocol::ProtocolResult<()> {
    registry.register("said", |name: String, text: String| println!("<{name}> {text}"))?;
    registry.register("joined", |name: String| println!("* {name} joined"))?;
    registry.register("left", |id: i64| println!("* peer {id} left"))?;
    registry.register("renamed", |old: String, new: String| {
        println!("* {old} is now known as {new}")
    })?;
    registry.register("echo", |text: String| println!("echo: {text}"))?;
    registry.register("peers", |names: Vec<String>| {
        println!("* online: {}", names.join(", "))
    })?;
    registry.register("raw", |name: String, line: String| println!("[{name}] {line}"))?;
    Ok(())
}

impl ClientEvents for Console {
    fn init(&self, _connection: &Connection, registry: &mut Registry<()>) {
        if let Err(e) = register_commands(registry) {
            warn!(error = %e, "could not register console commands");
        }
    }

    fn on_connect(&self, connection: &Connection) {
        connection.log("connected");
        println!("* connected, type /quit to leave");
    }

    fn on_connect_fail(&self, _connection: &Connection, error: &ClientError) {
        println!("* could not connect: {error}");
    }

    fn on_disconnect(&self, _connection: &Connection) {
        println!("* disconnected, /reconnect to try again");
    }

    fn on_raw_message(&self, _connection: &Connection, line: &str) {
        println!("{line}");
    }
}

/// Connects and relays stdin until `/quit` or end of input.
pub fn run(config: ClientConfig) -> ClientResult<()> {
    let client = Client::new(config, Console);
    // A failed first attempt is reported by the hook; /reconnect retries.
    if let Err(e) = client.connect() {
        debug!(error = %e, "initial connect failed");
    }

    for line in io::stdin().lock().lines() {
        let line = line?;
        let result = match Input::parse(&line) {
            Ok(Input::Empty) => Ok(()),
            Ok(Input::Quit) => break,
            Ok(Input::Reconnect) => client.reconnect().map(|started| {
                if !started {
                    println!("* already connected");
                }
            }),
            Ok(Input::Say(text)) => client.emit("say", &[Value::Str(text)]),
            Ok(Input::Emit { name, args }) => client.emit(&name, &args),
            Ok(Input::Raw(text)) => client.send(&format!("{text}\n")),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            println!("! {e}");
        }
    }

    client.disconnect();
    client.wait();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventwire_core::values;

    #[test]
    fn plain_text_is_said() {
        assert_eq!(Input::parse("hello all\n").unwrap(), Input::Say("hello all".into()));
        assert_eq!(Input::parse("   ").unwrap(), Input::Empty);
    }

    #[test]
    fn slash_commands() {
        assert_eq!(Input::parse("/quit").unwrap(), Input::Quit);
        assert_eq!(Input::parse("/reconnect").unwrap(), Input::Reconnect);
        assert_eq!(
            Input::parse("/raw not a frame").unwrap(),
            Input::Raw("not a frame".into())
        );
        assert!(Input::parse("/dance").is_err());
    }

    #[test]
    fn emit_with_json_arguments() {
        assert_eq!(
            Input::parse(r#"/emit echo ["hi"]"#).unwrap(),
            Input::Emit {
                name: "echo".into(),
                args: values!["hi"]
            }
        );
        assert_eq!(
            Input::parse("/emit who").unwrap(),
            Input::Emit {
                name: "who".into(),
                args: vec![]
            }
        );
        assert_eq!(
            Input::parse(r#"/emit mix [null, true, 3, 2.5, [1, "x"]]"#).unwrap(),
            Input::Emit {
                name: "mix".into(),
                args: vec![
                    Value::Null,
                    Value::Bool(true),
                    Value::Int(3),
                    Value::Float(2.5),
                    Value::List(values![1, "x"]),
                ]
            }
        );
        assert!(Input::parse("/emit").is_err());
    }

    #[test]
    fn rejects_non_array_json() {
        assert!(json_args("{\"a\": 1}").is_err());
        assert!(json_args("[{\"a\": 1}]").is_err());
        assert!(json_args("[1,").is_err());
    }
}
