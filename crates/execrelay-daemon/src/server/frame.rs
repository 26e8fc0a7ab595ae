//! Newline-delimited JSON frames exchanged with socket clients.

use serde::{Deserialize, Serialize};

use crate::channel::Message;

/// Frame sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// A command line, or input for the running process.
    Run { line: String },
    Ping,
}

/// Frame sent to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Hello { session: String },
    Output { stream: String, data: String },
    Exit { code: Option<i32>, killed: bool },
    Error { message: String },
    Pong,
}

impl ServerFrame {
    /// Translate a channel message into the frame the client sees.
    pub fn from_message(message: &Message) -> Self {
        let header = |key: &str| message.headers.get(key).map(String::as_str);

        if header("event") == Some("exit") {
            return Self::Exit {
                code: header("exit_code").and_then(|c| c.parse().ok()),
                killed: header("killed") == Some("true"),
            };
        }

        Self::Output {
            stream: header("stream").unwrap_or("stdout").to_string(),
            data: String::from_utf8_lossy(&message.payload).into_owned(),
        }
    }

    /// Serialize as one NDJSON line, including the trailing newline.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
