use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::warn;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::chat::{ChatMessage, MessageKind};
use crate::client::catalog::SessionSummary;
use crate::client::connection::Command;
use crate::client::dispatcher::{ActiveSession, Renderer};
use crate::error::ClientError;

pub const HELP: &str = "commands: /all, /to <user>, /emoji <e>, /image <path>, /sessions, \
/export <file>, /import <file>, /logout, /quit";

/// Prints conversations to stdout.
#[derive(Debug, Default)]
pub struct TerminalRenderer;

impl TerminalRenderer {
    fn line(message: &ChatMessage) -> String {
        let time = message.timestamp.format("%H:%M:%S");
        match (message.kind, message.from.as_deref()) {
            (MessageKind::System, _) | (_, None) => {
                format!("[{}] * {}", time, message.content.as_deref().unwrap_or_default())
            }
            (MessageKind::Image, Some(from)) => format!(
                "[{}] {}: [image] {}",
                time,
                from,
                message.filename.as_deref().unwrap_or("image")
            ),
            (_, Some(from)) => format!(
                "[{}] {}: {}",
                time,
                from,
                message.content.as_deref().unwrap_or_default()
            ),
        }
    }
}

impl Renderer for TerminalRenderer {
    fn render(&mut self, _session: &str, message: &ChatMessage) {
        println!("{}", Self::line(message));
    }

    fn show_session(&mut self, session: &ActiveSession, log: &[ChatMessage]) {
        println!("== {} ==", session.name);
        for message in log {
            println!("{}", Self::line(message));
        }
    }

    fn update_catalog(&mut self, sessions: &[SessionSummary]) {
        let entries: Vec<String> = sessions
            .iter()
            .map(|s| {
                let name = match s.unread {
                    0 => s.name.clone(),
                    n => format!("{} ({})", s.name, n),
                };
                match &s.last_message {
                    Some(last) => format!("{}: {}", name, last.preview()),
                    None => name,
                }
            })
            .collect();
        println!("-- {}", entries.join(" | "));
    }

    fn notify(&mut self, text: &str) {
        println!("! {text}");
    }
}

/// Parses one input line. Empty lines yield nothing; unknown slash commands
/// are sent as ordinary text.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    let command = match (head, rest) {
        ("/all", _) => Command::OpenGroup,
        ("/to", peer) if !peer.is_empty() => Command::OpenPrivate(peer.to_string()),
        ("/emoji", emoji) if !emoji.is_empty() => Command::Emoji(emoji.to_string()),
        ("/sessions", _) => Command::ShowSessions,
        ("/export", file) if !file.is_empty() => Command::Export(PathBuf::from(file)),
        ("/import", file) if !file.is_empty() => Command::Import(PathBuf::from(file)),
        ("/logout", _) => Command::Logout,
        ("/quit", _) => Command::Quit,
        _ => Command::Text(line.to_string()),
    };
    Some(command)
}

fn mime_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

/// Reads an image file into a data URI, returning it with the file name.
pub async fn read_image(path: &Path, max_bytes: usize) -> Result<(String, String), ClientError> {
    let mime = mime_for(path).ok_or_else(|| ClientError::Image(format!("{} is not an image", path.display())))?;
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ClientError::Image(format!("{}: {}", path.display(), e)))?;
    if bytes.len() > max_bytes {
        return Err(ClientError::Image(format!(
            "{} is {} bytes, limit is {}",
            path.display(),
            bytes.len(),
            max_bytes
        )));
    }

    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("image")
        .to_string();
    Ok((filename, format!("data:{};base64,{}", mime, BASE64.encode(bytes))))
}

/// Forwards stdin lines as commands until EOF or `/quit`. Image paths are
/// resolved here so a bad file never reaches the dispatcher.
pub fn spawn_stdin_reader(commands: mpsc::UnboundedSender<Command>, max_image_bytes: usize) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            };

            let command = if let Some(path) = line.trim().strip_prefix("/image ") {
                match read_image(Path::new(path.trim()), max_image_bytes).await {
                    Ok((filename, data_uri)) => Command::Image { filename, data_uri },
                    Err(e) => {
                        println!("! {e}");
                        continue;
                    }
                }
            } else if line.trim() == "/help" {
                println!("{HELP}");
                continue;
            } else {
                match parse_command(&line) {
                    Some(command) => command,
                    None => continue,
                }
            };

            let stop = matches!(command, Command::Quit | Command::Logout);
            if commands.send(command).is_err() || stop {
                break;
            }
        }
        let _ = commands.send(Command::Quit);
    })
}
