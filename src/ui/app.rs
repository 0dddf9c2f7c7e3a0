use anyhow::{Context, Result};
use flume::Receiver;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use hearth_backend::persistence::UserPreferences;

use super::chat;
use crate::api::{ApiClient, FrontendEvent};

const LIST_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    List,
    Switch(usize),
    New,
    Rename(String),
    Delete,
    State,
    History(bool),
    Help,
    Quit,
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Command::Say(line.to_string()));
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        let command = match name.to_ascii_lowercase().as_str() {
            "list" => Command::List,
            "new" => Command::New,
            "delete" => Command::Delete,
            "state" => Command::State,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "rename" if !arg.is_empty() => Command::Rename(arg.to_string()),
            "rename" => Command::Invalid("usage: /rename <title>".to_string()),
            "switch" => match arg.parse::<usize>() {
                Ok(n) if n > 0 => Command::Switch(n),
                _ => Command::Invalid("usage: /switch <number from /list>".to_string()),
            },
            "history" => match arg.to_ascii_lowercase().as_str() {
                "on" => Command::History(true),
                "off" => Command::History(false),
                _ => Command::Invalid("usage: /history on|off".to_string()),
            },
            other => Command::Invalid(format!("unknown command /{other}; try /help")),
        };
        Some(command)
    }
}

pub struct TerminalApp {
    api: ApiClient,
    user_id: String,
    conversation_id: String,
    events: Receiver<FrontendEvent>,
}

impl TerminalApp {
    pub fn new(api: ApiClient, user_id: String, events: Receiver<FrontendEvent>) -> Self {
        Self {
            api,
            user_id,
            conversation_id: String::new(),
            events,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        match self.api.rehydrate(&self.user_id).await {
            Ok(context) => println!("{}", chat::render_greeting(&context)),
            Err(e) => {
                tracing::warn!("Could not load earlier context: {}", e);
                println!("Welcome. How are you feeling?");
            }
        }
        self.confirm_history(&mut lines).await?;
        self.conversation_id = self.api.create_conversation(&self.user_id).await?;
        println!("{}", chat::render_help());

        loop {
            prompt().await?;
            let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
                break;
            };
            let Some(command) = Command::parse(&line) else {
                continue;
            };
            if command == Command::Quit {
                break;
            }
            if let Err(e) = self.handle(command).await {
                println!("  (something went wrong: {e:#})");
            }
            self.drain_events();
        }
        println!("Take care.");
        Ok(())
    }

    /// Asks once whether conversations may be kept between sessions.
    async fn confirm_history<R>(&self, lines: &mut tokio::io::Lines<R>) -> Result<()>
    where
        R: tokio::io::AsyncBufRead + Unpin,
    {
        let prefs = self.api.get_preferences(&self.user_id).await?;
        if prefs.persist_confirmed {
            return Ok(());
        }
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(b"May I remember our conversations between sessions? [Y/n] ")
            .await?;
        stdout.flush().await?;
        let answer = lines.next_line().await?.unwrap_or_default();
        let persist_history = !matches!(answer.trim().to_ascii_lowercase().as_str(), "n" | "no");
        self.api
            .save_preferences(
                &self.user_id,
                &UserPreferences {
                    persist_history,
                    persist_confirmed: true,
                },
            )
            .await?;
        Ok(())
    }

    async fn handle(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Say(text) => {
                let result = self
                    .api
                    .send_turn(&self.user_id, &self.conversation_id, &text)
                    .await?;
                println!("{}", chat::render_reply(&result));
            }
            Command::List => {
                let conversations = self.api.list_conversations(&self.user_id, LIST_LIMIT).await?;
                println!(
                    "{}",
                    chat::render_conversation_list(&conversations, &self.conversation_id)
                );
            }
            Command::Switch(n) => {
                let conversations = self.api.list_conversations(&self.user_id, LIST_LIMIT).await?;
                match conversations.get(n - 1) {
                    Some(conv) => {
                        self.conversation_id = conv.conversation_id.clone();
                        println!("  Switched to \"{}\".", conv.title);
                    }
                    None => println!("  No conversation {n}; see /list."),
                }
            }
            Command::New => {
                self.conversation_id = self.api.create_conversation(&self.user_id).await?;
                println!("  Started a new conversation.");
            }
            Command::Rename(title) => {
                if self
                    .api
                    .rename_conversation(&self.user_id, &self.conversation_id, &title)
                    .await?
                {
                    println!("  Renamed to \"{title}\".");
                }
            }
            Command::Delete => {
                self.api
                    .delete_conversation(&self.user_id, &self.conversation_id)
                    .await?;
                self.conversation_id = self.api.create_conversation(&self.user_id).await?;
                println!("  Deleted. Starting fresh.");
            }
            Command::State => {
                let state = self
                    .api
                    .conversation_state(&self.user_id, &self.conversation_id)
                    .await?;
                println!("  {}", chat::render_state(&state));
            }
            Command::History(persist_history) => {
                let prefs = UserPreferences {
                    persist_history,
                    persist_confirmed: true,
                };
                let saved = self.api.save_preferences(&self.user_id, &prefs).await?;
                println!(
                    "  History {}{}.",
                    if persist_history { "on" } else { "off" },
                    if saved { "" } else { " (not saved)" }
                );
            }
            Command::Help => println!("{}", chat::render_help()),
            Command::Invalid(message) => println!("  {message}"),
            Command::Quit => {}
        }
        Ok(())
    }

    fn drain_events(&self) {
        for event in self.events.drain() {
            match event {
                FrontendEvent::PersistenceDegraded(operation) => {
                    println!("  (couldn't save just now: {operation})");
                }
                FrontendEvent::Fallback { conversation_id }
                    if conversation_id == self.conversation_id =>
                {
                    tracing::debug!("Backend used its fallback reply");
                }
                FrontendEvent::ThemeReflected { .. } | FrontendEvent::Fallback { .. } => {}
            }
        }
    }
}

async fn prompt() -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"> ").await?;
    stdout.flush().await?;
    Ok(())
}
