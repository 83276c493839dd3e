//! Chat command handling: `/start`, `/setsource`, `/download`.
//!
//! The controller turns one incoming message into at most one run. Sources
//! are remembered per conversation in a [`SourceRegistry`]; the run delivers
//! into the conversation that asked for it.

use crate::notices;
use crate::pipeline::document::announce;
use crate::run::{RunOrchestrator, RunReport};
use crate::session::{SessionId, SourceRegistry};
use crate::transport::{ChatTarget, Notifier};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A recognised chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    /// `None` when the argument is missing.
    SetSource(Option<String>),
    Download,
    Unknown(String),
}

/// Parse a message. Returns `None` for anything that is not a command.
///
/// Accepts the `/cmd@botname` form Telegram uses in groups, and the older
/// `/setchannel` spelling of `/setsource`.
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;
    let (head, arg) = match rest.split_once(char::is_whitespace) {
        Some((head, arg)) => (head, arg.trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();

    let command = match name.as_str() {
        "start" | "help" => Command::Start,
        "setsource" | "setchannel" => {
            Command::SetSource((!arg.is_empty()).then(|| arg.to_string()))
        }
        "download" => Command::Download,
        _ => Command::Unknown(name),
    };
    Some(command)
}

/// Dispatches commands to the registry and the orchestrator.
pub struct BotController {
    registry: Arc<SourceRegistry>,
    orchestrator: Arc<RunOrchestrator>,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
}

impl BotController {
    pub fn new(
        registry: Arc<SourceRegistry>,
        orchestrator: Arc<RunOrchestrator>,
        cancel: CancellationToken,
    ) -> Self {
        let notifier = orchestrator.notifier();
        Self {
            registry,
            orchestrator,
            notifier,
            cancel,
        }
    }

    /// Handle one message from `session`, replying into `target`.
    ///
    /// Returns the report when the message started a run. Failures are
    /// reported into the chat, never returned.
    pub async fn handle(&self, session: SessionId, target: ChatTarget, text: &str) -> Option<RunReport> {
        let command = parse_command(text)?;
        debug!("Session {}: {:?}", session, command);

        match command {
            Command::Start => {
                self.reply(target, notices::WELCOME).await;
                None
            }
            Command::SetSource(None) => {
                self.reply(target, notices::SET_SOURCE_USAGE).await;
                None
            }
            Command::SetSource(Some(source)) => {
                self.registry.set(session, source.clone());
                self.reply(target, &notices::source_saved(&source)).await;
                None
            }
            Command::Download => self.download(session, target).await,
            Command::Unknown(name) => {
                debug!("Ignoring unknown command /{}", name);
                None
            }
        }
    }

    async fn download(&self, session: SessionId, target: ChatTarget) -> Option<RunReport> {
        let Some(source) = self.registry.get(session) else {
            self.reply(target, notices::NO_SOURCE).await;
            return None;
        };

        info!("Session {} requested delivery from {}", session, source);
        self.reply(target, &notices::run_triggered(&source)).await;

        match self
            .orchestrator
            .run(&source, target, self.cancel.child_token())
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Run for session {} failed: {}", session, e);
                self.reply(target, &notices::run_failed(&e.to_string())).await;
                None
            }
        }
    }

    async fn reply(&self, target: ChatTarget, text: &str) {
        announce(self.notifier.as_ref(), target, text).await;
    }
}
