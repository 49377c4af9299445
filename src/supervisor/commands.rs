//! Requests from outside the control loop.
//!
//! The HTTP surface and any other collaborator never touch the approval
//! engine or executor directly. They send a [`Command`] over a bounded
//! channel and await the loop's reply on a oneshot.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::approval::SubmitOutcome;
use crate::types::{Action, Submission};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("control loop is not running")]
    LoopStopped,
}

#[derive(Debug)]
pub enum Command {
    Submit {
        submission: Submission,
        reply: oneshot::Sender<SubmitOutcome>,
    },
    Approve {
        id: String,
        reply: oneshot::Sender<Option<Action>>,
    },
    Reject {
        id: String,
        reply: oneshot::Sender<Option<Action>>,
    },
    /// Free-form operator text; the reply is a short acknowledgment
    Operator {
        text: String,
        reply: oneshot::Sender<String>,
    },
}

/// Cloneable handle for enqueueing commands
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Command>,
}

pub fn command_channel(capacity: usize) -> (CommandSender, mpsc::Receiver<Command>) {
    let (tx, rx) = mpsc::channel(capacity);
    (CommandSender { tx }, rx)
}

impl CommandSender {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| CommandError::LoopStopped)?;
        rx.await.map_err(|_| CommandError::LoopStopped)
    }

    pub async fn submit(&self, submission: Submission) -> Result<SubmitOutcome, CommandError> {
        self.request(|reply| Command::Submit { submission, reply }).await
    }

    /// `Ok(None)` when the id is not pending
    pub async fn approve(&self, id: impl Into<String>) -> Result<Option<Action>, CommandError> {
        let id = id.into();
        self.request(|reply| Command::Approve { id, reply }).await
    }

    /// `Ok(None)` when the id is not pending
    pub async fn reject(&self, id: impl Into<String>) -> Result<Option<Action>, CommandError> {
        let id = id.into();
        self.request(|reply| Command::Reject { id, reply }).await
    }

    pub async fn operator(&self, text: impl Into<String>) -> Result<String, CommandError> {
        let text = text.into();
        self.request(|reply| Command::Operator { text, reply }).await
    }
}

// ============================================================================
// Operator text
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// `status` or `health`: run a health check now
    Status,
    Pause(String),
    Resume(String),
    Approve(String),
    Reject(String),
    /// Known verb without its argument
    Usage(&'static str),
    /// Anything else goes to the advisor
    FreeText(String),
}

impl OperatorCommand {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let mut words = text.split_whitespace();
        let verb = words.next().unwrap_or_default().to_ascii_lowercase();
        let arg = words.next().map(str::to_string);

        match (verb.as_str(), arg) {
            ("status" | "health", _) => Self::Status,
            ("pause", Some(unit)) => Self::Pause(unit),
            ("resume", Some(unit)) => Self::Resume(unit),
            ("approve", Some(id)) => Self::Approve(id),
            ("reject", Some(id)) => Self::Reject(id),
            ("pause", None) => Self::Usage("usage: pause <unit>"),
            ("resume", None) => Self::Usage("usage: resume <unit>"),
            ("approve", None) => Self::Usage("usage: approve <action_id>"),
            ("reject", None) => Self::Usage("usage: reject <action_id>"),
            _ => Self::FreeText(text.to_string()),
        }
    }
}

/// Answers operator text that is not a command
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn reply(&self, text: &str) -> String;
}

/// Used when no advisor is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAdvisor;

#[async_trait]
impl Advisor for NullAdvisor {
    async fn reply(&self, _text: &str) -> String {
        "advisor unavailable".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operator_text() {
        assert_eq!(OperatorCommand::parse("status"), OperatorCommand::Status);
        assert_eq!(OperatorCommand::parse("  HEALTH "), OperatorCommand::Status);
        assert_eq!(
            OperatorCommand::parse("pause alpha"),
            OperatorCommand::Pause("alpha".to_string())
        );
        assert_eq!(
            OperatorCommand::parse("approve action_17"),
            OperatorCommand::Approve("action_17".to_string())
        );
        assert!(matches!(OperatorCommand::parse("resume"), OperatorCommand::Usage(_)));
        assert_eq!(
            OperatorCommand::parse("why is alpha losing?"),
            OperatorCommand::FreeText("why is alpha losing?".to_string())
        );
    }

    #[tokio::test]
    async fn test_sender_fails_when_loop_is_gone() {
        let (sender, rx) = command_channel(4);
        drop(rx);
        let err = sender.operator("status").await.unwrap_err();
        assert!(matches!(err, CommandError::LoopStopped));
    }

    #[tokio::test]
    async fn test_round_trip_through_channel() {
        let (sender, mut rx) = command_channel(4);
        let responder = tokio::spawn(async move {
            if let Some(Command::Operator { text, reply }) = rx.recv().await {
                reply.send(format!("ack {text}")).unwrap();
            }
        });
        assert_eq!(sender.operator("hello").await.unwrap(), "ack hello");
        responder.await.unwrap();
    }
}
