//! Message boundary between a running synchronization and its host.
//!
//! One unbounded channel carries two kinds of traffic: fire-and-forget
//! [`ProgressEvent`]s and at most one [`ConfirmationRequest`] per run, which
//! carries its own single-slot reply channel. Progress is advisory; losing it
//! never changes the outcome of a run.

use tokio::sync::{mpsc, oneshot};

/// Advisory progress telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Human-readable status line.
    Message(String),
    /// Numeric progress through the fetch phase.
    Counter { current: usize, total: usize },
    /// A target could not be migrated and stays in its legacy shape.
    MigrationFailed { target: String, reason: String },
}

/// Question sent to the host, answered with a boolean.
#[derive(Debug)]
pub struct ConfirmationRequest {
    question: String,
    reply: oneshot::Sender<bool>,
}

impl ConfirmationRequest {
    pub fn question(&self) -> &str {
        &self.question
    }

    /// Answer the request. Returns `false` if the run no longer listens.
    pub fn respond(self, answer: bool) -> bool {
        self.reply.send(answer).is_ok()
    }
}

/// Everything a synchronization sends to its host.
#[derive(Debug)]
pub enum WorkerMessage {
    Progress(ProgressEvent),
    ConfirmSchemaMigration(ConfirmationRequest),
}

/// Sending side of the boundary, held by the running synchronization.
#[derive(Debug, Clone, Default)]
pub struct ProgressChannel {
    sender: Option<mpsc::UnboundedSender<WorkerMessage>>,
}

impl ProgressChannel {
    /// Create a connected channel and the host's receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkerMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A channel with no host. Progress is dropped and confirmations are
    /// declined.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: ProgressEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(WorkerMessage::Progress(event)).is_err() {
            tracing::trace!("Progress receiver gone, dropping event");
        }
    }

    pub fn message(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::Message(message.into()));
    }

    pub fn counter(&self, current: usize, total: usize) {
        self.emit(ProgressEvent::Counter { current, total });
    }

    /// Ask the host `question` and wait for the answer.
    ///
    /// Waits as long as the host keeps the request alive. A detached
    /// channel, a dropped receiver or a dropped request all answer `false`.
    pub async fn confirm(&self, question: impl Into<String>) -> bool {
        let Some(sender) = &self.sender else {
            tracing::debug!("No host attached, declining confirmation");
            return false;
        };

        let (reply, answer) = oneshot::channel();
        let request = ConfirmationRequest {
            question: question.into(),
            reply,
        };
        if sender
            .send(WorkerMessage::ConfirmSchemaMigration(request))
            .is_err()
        {
            tracing::warn!("Host stopped listening, treating confirmation as declined");
            return false;
        }

        match answer.await {
            Ok(answer) => answer,
            Err(_) => {
                tracing::warn!("Confirmation request dropped unanswered, treating as declined");
                false
            }
        }
    }
}
