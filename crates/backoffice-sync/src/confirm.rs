//! Confirmation gate
//!
//! Destructive commands run only after an explicit yes. The gate suspends the
//! calling flow until the [`Confirmer`] answers; a dropped or closed
//! confirmer counts as "no".

use async_trait::async_trait;
use backoffice_model::RecordId;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Question shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Short heading
    pub title: String,
    /// Body text
    pub message: String,
    /// Record the action would affect
    pub record: Option<RecordId>,
}

impl Prompt {
    /// Free-form prompt
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            record: None,
        }
    }

    /// Standard delete prompt
    #[must_use]
    pub fn delete(namespace: &str, id: RecordId) -> Self {
        Self {
            title: format!("Delete {namespace}"),
            message: format!("Delete {namespace} {id}? This cannot be undone."),
            record: Some(id),
        }
    }
}

/// Something that can answer a yes/no prompt
#[async_trait]
pub trait Confirmer: Send + Sync {
    /// `true` to proceed
    async fn confirm(&self, prompt: &Prompt) -> bool;
}

/// Gate in front of destructive actions
#[derive(Clone)]
pub struct ConfirmationGate {
    confirmer: Arc<dyn Confirmer>,
}

impl std::fmt::Debug for ConfirmationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationGate").finish_non_exhaustive()
    }
}

impl ConfirmationGate {
    /// Gate backed by `confirmer`
    pub fn new(confirmer: impl Confirmer + 'static) -> Self {
        Self {
            confirmer: Arc::new(confirmer),
        }
    }

    /// Gate around a shared confirmer
    #[must_use]
    pub fn from_arc(confirmer: Arc<dyn Confirmer>) -> Self {
        Self { confirmer }
    }

    /// Ask, then run `action` only if affirmed
    ///
    /// Returns `None` when declined; `action` is never called in that case.
    pub async fn guard<R>(&self, prompt: &Prompt, action: impl FnOnce() -> R) -> Option<R> {
        if self.confirmer.confirm(prompt).await {
            tracing::debug!(title = %prompt.title, "confirmed");
            Some(action())
        } else {
            tracing::debug!(title = %prompt.title, "declined");
            None
        }
    }
}

/// Confirmer with a fixed answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoConfirm(pub bool);

#[async_trait]
impl Confirmer for AutoConfirm {
    async fn confirm(&self, _prompt: &Prompt) -> bool {
        self.0
    }
}

/// A prompt waiting for the UI
#[derive(Debug)]
pub struct ConfirmationRequest {
    /// What to ask
    pub prompt: Prompt,
    reply: oneshot::Sender<bool>,
}

impl ConfirmationRequest {
    /// Answer the prompt
    pub fn respond(self, affirmed: bool) {
        // the asking view may have unmounted
        let _ = self.reply.send(affirmed);
    }
}

/// Confirmer that forwards prompts to a UI task over a channel
#[derive(Debug, Clone)]
pub struct ChannelConfirmer {
    requests: mpsc::Sender<ConfirmationRequest>,
}

impl ChannelConfirmer {
    /// Confirmer and the receiver the UI answers from
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ConfirmationRequest>) {
        let (requests, rx) = mpsc::channel(capacity.max(1));
        (Self { requests }, rx)
    }
}

#[async_trait]
impl Confirmer for ChannelConfirmer {
    async fn confirm(&self, prompt: &Prompt) -> bool {
        let (reply, answer) = oneshot::channel();
        let request = ConfirmationRequest {
            prompt: prompt.clone(),
            reply,
        };
        if self.requests.send(request).await.is_err() {
            tracing::warn!("confirmation channel closed, treating as decline");
            return false;
        }
        answer.await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn declined_action_never_runs() {
        let gate = ConfirmationGate::new(AutoConfirm(false));
        let calls = AtomicUsize::new(0);

        let result = gate
            .guard(&Prompt::new("Delete", "sure?"), || calls.fetch_add(1, Ordering::SeqCst))
            .await;

        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn affirmed_action_runs_once() {
        let gate = ConfirmationGate::new(AutoConfirm(true));
        let result = gate.guard(&Prompt::new("Delete", "sure?"), || 7).await;
        assert_eq!(result, Some(7));
    }

    #[tokio::test]
    async fn channel_confirmer_waits_for_ui() {
        let (confirmer, mut requests) = ChannelConfirmer::new(1);
        let gate = ConfirmationGate::new(confirmer);

        let ui = tokio::spawn(async move {
            let request = requests.recv().await.unwrap();
            assert_eq!(request.prompt.record, Some(RecordId(4)));
            request.respond(true);
        });

        let result = gate.guard(&Prompt::delete("user", RecordId(4)), || "deleted").await;
        ui.await.unwrap();
        assert_eq!(result, Some("deleted"));
    }

    #[tokio::test]
    async fn dropped_ui_counts_as_decline() {
        let (confirmer, requests) = ChannelConfirmer::new(1);
        drop(requests);
        assert!(!confirmer.confirm(&Prompt::new("Delete", "sure?")).await);

        let (confirmer, mut requests) = ChannelConfirmer::new(1);
        let ui = tokio::spawn(async move {
            // dropping the request without responding
            let _ = requests.recv().await;
        });
        assert!(!confirmer.confirm(&Prompt::new("Delete", "sure?")).await);
        ui.await.unwrap();
    }
}
