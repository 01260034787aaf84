//! Sending a message and folding the streamed reply into the store.

use crate::augment::{self, AugmentOptions};
use crate::conversation::{Attachment, Turn};
use crate::provider::{ChatChunk, ChatRequest, ChunkStream, ProviderError, Registry};
use crate::search::Search;
use crate::store::{Store, TurnTarget};
use std::sync::Arc;
use tokio_stream::StreamExt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("a reply is still streaming in this conversation")]
    Busy,

    #[error("nothing to send")]
    EmptyInput,

    #[error("no such conversation: {0}")]
    UnknownConversation(Uuid),

    #[error("{provider} API key is not configured.")]
    CredentialMissing { provider: &'static str },

    #[error("{0}")]
    Stream(String),
}

/// What the user typed, plus an optional file.
#[derive(Debug, Clone, Default)]
pub struct UserInput {
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl UserInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachment.is_none()
    }
}

/// Outcome of applying one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue,
    Finished,
    Failed(String),
    /// The target turn is gone; stop reading.
    Abandoned,
}

/// Folds chunks into one assistant turn.
#[derive(Debug)]
pub struct Aggregator {
    target: TurnTarget,
    done: bool,
}

impl Aggregator {
    pub fn new(target: TurnTarget) -> Self {
        Self {
            target,
            done: false,
        }
    }

    pub fn target(&self) -> TurnTarget {
        self.target
    }

    pub fn apply(&mut self, store: &mut Store, chunk: ChatChunk) -> Step {
        if self.done {
            return Step::Finished;
        }
        let step = store.update_turn(self.target, |turn| {
            if let Some(message) = chunk.error {
                turn.text = format!("Error: {message}");
                turn.is_streaming = false;
                return Step::Failed(message);
            }
            if let Some(text) = &chunk.text {
                turn.text.push_str(text);
            }
            for citation in chunk.citations.into_iter().flatten() {
                if !turn.citations.contains(&citation) {
                    turn.citations.push(citation);
                }
            }
            turn.is_streaming = !chunk.is_final;
            if chunk.is_final {
                Step::Finished
            } else {
                Step::Continue
            }
        });
        let step = step.unwrap_or(Step::Abandoned);
        if step != Step::Continue {
            self.done = true;
        }
        step
    }

    /// Clear the streaming flag if it is still set.
    pub fn settle(&mut self, store: &mut Store) {
        self.done = true;
        settle(store, self.target);
    }

    /// Consume `stream` to the end, calling `observe` on every chunk first.
    ///
    /// The target turn stops streaming on every exit, including this future
    /// being dropped before completion.
    pub async fn drive<F>(mut self, mut stream: ChunkStream, store: &mut Store, mut observe: F) -> Result<(), ChatError>
    where
        F: FnMut(&ChatChunk),
    {
        let guard = SettleOnDrop {
            store,
            target: self.target,
        };
        while let Some(chunk) = stream.next().await {
            observe(&chunk);
            match self.apply(&mut *guard.store, chunk) {
                Step::Continue => {}
                Step::Finished => return Ok(()),
                Step::Failed(message) => return Err(ChatError::Stream(message)),
                Step::Abandoned => {
                    tracing::debug!(conversation = %self.target.conversation, "reply target is gone; dropping stream");
                    return Ok(());
                }
            }
        }
        tracing::debug!("stream closed without a final chunk");
        Ok(())
    }
}

fn settle(store: &mut Store, target: TurnTarget) {
    if store.turn(target).is_some_and(|t| t.is_streaming) {
        store.update_turn(target, |t| t.is_streaming = false);
    }
}

struct SettleOnDrop<'a> {
    store: &'a mut Store,
    target: TurnTarget,
}

impl Drop for SettleOnDrop<'_> {
    fn drop(&mut self) {
        settle(self.store, self.target);
    }
}

/// A send that has been recorded but not yet streamed.
pub struct PendingSend {
    pub target: TurnTarget,
    pub stream: ChunkStream,
}

#[derive(Clone)]
pub struct Chat {
    registry: Arc<Registry>,
    search: Arc<dyn Search>,
}

impl Chat {
    pub fn new(registry: Arc<Registry>, search: Arc<dyn Search>) -> Self {
        Self { registry, search }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record the user turn and an empty streaming reply, and open the
    /// provider stream without polling it.
    pub async fn begin(
        &self,
        store: &mut Store,
        conversation: Uuid,
        input: UserInput,
        opts: &AugmentOptions,
    ) -> Result<PendingSend, ChatError> {
        let conv = store
            .get(conversation)
            .ok_or(ChatError::UnknownConversation(conversation))?;
        if conv.is_streaming() {
            return Err(ChatError::Busy);
        }
        if input.is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let provider = self.registry.get(conv.provider);
        let id = provider.id();
        if !provider.is_configured() {
            tracing::warn!(provider = %id, "provider has no credentials");
            let err = ProviderError::CredentialMissing { provider: id.label() };
            store.push_turn(conversation, Turn::user(input.text, input.attachment));
            store.push_turn(conversation, Turn::assistant(format!("Error: {err}")));
            return Err(ChatError::CredentialMissing { provider: id.label() });
        }

        let history: Vec<Turn> = conv.turns().cloned().collect();
        let today = chrono::Local::now().date_naive();
        let augmented = augment::augment(&input.text, opts, self.search.as_ref(), today).await;

        let request = ChatRequest {
            prompt: augmented.prompt,
            attachment: input.attachment.clone(),
            history,
        };
        store.push_turn(conversation, Turn::user(input.text, input.attachment));
        let mut reply = Turn::placeholder();
        reply.citations = augmented.citations;
        reply.web_previews = augmented.previews;
        let target = store
            .push_turn(conversation, reply)
            .ok_or(ChatError::UnknownConversation(conversation))?;

        tracing::info!(provider = %id, conversation = %conversation, "sending message");
        Ok(PendingSend {
            target,
            stream: provider.stream_chat(request),
        })
    }

    /// Send and stream to completion. Returns where the reply landed.
    pub async fn send<F>(
        &self,
        store: &mut Store,
        conversation: Uuid,
        input: UserInput,
        opts: &AugmentOptions,
        observe: F,
    ) -> Result<TurnTarget, ChatError>
    where
        F: FnMut(&ChatChunk),
    {
        let pending = self.begin(store, conversation, input, opts).await?;
        let target = pending.target;
        Aggregator::new(target)
            .drive(pending.stream, store, observe)
            .await?;
        Ok(target)
    }
}
