//! Generator orchestrator: turns one user message into a streamed,
//! persisted exchange.
//!
//! `generate` appends the user turn, retrieves grounding context, builds a
//! bounded prompt, and streams the model's output fragment by fragment.
//! The stream is finite and not restartable. A producer task forwards
//! fragments into a channel; dropping the consumer (client disconnect)
//! fires a cancellation token, the upstream model call is aborted, and
//! whatever output was already produced is appended as a `truncated`
//! agent turn — partial answers are never lost.
//!
//! Failure rules:
//! - before any fragment: `generation_error`, no agent turn is appended;
//! - mid-stream: `generation_interrupted`, partial content appended with
//!   `truncated = true`.

use futures_util::Stream;
use log::{debug, warn};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::GenerationConfig;
use crate::error::{Result, ServiceError};
use crate::generate::{ChatModel, ChatPrompt, PromptMessage};
use crate::models::{RetrievedChunk, Role, Turn};
use crate::registry::AssetRegistry;
use crate::retrieve::Retriever;
use crate::threads::ThreadStore;

/// One event of a generation stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A text fragment, in model order.
    Delta(String),
    /// Generation completed; the concatenated fragments were appended as
    /// the agent turn with this sequence number.
    Done { sequence_number: i64 },
    /// Generation failed. `kind` is the stable error kind
    /// (`generation_error` before the first fragment,
    /// `generation_interrupted` after).
    Error { kind: &'static str, message: String },
}

/// Consumer half of a generation. Dropping it cancels the in-flight
/// model call and triggers the truncated-append path.
#[derive(Debug)]
pub struct GenerationStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
}

impl GenerationStream {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }
}

impl Stream for GenerationStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for GenerationStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    threads: ThreadStore,
    registry: AssetRegistry,
    retriever: Retriever,
    model: Arc<dyn ChatModel>,
    config: GenerationConfig,
}

enum Outcome {
    Completed,
    Interrupted(String),
    Cancelled,
}

impl Orchestrator {
    pub fn new(
        threads: ThreadStore,
        registry: AssetRegistry,
        retriever: Retriever,
        model: Arc<dyn ChatModel>,
        config: GenerationConfig,
    ) -> Self {
        Self {
            threads,
            registry,
            retriever,
            model,
            config,
        }
    }

    /// Process one user message on a thread and stream the reply.
    ///
    /// Fails fast — without mutating thread state — with `ThreadNotFound`,
    /// `ThreadBusy`, or `AssetNotReady` (the thread's asset regressed or
    /// was deleted). Holds the thread's busy guard until the agent turn is
    /// persisted.
    pub async fn generate(&self, thread_id: &str, user_message: &str) -> Result<GenerationStream> {
        let thread = self.threads.get(thread_id).await?;
        let guard = self.threads.try_begin_generation(thread_id)?;

        // Asset gate before touching the thread. A thread's asset binding
        // is a weak reference: missing means NotReady here, not NotFound.
        match self.registry.get_indexed(&thread.asset_id).await {
            Err(ServiceError::AssetNotFound(id)) => return Err(ServiceError::AssetNotReady(id)),
            Err(e) => return Err(e),
            Ok(_) => {}
        }

        let user_seq = self
            .threads
            .append_user_turn(thread_id, user_message)
            .await?;

        let context = self
            .retriever
            .retrieve_for_thread(&thread, user_message)
            .await?;

        let history = self.threads.history(thread_id).await?;
        let prior: Vec<&Turn> = history
            .iter()
            .filter(|t| t.sequence_number < user_seq)
            .collect();
        let prompt = build_prompt(&self.config, &context, &prior, user_message);
        debug!(
            "thread {}: prompt with {} context chunks, {} prior turns",
            thread_id,
            context.len(),
            prompt.messages.len() - 1
        );

        // A failure to even open the stream is a plain GenerationError and
        // appends nothing.
        let mut model_rx = self.model.stream_chat(&prompt).await?;

        let (tx, rx) = mpsc::channel(100);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let threads = self.threads.clone();
        let thread_id = thread_id.to_string();

        tokio::spawn(async move {
            // The busy guard lives until the exchange is fully persisted.
            let _guard = guard;
            let mut collected = String::new();

            let outcome = loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break Outcome::Cancelled,
                    fragment = model_rx.recv() => match fragment {
                        Some(Ok(delta)) => {
                            collected.push_str(&delta);
                            if tx.send(StreamEvent::Delta(delta)).await.is_err() {
                                break Outcome::Cancelled;
                            }
                        }
                        Some(Err(e)) => break Outcome::Interrupted(e.to_string()),
                        None => break Outcome::Completed,
                    }
                }
            };

            // Abort the upstream call instead of draining it.
            drop(model_rx);

            match outcome {
                Outcome::Completed => {
                    match threads
                        .append_agent_turn(&thread_id, &collected, &context, false)
                        .await
                    {
                        Ok(seq) => {
                            let _ = tx
                                .send(StreamEvent::Done {
                                    sequence_number: seq,
                                })
                                .await;
                        }
                        Err(e) => {
                            warn!("thread {}: failed to persist agent turn: {}", thread_id, e);
                            let _ = tx
                                .send(StreamEvent::Error {
                                    kind: "internal",
                                    message: e.to_string(),
                                })
                                .await;
                        }
                    }
                }
                Outcome::Interrupted(message) if collected.is_empty() => {
                    // Died before producing anything: no turn to salvage.
                    let _ = tx
                        .send(StreamEvent::Error {
                            kind: "generation_error",
                            message,
                        })
                        .await;
                }
                Outcome::Interrupted(message) => {
                    warn!("thread {}: generation interrupted: {}", thread_id, message);
                    if let Err(e) = threads
                        .append_agent_turn(&thread_id, &collected, &context, true)
                        .await
                    {
                        warn!("thread {}: failed to persist partial turn: {}", thread_id, e);
                    }
                    let _ = tx
                        .send(StreamEvent::Error {
                            kind: "generation_interrupted",
                            message,
                        })
                        .await;
                }
                Outcome::Cancelled => {
                    debug!("thread {}: generation cancelled by client", thread_id);
                    if !collected.is_empty() {
                        if let Err(e) = threads
                            .append_agent_turn(&thread_id, &collected, &context, true)
                            .await
                        {
                            warn!(
                                "thread {}: failed to persist partial turn: {}",
                                thread_id, e
                            );
                        }
                    }
                    // The consumer is usually gone; best effort.
                    let _ = tx
                        .send(StreamEvent::Error {
                            kind: "generation_interrupted",
                            message: "cancelled by client".to_string(),
                        })
                        .await;
                }
            }
        });

        Ok(GenerationStream { rx, cancel })
    }
}

/// Assemble the bounded prompt: system instructions with the retrieved
/// context, prior turns truncated oldest-first under the history budget,
/// and the new user message (always included).
pub fn build_prompt(
    config: &GenerationConfig,
    context: &[RetrievedChunk],
    prior: &[&Turn],
    user_message: &str,
) -> ChatPrompt {
    let mut system = String::from(
        "You are an assistant for question-answering tasks. Use the retrieved \
         document excerpts below to answer the question. If the excerpts do not \
         contain the answer, say that you don't know. Keep answers concise.\n\n",
    );
    if context.is_empty() {
        system.push_str("No relevant excerpts were found in the document.\n");
    } else {
        for (i, chunk) in context.iter().enumerate() {
            system.push_str(&format!("Excerpt {} (page {}):\n{}\n\n", i + 1, chunk.page, chunk.text));
        }
    }

    // Keep the newest turns that fit the budget, then restore order.
    let mut kept: Vec<PromptMessage> = Vec::new();
    let mut used = 0usize;
    for turn in prior.iter().rev() {
        let cost = turn.content.chars().count();
        if used + cost > config.history_budget_chars {
            break;
        }
        used += cost;
        kept.push(PromptMessage {
            role: match turn.role {
                Role::User => "user",
                Role::Agent => "assistant",
            },
            content: turn.content.clone(),
        });
    }
    kept.reverse();

    kept.push(PromptMessage {
        role: "user",
        content: user_message.to_string(),
    });

    ChatPrompt {
        system,
        messages: kept,
    }
}
