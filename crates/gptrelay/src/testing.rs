//! Test utilities for gptrelay - scripted backends
//!
//! [`ScriptedBackend`] stands in for a real upstream so relay, selector and
//! HTTP tests run without network access.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::{
    BackendError, BackendEvent, BackendKind, BackendMessage, BackendStream, ChatBackend,
    KeyedMessage, SendOptions, SessionMessage, spawn_backend_stream,
};

/// Message id of every scripted reply
pub const SCRIPTED_REPLY_ID: &str = "reply-1";

#[derive(Debug, Clone)]
enum Ending {
    Complete,
    Fail(BackendError),
    /// Never finish; only cancellation ends the stream
    Hang,
}

/// A backend that replays a fixed script of text chunks.
///
/// Each chunk extends the accumulated reply and is emitted as one progress
/// event; the accumulated text is then completed, failed or left hanging.
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    kind: BackendKind,
    chunks: Vec<String>,
    ending: Ending,
    calls: Arc<AtomicUsize>,
    last_options: Arc<Mutex<Option<SendOptions>>>,
}

impl ScriptedBackend {
    fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            chunks: vec!["a".to_string(), "b".to_string()],
            ending: Ending::Complete,
            calls: Arc::new(AtomicUsize::new(0)),
            last_options: Arc::new(Mutex::new(None)),
        }
    }

    /// A keyed backend replying "a", "ab"
    pub fn keyed() -> Self {
        Self::new(BackendKind::Keyed)
    }

    /// A session backend replying "a", "ab"
    pub fn session() -> Self {
        Self::new(BackendKind::Session)
    }

    pub fn with_chunks(mut self, chunks: &[&str]) -> Self {
        self.chunks = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Fail with `err` after the scripted chunks
    pub fn failing(mut self, err: BackendError) -> Self {
        self.ending = Ending::Fail(err);
        self
    }

    /// Stall after the scripted chunks until cancelled
    pub fn hanging(mut self) -> Self {
        self.ending = Ending::Hang;
        self
    }

    /// Number of `send_message` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Options passed to the most recent call
    pub fn last_options(&self) -> Option<SendOptions> {
        self.last_options
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn message(&self, text: &str, options: &SendOptions) -> BackendMessage {
        let conversation_id = options.conversation_id.clone();
        let parent_message_id = options
            .parent_message_id
            .clone()
            .or_else(|| Some("prompt-1".to_string()));

        match self.kind {
            BackendKind::Keyed => BackendMessage::Keyed(KeyedMessage {
                id: SCRIPTED_REPLY_ID.to_string(),
                text: text.to_string(),
                conversation_id,
                parent_message_id,
            }),
            BackendKind::Session => BackendMessage::Session(SessionMessage {
                message_id: SCRIPTED_REPLY_ID.to_string(),
                response: text.to_string(),
                conversation_id,
                parent_message_id,
            }),
        }
    }
}

impl ChatBackend for ScriptedBackend {
    fn send_message(&self, _message: &str, options: SendOptions) -> BackendStream {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_options
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(options.clone());

        let mut text = String::new();
        let mut progress = Vec::with_capacity(self.chunks.len());
        for chunk in &self.chunks {
            text.push_str(chunk);
            progress.push(self.message(&text, &options));
        }
        let last = self.message(&text, &options);
        let ending = self.ending.clone();

        spawn_backend_stream(options.cancel.clone(), move |tx| async move {
            for message in progress {
                if tx.send(Ok(BackendEvent::Progress(message))).await.is_err() {
                    return;
                }
            }
            match ending {
                Ending::Complete => {
                    let _ = tx.send(Ok(BackendEvent::Completed(last))).await;
                }
                Ending::Fail(err) => {
                    let _ = tx.send(Err(err)).await;
                }
                Ending::Hang => std::future::pending::<()>().await,
            }
        })
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }
}
