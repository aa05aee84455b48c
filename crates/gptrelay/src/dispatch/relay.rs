//! Response relay: one backend invocation per turn, streamed to the caller
//!
//! The relay writes [`RelayFrame`]s into a channel owned by the HTTP layer,
//! which decides how they are framed on the wire. Every turn ends with
//! exactly one [`RelayFrame::Done`].

use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::RelayContext;
use super::classify::{TurnError, classify};
use crate::backend::{BackendError, BackendEvent, BackendMessage, SendOptions};
use crate::turn::{ConversationTurn, ProxyReturn, TurnResult};

/// One item written to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    /// Accumulated text so far (streaming turns only)
    Partial(ProxyReturn),
    /// The completed turn
    Final(TurnResult),
    /// The single terminal message of a failed turn
    Failed(ProxyReturn),
    /// End of stream
    Done,
}

enum Interrupt {
    Failed(TurnError),
    Cancelled,
}

impl From<TurnError> for Interrupt {
    fn from(err: TurnError) -> Self {
        Interrupt::Failed(err)
    }
}

/// Run `turn` to completion, writing frames to `out`.
///
/// Returns the completed turn, or `None` if it failed or was cancelled.
/// Cancellation fires either through `cancel` or when `out` is closed.
pub async fn relay_turn(
    ctx: Arc<RelayContext>,
    turn: ConversationTurn,
    out: mpsc::Sender<RelayFrame>,
    cancel: CancellationToken,
) -> Option<TurnResult> {
    let outcome = dispatch(&ctx, &turn, &out, &cancel).await;

    let completed = match outcome {
        Ok(result) => {
            let sink = Arc::clone(&ctx.turn_log);
            let entry = result.clone();
            tokio::spawn(async move {
                if let Err(e) = sink.append(&entry).await {
                    warn!("Failed to record turn {}: {e}", entry.message_id);
                }
            });

            if out.send(RelayFrame::Final(result.clone())).await.is_err() {
                debug!("Caller left before the final message");
            }
            Some(result)
        }
        Err(Interrupt::Failed(err)) => {
            let record = ProxyReturn::new(
                turn.parent_message_id.clone(),
                turn.conversation_id.clone(),
                err.user_text(),
            );
            let _ = out.send(RelayFrame::Failed(record)).await;
            None
        }
        Err(Interrupt::Cancelled) => {
            info!("Turn cancelled by caller");
            None
        }
    };

    // Best effort; the receiver is gone after a disconnect
    let _ = out.send(RelayFrame::Done).await;
    completed
}

async fn dispatch(
    ctx: &RelayContext,
    turn: &ConversationTurn,
    out: &mpsc::Sender<RelayFrame>,
    cancel: &CancellationToken,
) -> Result<TurnResult, Interrupt> {
    ctx.check_client_version(turn.client_version.as_deref())?;

    let selection = ctx
        .selector
        .select(turn.credential.as_deref())
        .inspect_err(|e| error!("Turn rejected: {e}"))?;

    let model = if selection.is_session {
        ctx.cooldown.effective_model(turn.requested_model.as_deref())
    } else {
        turn.requested_model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| ctx.keyed_model.clone())
    };

    info!(
        backend = selection.client.kind().as_str(),
        model = %model,
        conversation = ?turn.conversation_id,
        "Relaying turn"
    );

    let options = SendOptions {
        model: Some(model.clone()),
        conversation_id: turn.conversation_id.clone(),
        parent_message_id: turn.parent_message_id.clone(),
        cancel: cancel.clone(),
    };
    let mut events = selection.client.send_message(&turn.message, options);

    let reply: BackendMessage = loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
            _ = out.closed() => {
                cancel.cancel();
                return Err(Interrupt::Cancelled);
            }
            event = events.next() => event,
        };

        match event {
            Some(Ok(BackendEvent::Progress(message))) => {
                if !turn.streaming {
                    continue;
                }
                if cancel.is_cancelled() {
                    return Err(Interrupt::Cancelled);
                }
                let record = message.normalize(turn.conversation_id.as_deref());
                if out.send(RelayFrame::Partial(record)).await.is_err() {
                    cancel.cancel();
                    return Err(Interrupt::Cancelled);
                }
            }
            Some(Ok(BackendEvent::Completed(message))) => break message,
            Some(Err(err)) => {
                return Err(classify(err, &ctx.cooldown, selection.is_session).into());
            }
            None => {
                let err = BackendError::transport("Backend stream ended without a reply");
                return Err(classify(err, &ctx.cooldown, selection.is_session).into());
            }
        }
    };

    if selection.is_session {
        ctx.cooldown.resume_if_expired();
    }

    Ok(TurnResult {
        message_id: reply.id().to_string(),
        parent_message_id: reply
            .parent_message_id()
            .map(str::to_string)
            .or_else(|| turn.parent_message_id.clone()),
        conversation_id: reply
            .conversation_id()
            .map(str::to_string)
            .or_else(|| turn.conversation_id.clone()),
        input_message: turn.message.clone(),
        response_text: reply.text().to_string(),
        effective_model: model,
        credential: selection.credential,
    })
}
