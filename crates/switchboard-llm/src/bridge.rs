//! Streaming bridge
//!
//! A single worker task owns the vendor's native stream and publishes
//! normalized chunks into a small bounded queue. The caller drains the queue
//! through [`ChunkStream`]. A vendor failure after the stream opened, or a
//! panic in the worker, surfaces as a terminal [`LlmError::StreamTerminated`]
//! item.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{FutureExt, Stream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::LlmError;
use crate::provider::ProviderStream;
use crate::types::{ChatCompletionChunk, completion_id, unix_now};

/// Chunks buffered between the worker and the consumer
pub const STREAM_QUEUE_CAPACITY: usize = 10;

type Item = Result<ChatCompletionChunk, LlmError>;

/// Consumer side of a bridged stream
///
/// Ends after the vendor's last chunk, or after one terminal error. Dropping
/// it stops the worker.
pub struct ChunkStream {
    rx: mpsc::Receiver<Item>,
}

impl ChunkStream {
    /// Next chunk, or `None` once the worker is done
    pub async fn next_chunk(&mut self) -> Option<Item> {
        self.rx.recv().await
    }

    /// Stop accepting chunks; the worker exits on its next send
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl Stream for ChunkStream {
    type Item = Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Envelope fields fixed for the lifetime of one stream
struct Envelope {
    id: String,
    created: u64,
    model: String,
}

/// Spawn the worker for `native` and return the consumer side
///
/// Must be called within a tokio runtime.
pub fn bridge(native: Box<dyn ProviderStream>, model: &str, cancel: CancellationToken) -> ChunkStream {
    let (tx, rx) = mpsc::channel(STREAM_QUEUE_CAPACITY);

    let envelope = Envelope {
        id: completion_id(),
        created: unix_now(),
        model: model.to_owned(),
    };

    tokio::spawn(worker(native, tx, envelope, cancel));

    ChunkStream { rx }
}

async fn worker(
    mut native: Box<dyn ProviderStream>,
    tx: mpsc::Sender<Item>,
    envelope: Envelope,
    cancel: CancellationToken,
) {
    tracing::debug!(id = %envelope.id, model = %envelope.model, "stream started");

    let outcome = AssertUnwindSafe(pump(native.as_mut(), &tx, &envelope, &cancel))
        .catch_unwind()
        .await;

    match outcome {
        Ok(sent) => {
            tracing::debug!(id = %envelope.id, chunks = sent, "stream finished");
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            tracing::error!(id = %envelope.id, model = %envelope.model, panic = %reason, "stream worker panicked");

            let terminal = Err(LlmError::StreamTerminated(format!("stream worker panicked: {reason}")));
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                _ = tx.send(terminal) => {}
            }
        }
    }

    native.close().await;
}

/// Forward native deltas until the vendor, the consumer or the token ends it
///
/// Returns the number of chunks delivered.
async fn pump(
    native: &mut dyn ProviderStream,
    tx: &mpsc::Sender<Item>,
    envelope: &Envelope,
    cancel: &CancellationToken,
) -> usize {
    let mut sent = 0;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(id = %envelope.id, "stream cancelled");
                return sent;
            }
            () = tx.closed() => {
                tracing::debug!(id = %envelope.id, "stream consumer went away");
                return sent;
            }
            next = native.recv() => next,
        };

        let item = match next {
            Ok(Some(delta)) => Ok(ChatCompletionChunk::from_delta(
                &envelope.id,
                envelope.created,
                &envelope.model,
                delta,
            )),
            Ok(None) => return sent,
            Err(e) => {
                tracing::warn!(id = %envelope.id, error = %e, "stream failed mid-flight");
                Err(e.into_stream_terminated())
            }
        };
        let terminal = item.is_err();

        let delivered = tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            result = tx.send(item) => result.is_ok(),
        };

        if !delivered || terminal {
            return sent;
        }
        sent += 1;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}
