//! Server-sent event framing for bridged streams

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::LlmError;
use crate::bridge::ChunkStream;
use crate::types::ChatCompletionChunk;

/// Terminates a successful stream
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// `data: <json>\n\n`
pub fn encode_chunk(chunk: &ChatCompletionChunk) -> Result<String, LlmError> {
    let json = serde_json::to_string(chunk).map_err(|e| LlmError::Output(std::io::Error::other(e)))?;
    Ok(format!("data: {json}\n\n"))
}

/// `data: {"error": {...}}\n\n` for a terminal stream error
pub fn encode_error(error: &LlmError) -> String {
    let body = serde_json::json!({
        "error": {
            "message": error.to_string(),
            "type": error.error_type(),
            "code": error.status(),
        }
    });
    format!("data: {body}\n\n")
}

/// Drain `chunks` into `writer` as SSE frames
///
/// Writes `[DONE]` after the last chunk. A terminal error item is written as
/// one error frame, without `[DONE]`, and returned. Write failures and
/// cancellation close the queue so the worker stops.
pub async fn write_stream<W>(mut chunks: ChunkStream, writer: &mut W, cancel: &CancellationToken) -> Result<(), LlmError>
where
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                chunks.close();
                tracing::debug!("stream output cancelled");
                return Err(LlmError::Cancelled);
            }
            item = chunks.next_chunk() => item,
        };

        let frame = match item {
            None => {
                write_frame(writer, DONE_FRAME).await.inspect_err(|_| chunks.close())?;
                return Ok(());
            }
            Some(Ok(chunk)) => encode_chunk(&chunk)?,
            Some(Err(e)) => {
                if let Err(write_err) = write_frame(writer, &encode_error(&e)).await {
                    tracing::warn!(error = %write_err, "failed to write stream error frame");
                }
                return Err(e);
            }
        };

        write_frame(writer, &frame).await.inspect_err(|_| chunks.close())?;
    }
}

async fn write_frame<W>(writer: &mut W, frame: &str) -> Result<(), LlmError>
where
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
