//! Stdio front transport: one session per process, line-delimited JSON.
//!
//! Responses and forwarded notifications are funnelled through a single
//! writer task so that notifications emitted mid-call interleave correctly
//! with long-running requests instead of waiting for them.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::VariantGateError;
use crate::notify::FrontSession;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, ParsedRequests, parse_jsonrpc};
use crate::server::{FrontContext, ProxyCore, VariantServer};

/// Serve a single session over stdin/stdout until EOF.
pub async fn serve_stdio(server: VariantServer) -> Result<(), VariantGateError> {
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve_io(server, stdin, stdout).await
}

/// Serve a single session over arbitrary I/O halves until EOF.
///
/// The session and every inner connection it owns are torn down when the
/// reader ends, and the whole proxy is closed before returning.
pub async fn serve_io<R, W>(
    server: VariantServer,
    reader: R,
    writer: W,
) -> Result<(), VariantGateError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let core = Arc::new(server.assemble(false).await?);
    let result = run_session(&core, reader, writer).await;
    core.close().await;
    result
}

async fn run_session<R, W>(
    core: &Arc<ProxyCore>,
    reader: R,
    mut writer: W,
) -> Result<(), VariantGateError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    // Single outbox: responses and notifications share one ordered writer.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            if writer.write_all(line.as_bytes()).await.is_err()
                || writer.write_all(b"\n").await.is_err()
                || writer.flush().await.is_err()
            {
                break;
            }
        }
    });

    // Forwarded inner notifications drain into the outbox as they arrive,
    // even while a request is in flight.
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<JsonRpcRequest>();
    let pump_out = out_tx.clone();
    let pump_task = tokio::spawn(async move {
        while let Some(notification) = notify_rx.recv().await {
            match serde_json::to_string(&notification) {
                Ok(line) => {
                    if pump_out.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "dropping unserializable notification"),
            }
        }
    });

    let session_id = Uuid::new_v4();
    let context = FrontContext::new(session_id, Some(FrontSession::new(session_id, notify_tx)));
    debug!(session = %session_id, "stdio session open");

    let mut lines = reader.lines();
    let outcome = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(e) => break Err(VariantGateError::from(e)),
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_jsonrpc(line.as_bytes()) {
            Ok(ParsedRequests::Single(request)) => {
                if let Some(response) = core.handle(&context, request).await {
                    send_json(&out_tx, &response);
                }
            }
            Ok(ParsedRequests::Batch(requests)) => {
                let mut responses = Vec::with_capacity(requests.len());
                for request in requests {
                    if let Some(response) = core.handle(&context, request).await {
                        responses.push(response);
                    }
                }
                if !responses.is_empty() {
                    send_json(&out_tx, &responses);
                }
            }
            Err(e) => {
                send_json(&out_tx, &JsonRpcResponse::error(None, e.into()));
            }
        }
    };

    debug!(session = %session_id, "stdio session closed");
    core.close_session(session_id);
    pump_task.abort();
    drop(out_tx);
    let _ = writer_task.await;
    outcome
}

fn send_json<T: serde::Serialize>(out: &mpsc::UnboundedSender<String>, value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => {
            let _ = out.send(line);
        }
        Err(e) => warn!(error = %e, "dropping unserializable response"),
    }
}
