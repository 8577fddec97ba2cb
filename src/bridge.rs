//! Line-delimited JSON transport for bridge calls.
//!
//! Each input line is a [`MethodCall`] with an optional `seq`; each output
//! line is a [`Response`] echoing it. Replies are written in the order they
//! complete, not the order the calls arrived.

use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    communication::{BridgeReply, MethodCall},
    error::{AlarmError, Result},
    plugin::AlarmPlugin,
};

/// A bridge call as read from the transport.
#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(flatten)]
    pub call: MethodCall,
}

/// A bridge reply as written to the transport.
#[derive(Debug, Serialize)]
pub struct Response {
    pub seq: Option<u64>,
    pub reply: BridgeReply,
}

/// Answers calls from `reader` until it ends or `shutdown` is cancelled.
///
/// Cancellation delivers the kill notice first. Either way every call that
/// was read is answered on `writer` before this returns, so the engine can
/// be shut down right after.
pub async fn serve<R, W>(
    plugin: &AlarmPlugin,
    reader: R,
    writer: &mut W,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (replies, mut outgoing) = mpsc::unbounded_channel();
    let mut lines = reader.lines();
    let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                plugin.terminating().await;
                break;
            }
            Some(response) = outgoing.recv() => write_response(writer, &response).await?,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                in_flight.retain(|call| !call.is_finished());
                if let Some(call) = accept(plugin, &line, &replies) {
                    in_flight.push(call);
                }
            }
        }
    }

    for call in in_flight {
        if let Err(e) = call.await {
            log::error!("bridge call task failed: {e}");
        }
    }
    drop(replies);
    while let Some(response) = outgoing.recv().await {
        write_response(writer, &response).await?;
    }
    Ok(())
}

/// Dispatches one input line. Unreadable lines are answered on the spot.
fn accept(
    plugin: &AlarmPlugin,
    line: &str,
    replies: &mpsc::UnboundedSender<Response>,
) -> Option<JoinHandle<()>> {
    if line.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<Request>(line) {
        Ok(Request { seq, call }) => {
            let replies = replies.clone();
            Some(plugin.dispatch(call, move |reply| {
                let _ = replies.send(Response { seq, reply });
            }))
        }
        Err(e) => {
            log::error!("unreadable bridge call {line:?}: {e}");
            let _ = replies.send(Response {
                seq: None,
                reply: AlarmError::from(e).into(),
            });
            None
        }
    }
}

async fn write_response<W>(writer: &mut W, response: &Response) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
