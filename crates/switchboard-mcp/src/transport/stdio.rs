//! Stdio transport: reads JSON-RPC from stdin, writes to stdout.
//!
//! Envelopes are handled one at a time by a single worker, so replies leave in
//! the order requests arrived. Cancellation notifications skip the queue.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use serde_json::Value;

use crate::protocol::ProtocolHandler;
use crate::types::{methods, JsonRpcMessage, McpError, McpResult};

use super::framing;

const QUEUE_DEPTH: usize = 64;

enum Inbound {
    Message(JsonRpcMessage),
    /// A payload that failed to decode, with its error reply.
    Rejected(Value),
}

/// Stdio transport for desktop MCP clients.
pub struct StdioTransport {
    handler: ProtocolHandler,
}

impl StdioTransport {
    pub fn new(handler: ProtocolHandler) -> Self {
        Self { handler }
    }

    /// Run the transport loop on stdin and stdout.
    pub async fn run(&self) -> McpResult<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve newline-delimited JSON from `reader`, replying on `writer`, until
    /// EOF. The session is closed afterwards.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> McpResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let worker = tokio::spawn(write_loop(self.handler.clone(), rx, writer));
        let mut lines = BufReader::new(reader).lines();

        tracing::info!("Stdio transport started for session {}", self.handler.session_id());

        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let inbound = match framing::decode(trimmed.as_bytes()) {
                Ok(JsonRpcMessage::Notification(n)) if methods::is_cancellation(&n.method) => {
                    self.handler
                        .handle_message(JsonRpcMessage::Notification(n))
                        .await;
                    continue;
                }
                Ok(message) => Inbound::Message(message),
                Err(e) => Inbound::Rejected(self.handler.rejection(trimmed.as_bytes(), e)),
            };

            if tx.send(inbound).await.is_err() {
                tracing::warn!("Writer stopped, no longer reading stdin");
                break;
            }
        }

        tracing::info!("EOF on stdin, shutting down");
        drop(tx);
        let written = worker
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        if let Err(e) = self.handler.disconnect().await {
            tracing::warn!("Failed to close session: {e}");
        }
        written
    }
}

async fn write_loop<W>(
    handler: ProtocolHandler,
    mut rx: mpsc::Receiver<Inbound>,
    mut writer: W,
) -> McpResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(inbound) = rx.recv().await {
        let reply = match inbound {
            Inbound::Message(message) => handler.handle_message(message).await,
            Inbound::Rejected(reply) => Some(reply),
        };

        if let Some(reply) = reply {
            let framed = framing::frame_message(&reply)?;
            writer.write_all(framed.as_bytes()).await?;
            writer.flush().await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::io::AsyncReadExt;

    use crate::config::ServerConfig;
    use crate::session::SessionManager;

    #[tokio::test]
    async fn test_replies_follow_request_order() {
        let core = Arc::new(SessionManager::in_memory(ServerConfig::default()).unwrap());
        let handler = ProtocolHandler::connect(core.clone(), None).await;
        let transport = StdioTransport::new(handler.clone());

        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18","capabilities":{},"clientInfo":{"name":"t","version":"1"}}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            "not json\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"echo","arguments":{"text":"hi"}}}"#,
            "\n",
        );

        let (mut client, server) = tokio::io::duplex(64 * 1024);
        transport.serve(input.as_bytes(), server).await.unwrap();

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        let replies: Vec<Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0]["id"], 1);
        assert_eq!(replies[1]["error"]["code"], -32700);
        assert_eq!(replies[2]["id"], 2);
        assert_eq!(replies[2]["result"]["content"][0]["text"], "hi");

        let session = core.ledger().sessions.get(handler.session_id()).await.unwrap();
        assert!(session.is_closed());
        assert!(session.initialized);
    }
}
