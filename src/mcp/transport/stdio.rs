//! stdio transport for MCP server.
//!
//! This module implements the stdio transport as specified by MCP:
//!
//! - Messages are UTF-8 encoded JSON-RPC
//! - Messages are delimited by newlines
//! - Messages must not contain embedded newlines
//! - stdin: receives messages from client
//! - stdout: sends messages to client
//! - stderr: may be used for logging (not MCP messages)
//!
//! Requests are handled one at a time: a response is written before the next
//! line is read. The transport is generic over its byte streams so it can be
//! driven from in-memory pipes.

use std::future::Future;
use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::ServeError;
use crate::mcp::protocol::{JsonRpcError, Outgoing};
use crate::mcp::server::McpServer;

/// A line-delimited JSON-RPC transport.
pub struct StdioTransport<R, W> {
    reader: R,
    writer: W,
}

impl StdioTransport<BufReader<tokio::io::Stdin>, tokio::io::Stdout> {
    /// Creates a transport over the process's stdin and stdout.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a transport over arbitrary streams.
    pub const fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Reads the next message line.
    ///
    /// Returns `None` if the input is closed (EOF).
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails. A line that is not UTF-8 is consumed
    /// and reported as [`io::ErrorKind::InvalidData`]; the stream stays usable.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut bytes = Vec::new();
        if self.reader.read_until(b'\n', &mut bytes).await? == 0 {
            return Ok(None);
        }

        if bytes.last() == Some(&b'\n') {
            bytes.pop();
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
        }

        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Writes one message followed by a newline.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub async fn write_message(&mut self, message: &Outgoing) -> io::Result<()> {
        self.write_raw(&message.to_line()).await
    }

    async fn write_raw(&mut self, json: &str) -> io::Result<()> {
        // MCP spec: messages must not contain embedded newlines
        debug_assert!(
            !json.contains('\n'),
            "JSON message must not contain embedded newlines"
        );

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// Serves requests until EOF.
    ///
    /// # Errors
    ///
    /// Returns an error if the input cannot be read or the output written.
    pub async fn run(&mut self, server: &McpServer) -> Result<(), ServeError> {
        self.run_until(server, std::future::pending()).await
    }

    /// Serves requests until EOF or until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the input cannot be read or the output written.
    pub async fn run_until<S>(&mut self, server: &McpServer, shutdown: S) -> Result<(), ServeError>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    return Ok(());
                }

                line_result = self.read_line() => {
                    let line = match line_result {
                        Ok(Some(line)) => line,
                        Ok(None) => {
                            tracing::info!("Input closed, shutting down");
                            return Ok(());
                        }
                        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                            tracing::warn!(error = %e, "Undecodable input line");
                            self.write_message(&JsonRpcError::parse_error().into()).await?;
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    };

                    if line.trim().is_empty() {
                        continue;
                    }

                    if let Some(response) = server.handle_line(&line).await {
                        self.write_message(&response).await?;
                    }
                }
            }
        }
    }
}

/// Serves MCP over the process's stdin and stdout until EOF or a shutdown
/// signal.
///
/// # Errors
///
/// Returns an error if stdin or stdout fails.
pub async fn serve(server: McpServer) -> Result<(), ServeError> {
    tracing::info!("Serving MCP over stdio");
    StdioTransport::stdio()
        .run_until(&server, super::shutdown_signal())
        .await
}
