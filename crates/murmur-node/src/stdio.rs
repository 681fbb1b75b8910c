//! Line-delimited JSON transport over stdin/stdout.
//!
//! Each line on the input is one message; each outbound message is written
//! as one line on the output. Anything that fails to parse is logged and
//! skipped, since there is no sender to report the failure to.

use async_trait::async_trait;
use murmur_core::{Message, Transport, TransportError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Transport speaking the line protocol over a pair of byte streams.
pub struct StdioTransport {
    outbound: mpsc::Sender<Message>,
}

/// Background tasks pumping the two streams.
pub struct StdioTasks {
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

impl StdioTransport {
    /// Bind to the process's stdin and stdout.
    pub fn spawn(capacity: usize) -> (Self, mpsc::Receiver<Message>, StdioTasks) {
        Self::with_io(tokio::io::stdin(), tokio::io::stdout(), capacity)
    }

    /// Bind to arbitrary streams.
    pub fn with_io<R, W>(
        input: R,
        output: W,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Message>, StdioTasks)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

        let tasks = StdioTasks {
            reader: tokio::spawn(read_lines(input, inbound_tx)),
            writer: tokio::spawn(write_lines(output, outbound_rx)),
        };

        (
            Self {
                outbound: outbound_tx,
            },
            inbound_rx,
            tasks,
        )
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

async fn read_lines<R: AsyncRead + Unpin>(input: R, inbound: mpsc::Sender<Message>) {
    let mut lines = BufReader::new(input).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("input closed");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to read input");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match Message::from_json(&line) {
            Ok(message) => {
                if inbound.send(message).await.is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!(error = %e, %line, "skipping unparseable message"),
        }
    }
}

async fn write_lines<W: AsyncWrite + Unpin>(mut output: W, mut outbound: mpsc::Receiver<Message>) {
    while let Some(message) = outbound.recv().await {
        let mut line = match message.to_json() {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode message");
                continue;
            }
        };
        line.push('\n');

        let written = async {
            output.write_all(line.as_bytes()).await?;
            output.flush().await
        };
        if let Err(e) = written.await {
            tracing::error!(error = %e, "failed to write output");
            break;
        }
    }
}
