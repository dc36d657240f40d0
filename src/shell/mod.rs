// Shell module - THE OPERATOR
// Interactive driver: reads command lines, forwards them to a Connection, prints replies.
// The session is passed in explicitly; there is no global client.

use crate::config::ShellConfig;
use crate::connection::{Connection, SendError};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Why the shell loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellExit {
    /// The operator typed the exit command
    ExitCommand,
    /// Input was closed
    EndOfInput,
    /// The connection died underneath the shell
    ConnectionLost,
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("Shell IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Line-oriented driver over one `Connection`
pub struct Shell<'a> {
    connection: &'a Connection,
    config: ShellConfig,
}

impl<'a> Shell<'a> {
    pub fn new(connection: &'a Connection, config: ShellConfig) -> Self {
        Self { connection, config }
    }

    /// Run until exit, end of input or loss of the connection
    pub async fn run<R, W>(&self, input: R, output: &mut W) -> Result<ShellExit, ShellError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();

        loop {
            if !self.connection.is_connected() {
                output.write_all(b"connection lost\n").await?;
                output.flush().await?;
                return Ok(ShellExit::ConnectionLost);
            }

            output.write_all(self.config.prompt.as_bytes()).await?;
            output.flush().await?;

            let Some(line) = lines.next_line().await? else {
                return Ok(ShellExit::EndOfInput);
            };
            let command = line.trim();
            if command.is_empty() {
                continue;
            }
            if command.eq_ignore_ascii_case(self.config.exit_command.trim()) {
                return Ok(ShellExit::ExitCommand);
            }

            let was_streaming = self.connection.is_streaming();
            let wire = format!("{}{}", command, self.config.line_ending);
            let text = match self.connection.send_command(&wire).await {
                Ok(Some(reply)) => format!("{}\n", reply.text().trim_end()),
                Ok(None) if was_streaming => String::new(),
                Ok(None) => "(no response)\n".to_string(),
                Err(SendError::Busy) => "busy: a previous command is still awaiting its reply\n".to_string(),
                Err(e) => {
                    debug!(error = %e, "command failed");
                    format!("error: {}\n", e)
                }
            };
            output.write_all(text.as_bytes()).await?;
        }
    }
}
