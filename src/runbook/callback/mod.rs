//! # Callback Channel
//!
//! Per-execution named pipe a child process may write a callback context to.
//!
//! The channel is created before the child starts and a background reader waits
//! on it. After the child exits, [`CallbackChannel::close`] wakes the reader if the
//! child never connected, collects whatever was received, and removes the pipe.
//! The reader streams until the writer disconnects, so callback contexts are not
//! truncated.
//!
//! Unix uses a FIFO in the temp directory, Windows a named pipe under `\\.\pipe\`.
//! Both expose the same create, read, wake and remove operations.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as platform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as platform;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::constants::callback;

/// How long `close` waits for the reader once the child has exited
const READER_GRACE: Duration = Duration::from_secs(5);

pub struct CallbackChannel {
    path: String,
    opened: Arc<AtomicBool>,
    reader: JoinHandle<io::Result<Vec<u8>>>,
}

impl CallbackChannel {
    /// Create the pipe for `execution_id` and start reading from it
    pub fn open(execution_id: &str) -> io::Result<Self> {
        let name = format!("{}{}", callback::PIPE_PREFIX, execution_id);
        let opened = Arc::new(AtomicBool::new(false));
        let (path, reader) = platform::create(&name, opened.clone())?;

        debug!(pipe = %path, "EXECUTOR: Callback pipe created");
        Ok(Self {
            path,
            opened,
            reader,
        })
    }

    /// Path or pipe name handed to the child
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Tear the channel down and return the trimmed callback context
    pub async fn close(self) -> String {
        let Self {
            path,
            opened,
            mut reader,
        } = self;

        if !opened.load(Ordering::Acquire) {
            if let Err(e) = platform::wake(&path, &reader).await {
                debug!(pipe = %path, "EXECUTOR: Could not wake callback reader: {}", e);
            }
        }

        let received = match tokio::time::timeout(READER_GRACE, &mut reader).await {
            Ok(Ok(Ok(data))) => data,
            Ok(Ok(Err(e))) => {
                debug!(pipe = %path, "EXECUTOR: Callback pipe read failed: {}", e);
                Vec::new()
            }
            Ok(Err(e)) => {
                warn!(pipe = %path, "⚠️ EXECUTOR: Callback reader task failed: {}", e);
                Vec::new()
            }
            Err(_) => {
                warn!(
                    pipe = %path,
                    "⚠️ EXECUTOR: Callback pipe still held open {:?} after the action exited",
                    READER_GRACE
                );
                reader.abort();
                Vec::new()
            }
        };

        platform::remove(&path);
        callback_context(&received)
    }
}

/// Received bytes minus the wake-up terminator, trimmed
fn callback_context(received: &[u8]) -> String {
    String::from_utf8_lossy(received)
        .replace(callback::TERMINATOR, "")
        .trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminator_is_stripped() {
        let received = format!("context-value\n{}", callback::TERMINATOR);
        assert_eq!(callback_context(received.as_bytes()), "context-value");
        assert_eq!(callback_context(callback::TERMINATOR.as_bytes()), "");
    }

    #[test]
    fn test_nul_padding_is_trimmed() {
        assert_eq!(callback_context(b"\0\0abc \0"), "abc");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_without_writer_returns_empty_context() {
        let channel = CallbackChannel::open(&uuid::Uuid::new_v4().to_string()).unwrap();
        let path = channel.path().to_string();
        assert!(std::path::Path::new(&path).exists());

        assert_eq!(channel.close().await, "");
        assert!(!std::path::Path::new(&path).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_returns_long_context() {
        use std::io::Write;

        let channel = CallbackChannel::open(&uuid::Uuid::new_v4().to_string()).unwrap();
        let path = channel.path().to_string();
        let payload = "x".repeat(10_000);

        let expected = payload.clone();
        tokio::task::spawn_blocking(move || {
            let mut file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
            file.write_all(expected.as_bytes()).unwrap();
        })
        .await
        .unwrap();

        assert_eq!(channel.close().await, payload);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_releases_pipe_held_by_lingering_writer() {
        use std::io::Write;

        let channel = CallbackChannel::open(&uuid::Uuid::new_v4().to_string()).unwrap();
        let path = channel.path().to_string();
        let mut writer = tokio::task::spawn_blocking(move || {
            std::fs::OpenOptions::new().write(true).open(path)
        })
        .await
        .unwrap()
        .unwrap();
        writer.write_all(b"partial").unwrap();

        assert_eq!(channel.close().await, "");

        tokio::time::sleep(Duration::from_millis(100)).await;
        let error = writer.write_all(b"more").unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
    }
}
