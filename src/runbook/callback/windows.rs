//! Named-pipe-backed callback pipe.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions};
use tokio::task::JoinHandle;

use crate::constants::callback;

const ERROR_BROKEN_PIPE: i32 = 109;
const ERROR_PIPE_BUSY: i32 = 231;
const WAKE_RETRY: Duration = Duration::from_millis(10);

pub(super) fn create(
    name: &str,
    opened: Arc<AtomicBool>,
) -> io::Result<(String, JoinHandle<io::Result<Vec<u8>>>)> {
    let path = format!(r"\\.\pipe\{name}");
    let server = ServerOptions::new()
        .first_pipe_instance(true)
        .create(&path)?;

    let reader = tokio::spawn(read_all(server, opened));
    Ok((path, reader))
}

async fn read_all(mut server: NamedPipeServer, opened: Arc<AtomicBool>) -> io::Result<Vec<u8>> {
    server.connect().await?;
    opened.store(true, Ordering::Release);

    let mut data = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match server.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => data.extend_from_slice(&chunk[..n]),
            // the client disconnected
            Err(e) if e.raw_os_error() == Some(ERROR_BROKEN_PIPE) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(data)
}

/// Connect as a client and send the terminator so a waiting reader returns
pub(super) async fn wake(path: &str, reader: &JoinHandle<io::Result<Vec<u8>>>) -> io::Result<()> {
    loop {
        if reader.is_finished() {
            return Ok(());
        }

        match ClientOptions::new().open(path) {
            Ok(mut client) => {
                client.write_all(callback::TERMINATOR.as_bytes()).await?;
                return Ok(());
            }
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                tokio::time::sleep(WAKE_RETRY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Named pipes vanish with their last handle
pub(super) fn remove(_path: &str) {}
