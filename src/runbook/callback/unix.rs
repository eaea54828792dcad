//! FIFO-backed callback pipe.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::constants::callback;

const WAKE_RETRY: Duration = Duration::from_millis(10);

pub(super) fn create(
    name: &str,
    opened: Arc<AtomicBool>,
) -> io::Result<(String, JoinHandle<io::Result<Vec<u8>>>)> {
    let path = std::env::temp_dir().join(name);
    mkfifo(&path)?;

    let reader = tokio::spawn(read_all(path.clone(), opened));

    Ok((path.to_string_lossy().into_owned(), reader))
}

fn mkfifo(path: &Path) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())?;
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Waits for a writer to connect, then reads until every writer has closed.
///
/// Only the open blocks a thread; `wake` releases it when no writer ever comes.
/// The read itself runs on the reactor, so aborting the task drops the FIFO even
/// while a leftover writer still holds it open.
async fn read_all(path: PathBuf, opened: Arc<AtomicBool>) -> io::Result<Vec<u8>> {
    let file = tokio::task::spawn_blocking(move || File::open(path))
        .await
        .map_err(io::Error::other)??;
    opened.store(true, Ordering::Release);

    let mut receiver = pipe::Receiver::from_file(file)?;
    let mut data = Vec::new();
    receiver.read_to_end(&mut data).await?;
    Ok(data)
}

/// Connect as a writer and send the terminator so a waiting reader returns.
///
/// Opening non-blocking fails with `ENXIO` until the reader has the FIFO open;
/// retry until it does or the reader is already done.
pub(super) async fn wake(path: &str, reader: &JoinHandle<io::Result<Vec<u8>>>) -> io::Result<()> {
    loop {
        if reader.is_finished() {
            return Ok(());
        }

        match OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
        {
            Ok(mut file) => {
                return match file.write_all(callback::TERMINATOR.as_bytes()) {
                    Ok(()) => Ok(()),
                    // the reader closed between open and write
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                    Err(e) => Err(e),
                };
            }
            Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {
                tokio::time::sleep(WAKE_RETRY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

pub(super) fn remove(path: &str) {
    if let Err(e) = std::fs::remove_file(path) {
        debug!(pipe = %path, "EXECUTOR: Could not delete callback pipe: {}", e);
    }
}
