//! # Output Sinks
//!
//! Destinations for a child process's standard streams. Sinks are shared between
//! concurrent executions, so writes take `&self`.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::config::ActionMapping;

pub trait OutputSink: Send + Sync {
    fn write_output(&self, bytes: &[u8]) -> io::Result<()>;
}

/// In-memory sink used to capture output for later parsing
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    buffer: Mutex<Vec<u8>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buffer.lock().clone()
    }

    /// Captured bytes as text, invalid UTF-8 replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }
}

impl OutputSink for CaptureBuffer {
    fn write_output(&self, bytes: &[u8]) -> io::Result<()> {
        self.buffer.lock().extend_from_slice(bytes);
        Ok(())
    }
}

/// Appends to a file, created on first use
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputSink for FileSink {
    fn write_output(&self, bytes: &[u8]) -> io::Result<()> {
        let mut guard = self.file.lock();
        if guard.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            *guard = Some(file);
        }

        match guard.as_mut() {
            Some(file) => file.write_all(bytes),
            None => Ok(()),
        }
    }
}

/// Writes every chunk to each inner sink in order
pub struct TeeSink {
    sinks: Vec<Arc<dyn OutputSink>>,
}

impl TeeSink {
    pub fn new(sinks: Vec<Arc<dyn OutputSink>>) -> Self {
        Self { sinks }
    }
}

impl OutputSink for TeeSink {
    fn write_output(&self, bytes: &[u8]) -> io::Result<()> {
        for sink in &self.sinks {
            sink.write_output(bytes)?;
        }
        Ok(())
    }
}

/// Registry of configured sinks, keyed by sink identifier (a file path)
#[derive(Default, Clone)]
pub struct ActionSinks {
    sinks: Arc<DashMap<String, Arc<dyn OutputSink>>>,
}

impl ActionSinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// One shared file sink per distinct stdout/stderr path in the mappings
    pub fn from_mappings<'a>(mappings: impl IntoIterator<Item = &'a ActionMapping>) -> Self {
        let sinks = Self::new();
        for mapping in mappings {
            for path in [&mapping.stdout, &mapping.stderr].into_iter().flatten() {
                if !path.is_empty() && !sinks.sinks.contains_key(path) {
                    debug!(path = %path, "Registering action output sink");
                    sinks.register(path.clone(), Arc::new(FileSink::new(path)));
                }
            }
        }
        sinks
    }

    pub fn register(&self, id: impl Into<String>, sink: Arc<dyn OutputSink>) {
        self.sinks.insert(id.into(), sink);
    }

    pub fn get(&self, id: Option<&str>) -> Option<Arc<dyn OutputSink>> {
        id.and_then(|id| self.sinks.get(id).map(|entry| entry.value().clone()))
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl std::fmt::Debug for ActionSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self.sinks.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("ActionSinks").field("sinks", &ids).finish()
    }
}
