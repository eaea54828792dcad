//! # Git Repositories
//!
//! Local clones that git-sourced actions execute from. Any number of executions may
//! read a clone at once; refreshing it takes the lock exclusively and waits for
//! running executions to finish. Cloning and pulling happen outside the agent core;
//! [`GitRepositories::refresh_with`] runs the caller's refresh under the lock.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::config::ActionMapping;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Repository[{url}] is not registered")]
    NotFound { url: String },

    #[error("Repository[{url}] could not be refreshed: {message}")]
    Refresh { url: String, message: String },
}

/// A local clone guarded by a reader/writer lock
#[derive(Debug)]
pub struct Repository {
    url: String,
    path: PathBuf,
    lock: RwLock<()>,
}

impl Repository {
    pub fn new(url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shared access for the duration of one execution
    pub async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    /// Exclusive access; waits for every reader to finish
    pub async fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().await
    }
}

#[async_trait]
pub trait RepositoryProvider: Send + Sync {
    async fn get(&self, url: &str) -> Result<Arc<Repository>, RepositoryError>;
}

/// Registry of known clones keyed by remote URL
#[derive(Debug, Default)]
pub struct GitRepositories {
    repositories: DashMap<String, Arc<Repository>>,
}

impl GitRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, url: impl Into<String>, path: impl Into<PathBuf>) -> Arc<Repository> {
        let repository = Arc::new(Repository::new(url, path));
        info!(
            url = %repository.url(),
            path = %repository.path().display(),
            "Git repository registered"
        );
        self.repositories
            .insert(repository.url().to_string(), repository.clone());
        repository
    }

    /// Run `refresh` with exclusive access to the clone of `url`
    pub async fn refresh_with<F, T, E>(&self, url: &str, refresh: F) -> Result<T, RepositoryError>
    where
        F: FnOnce(&Path) -> Result<T, E>,
        E: std::fmt::Display,
    {
        let repository = self.lookup(url)?;
        let _guard = repository.write().await;
        debug!(url, "Refreshing git repository");
        refresh(repository.path()).map_err(|e| RepositoryError::Refresh {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Register every git url referenced by `mappings`, each cloned under `root`
    pub fn register_mappings<'a>(
        &self,
        root: &Path,
        mappings: impl IntoIterator<Item = &'a ActionMapping>,
    ) {
        for options in mappings
            .into_iter()
            .filter_map(|mapping| mapping.git_options.as_ref())
        {
            if !self.repositories.contains_key(&options.url) {
                self.register(options.url.clone(), clone_directory(root, &options.url));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    fn lookup(&self, url: &str) -> Result<Arc<Repository>, RepositoryError> {
        self.repositories
            .get(url)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RepositoryError::NotFound {
                url: url.to_string(),
            })
    }
}

/// Directory under `root` holding the clone of `url`
pub fn clone_directory(root: &Path, url: &str) -> PathBuf {
    let name: String = url
        .trim_end_matches('/')
        .trim_end_matches(".git")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    root.join(name)
}

#[async_trait]
impl RepositoryProvider for GitRepositories {
    async fn get(&self, url: &str) -> Result<Arc<Repository>, RepositoryError> {
        self.lookup(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_get_unknown_repository() {
        let repositories = GitRepositories::new();
        assert_eq!(
            repositories.get("git@example.com:x.git").await.unwrap_err(),
            RepositoryError::NotFound {
                url: "git@example.com:x.git".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_readers_share_the_clone() {
        let repositories = GitRepositories::new();
        repositories.register("url", "/tmp/clone");
        let repository = repositories.get("url").await.unwrap();

        let first = repository.read().await;
        let second = tokio::time::timeout(Duration::from_millis(100), repository.read())
            .await
            .expect("second reader should not wait");
        drop((first, second));
    }

    #[tokio::test]
    async fn test_refresh_waits_for_readers() {
        let repositories = Arc::new(GitRepositories::new());
        let repository = repositories.register("url", "/tmp/clone");
        let reading = repository.read().await;

        let refreshed = Arc::new(AtomicBool::new(false));
        let task = {
            let repositories = repositories.clone();
            let refreshed = refreshed.clone();
            tokio::spawn(async move {
                repositories
                    .refresh_with("url", |_path| {
                        refreshed.store(true, Ordering::SeqCst);
                        Ok::<_, String>(())
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!refreshed.load(Ordering::SeqCst));

        drop(reading);
        task.await.unwrap().unwrap();
        assert!(refreshed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_clone_directory_is_flat() {
        let path = clone_directory(Path::new("/repos"), "git@github.com:acme/runbooks.git");
        assert_eq!(path, Path::new("/repos/git_github_com_acme_runbooks"));
    }

    #[tokio::test]
    async fn test_refresh_error_is_reported() {
        let repositories = GitRepositories::new();
        repositories.register("url", "/tmp/clone");
        let error = repositories
            .refresh_with("url", |_| Err::<(), _>("pull failed"))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("pull failed"));
    }
}
