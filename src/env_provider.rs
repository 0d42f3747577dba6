//! Environment providers.
//!
//! The endpoint calls its [`EnvProvider`] before every exchange and, on
//! success, replaces the session environment with the returned snapshot.
//! Refresh is advisory: a provider failure is logged by the caller and the
//! session keeps its previous snapshot.
//!
//! [`FileEnvProvider`] re-reads a dotenv file on every call so that secrets
//! rotated on disk reach the next exchange without a restart.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tracing::trace;

use crate::session::Environment;
use crate::{AppError, Result};

/// Source of the session environment.
pub trait EnvProvider: Send + Sync {
    /// Produce the full environment snapshot.
    ///
    /// # Errors
    ///
    /// Any error leaves the session's current snapshot in place.
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Environment>> + Send + '_>>;
}

impl<F> EnvProvider for F
where
    F: Fn() -> Result<Environment> + Send + Sync,
{
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Environment>> + Send + '_>> {
        let loaded = self();
        Box::pin(async move { loaded })
    }
}

/// Reads `KEY=VALUE` pairs from a dotenv file on every call.
#[derive(Debug, Clone)]
pub struct FileEnvProvider {
    path: PathBuf,
}

impl FileEnvProvider {
    /// Provider backed by the dotenv file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EnvProvider for FileEnvProvider {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Environment>> + Send + '_>> {
        let path = self.path.clone();
        Box::pin(async move {
            // dotenvy does synchronous file I/O.
            let env = tokio::task::spawn_blocking(move || read_env_file(&path))
                .await
                .map_err(|err| AppError::Config(format!("env file task panicked: {err}")))??;
            trace!(path = %self.path.display(), vars = env.len(), "env file reloaded");
            Ok(env)
        })
    }
}

/// Parse a dotenv file into an [`Environment`] without touching the
/// process environment.
///
/// # Errors
///
/// Returns `AppError::Config` if the file cannot be opened or a line cannot
/// be parsed.
pub fn read_env_file(path: &Path) -> Result<Environment> {
    let iter = dotenvy::from_path_iter(path).map_err(|err| {
        AppError::Config(format!("cannot read env file {}: {err}", path.display()))
    })?;

    iter.map(|item| {
        item.map_err(|err| {
            AppError::Config(format!("invalid env file {}: {err}", path.display()))
        })
    })
    .collect()
}
