//! File change source for [`Container::rebuild_on`].
//!
//! [`Container::rebuild_on`]: crate::container::Container::rebuild_on

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ContainerError, Result};

/// Stream that yields `()` each time the watched file is written or
/// replaced. Bursts collapse while a change is still unread.
pub struct FileChanges {
    rx: mpsc::Receiver<()>,
    path: PathBuf,
    // Dropping the watcher stops the notifications.
    _watcher: RecommendedWatcher,
}

impl FileChanges {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Stream for FileChanges {
    type Item = ();

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<()>> {
        self.rx.poll_recv(cx)
    }
}

impl fmt::Debug for FileChanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileChanges").field("path", &self.path).finish()
    }
}

/// Watches one file for modifications.
///
/// The parent directory is watched so editors that replace the file by
/// rename are still seen.
pub fn watch_file(path: impl AsRef<Path>) -> Result<FileChanges> {
    let path = path.as_ref().to_path_buf();
    let watch_error = |source| ContainerError::Watch {
        path: path.clone(),
        source,
    };

    let file_name: Option<OsString> = path.file_name().map(ToOwned::to_owned);
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let (tx, rx) = mpsc::channel(1);
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if !(event.kind.is_modify() || event.kind.is_create()) {
                return;
            }
            let touches_file = event
                .paths
                .iter()
                .any(|changed| changed.file_name() == file_name.as_deref());
            if touches_file {
                // Full means a change is already queued.
                let _ = tx.try_send(());
            }
        }
        Err(err) => warn!(error = %err, "File watcher error"),
    })
    .map_err(watch_error)?;

    watcher
        .watch(&directory, RecursiveMode::NonRecursive)
        .map_err(watch_error)?;

    info!(path = %path.display(), "Watching file for changes");
    debug!(directory = %directory.display(), "Watching parent directory");

    Ok(FileChanges {
        rx,
        path,
        _watcher: watcher,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn write_yields_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "port: 8080\n").unwrap();

        let mut changes = watch_file(&path).unwrap();
        assert_eq!(changes.path(), path.as_path());

        // Give the backend a moment to register before writing.
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(&path, "port: 9090\n").unwrap();

        let change = tokio::time::timeout(Duration::from_secs(5), changes.next()).await;
        assert_eq!(change.unwrap(), Some(()));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent").join("config.yaml");

        match watch_file(&path) {
            Err(ContainerError::Watch { path: failed, .. }) => assert_eq!(failed, path),
            other => panic!("Expected Watch error, got: {other:?}"),
        }
    }
}
