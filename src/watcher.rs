use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_full::notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify_debouncer_full::notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::content::hash16;
use crate::discovery::FileDiscovery;
use crate::error::{Error, Result};
use crate::graph::{DiscoveredEntry, GraphStore};
use crate::ids::file_uuid;

/// A filesystem event relevant to the corpus.
#[derive(Debug, Clone)]
pub enum FileEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

/// Debounced filesystem observer (spec.md §4.10, C10). Classifies raw
/// `notify` events into `FileEvent`s, routes additions/modifications to
/// `markDiscoveredBatch` and deletions to a cascading delete. Never parses
/// a file itself — that is exclusively the processor's job once a file
/// lands back in `discovered`.
pub struct Watcher {
    config: Config,
    project_root: PathBuf,
    project_id: String,
    store: Arc<dyn GraphStore>,
    discovery: FileDiscovery,
    paused: Arc<AtomicBool>,
}

impl Watcher {
    pub fn new(config: Config, project_root: &Path, project_id: impl Into<String>, store: Arc<dyn GraphStore>) -> Self {
        let discovery = FileDiscovery::new(project_root, &config);
        Self {
            config,
            project_root: project_root.to_path_buf(),
            project_id: project_id.into(),
            store,
            discovery,
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Silently drop incoming events until [`Watcher::resume`] is called.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Pause for the duration of `f`, then resume, regardless of whether
    /// `f` succeeds. Used around a manual bulk reindex so the watcher
    /// doesn't race the processor over the same files.
    pub async fn with_pause<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.pause();
        let result = f().await;
        self.resume();
        result
    }

    /// Start watching source directories for changes. Blocks until `cancel`
    /// is triggered. Events are debounced by `config.watch_debounce_ms`.
    pub async fn watch(&self, cancel: CancellationToken) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<FileEvent>();

        let debounce_duration = Duration::from_millis(self.config.watch_debounce_ms);
        let project_root = self.project_root.clone();
        let cb_discovery = FileDiscovery::new(&self.project_root, &self.config);

        let mut debouncer = new_debouncer(
            debounce_duration,
            None,
            move |result: DebounceEventResult| {
                let events = match result {
                    Ok(events) => events,
                    Err(errs) => {
                        for e in errs {
                            error!("debouncer error: {e}");
                        }
                        return;
                    }
                };

                for event in events {
                    let file_events =
                        classify_event(&event.event.kind, &event.paths, &project_root, &cb_discovery);
                    for fe in file_events {
                        if tx.send(fe).is_err() {
                            debug!("watcher channel closed, stopping event forwarding");
                            return;
                        }
                    }
                }
            },
        )
        .map_err(|e| Error::Watch(format!("failed to create debouncer: {e}")))?;

        for source_dir in &self.config.source_dirs {
            let abs_dir = self.project_root.join(source_dir);
            if !abs_dir.is_dir() {
                debug!("skipping non-existent source dir: {}", abs_dir.display());
                continue;
            }
            debouncer
                .watch(&abs_dir, RecursiveMode::Recursive)
                .map_err(|e| Error::Watch(format!("failed to watch {}: {e}", abs_dir.display())))?;
            info!("watching directory: {}", abs_dir.display());
        }

        info!("file watcher started, debounce={}ms", self.config.watch_debounce_ms);

        loop {
            tokio::select! {
                Some(event) = rx.recv() => {
                    if self.is_paused() {
                        debug!(?event, "watcher paused, dropping event");
                        continue;
                    }
                    if let Err(e) = self.handle_event(&event).await {
                        error!("error handling event {:?}: {e}", event);
                    }
                }
                _ = cancel.cancelled() => {
                    info!("file watcher shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Process a single file event: route add/change to
    /// `markDiscoveredBatch`, unlink to a cascading delete.
    pub async fn handle_event(&self, event: &FileEvent) -> Result<()> {
        match event {
            FileEvent::Created(path) | FileEvent::Modified(path) => self.mark_changed(path).await,
            FileEvent::Deleted(path) => self.remove(path).await,
            FileEvent::Renamed { from, to } => {
                self.remove(from).await?;
                self.mark_changed(to).await
            }
        }
    }

    async fn mark_changed(&self, relative_path: &Path) -> Result<()> {
        let abs_path = self.project_root.join(relative_path);
        if !abs_path.is_file() {
            debug!(path = %relative_path.display(), "watched path no longer a file, treating as delete");
            return self.remove(relative_path).await;
        }

        let bytes = std::fs::read(&abs_path).map_err(Error::Io)?;
        let entry = DiscoveredEntry {
            relative_path: relative_path.to_string_lossy().to_string(),
            absolute_path: Some(abs_path.to_string_lossy().to_string()),
            raw_content_hash: hash16(&bytes),
            raw_content: None,
            is_virtual: false,
        };

        let report = self.store.mark_discovered_batch(&self.project_id, vec![entry]).await?;
        debug!(
            path = %relative_path.display(),
            created = report.created.len(),
            reset = report.reset.len(),
            "watched file queued for processing"
        );
        Ok(())
    }

    async fn remove(&self, relative_path: &Path) -> Result<()> {
        let uuid = file_uuid(&self.project_id, &relative_path.to_string_lossy());
        match self.store.delete_file_cascade(&uuid).await {
            Ok(()) => {
                info!(path = %relative_path.display(), "removed deleted file from corpus");
                Ok(())
            }
            Err(e) => {
                warn!(path = %relative_path.display(), error = %e, "failed to cascade-delete file");
                Err(e)
            }
        }
    }
}

/// Classify a notify event into zero or more `FileEvent` values.
fn classify_event(
    kind: &EventKind,
    paths: &[PathBuf],
    project_root: &Path,
    discovery: &FileDiscovery,
) -> Vec<FileEvent> {
    let mut result = Vec::new();

    let to_relative = |abs: &Path| -> Option<PathBuf> {
        let rel = abs.strip_prefix(project_root).ok()?;
        if discovery.should_index(rel) {
            Some(rel.to_path_buf())
        } else {
            None
        }
    };

    match kind {
        EventKind::Create(CreateKind::File) | EventKind::Create(CreateKind::Any) => {
            for path in paths {
                if let Some(rel) = to_relative(path) {
                    result.push(FileEvent::Created(rel));
                }
            }
        }
        EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Other) => {
            for path in paths {
                if let Some(rel) = to_relative(path) {
                    result.push(FileEvent::Modified(rel));
                }
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if paths.len() >= 2 {
                let from_rel = paths[0].strip_prefix(project_root).ok().map(Path::to_path_buf);
                let to_rel = to_relative(&paths[1]);
                match (from_rel, to_rel) {
                    (Some(from), Some(to)) => {
                        result.push(FileEvent::Renamed { from, to });
                    }
                    (Some(from), None) => {
                        result.push(FileEvent::Deleted(from));
                    }
                    (None, Some(to)) => {
                        result.push(FileEvent::Created(to));
                    }
                    _ => {}
                }
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            for path in paths {
                if let Ok(rel) = path.strip_prefix(project_root) {
                    result.push(FileEvent::Deleted(rel.to_path_buf()));
                }
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for path in paths {
                if let Some(rel) = to_relative(path) {
                    result.push(FileEvent::Created(rel));
                }
            }
        }
        EventKind::Remove(RemoveKind::File) | EventKind::Remove(RemoveKind::Any) => {
            for path in paths {
                if let Ok(rel) = path.strip_prefix(project_root) {
                    result.push(FileEvent::Deleted(rel.to_path_buf()));
                }
            }
        }
        _ => {}
    }

    result
}
