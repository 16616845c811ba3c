use crate::console;
use anyhow::{Context, Result};
use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::Arc;

/// Pending events between the notify thread and the action loop.
const EVENT_QUEUE_CAPACITY: usize = 100;

/// Recursively watches a fixed set of roots and runs an action for every
/// change to a non-directory entry. Events are not debounced: N changes
/// mean N actions, executed one at a time in arrival order.
pub struct ChangeWatcher {
    roots: Vec<PathBuf>,
}

impl ChangeWatcher {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Watch until `shutdown` resolves. An action that is already running
    /// when shutdown arrives is allowed to finish.
    pub async fn run<F, S>(self, action: F, shutdown: S) -> Result<()>
    where
        F: Fn(PathBuf) + Send + Sync + 'static,
        S: Future<Output = ()>,
    {
        let (tx, rx) = channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(tx)?;

        for root in &self.roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .with_context(|| format!("Failed to watch {}", root.display()))?;
            console::info(format!("Watching {}", root.display()));
        }

        // Bridge the blocking notify channel into the async loop.
        let (async_tx, mut async_rx) = tokio::sync::mpsc::channel(EVENT_QUEUE_CAPACITY);
        let pump = tokio::task::spawn_blocking(move || {
            while let Ok(event) = rx.recv() {
                if async_tx.blocking_send(event).is_err() {
                    break;
                }
            }
        });

        let mut directories = DirectoryIndex::scan(&self.roots);
        let action = Arc::new(action);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    console::warn("Stopping watcher...");
                    break;
                }
                event = async_rx.recv() => match event {
                    Some(Ok(event)) => {
                        if let Some(path) = directories.relevant_path(&event) {
                            let action = Arc::clone(&action);
                            if let Err(e) = tokio::task::spawn_blocking(move || action(path)).await {
                                console::error(format!("Change handler aborted: {}", e));
                            }
                        }
                    }
                    Some(Err(e)) => console::warn(format!("Watch error: {}", e)),
                    None => break,
                }
            }
        }

        // Dropping the watcher closes the notify channel, which ends the pump.
        drop(watcher);
        drop(async_rx);
        if let Err(e) = pump.await {
            console::warn(format!("Event pump ended abnormally: {}", e));
        }
        Ok(())
    }
}

/// Directories known under the watched roots. A renamed or deleted
/// directory no longer exists when its event arrives, so `is_dir` alone
/// cannot tell it apart from a file.
#[derive(Debug, Default)]
pub struct DirectoryIndex {
    dirs: HashSet<PathBuf>,
}

impl DirectoryIndex {
    pub fn scan(roots: &[PathBuf]) -> Self {
        let mut index = Self::default();
        for root in roots {
            index.add_tree(root);
        }
        index
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.dirs.contains(path)
    }

    /// The path an event should trigger on, or `None` for events about a
    /// directory and for pure access (open/read/close) notifications.
    pub fn relevant_path(&mut self, event: &Event) -> Option<PathBuf> {
        match event.kind {
            EventKind::Access(_) => return None,
            EventKind::Create(CreateKind::Folder) => {
                for path in &event.paths {
                    self.add_tree(path);
                }
                return None;
            }
            EventKind::Remove(RemoveKind::Folder) => {
                for path in &event.paths {
                    self.forget(path);
                }
                return None;
            }
            _ => {}
        }

        for path in &event.paths {
            if path.is_dir() && !self.dirs.contains(path) {
                self.add_tree(path);
            }
        }

        let first = event.paths.first()?;
        if !event.paths.iter().any(|p| self.dirs.contains(p)) {
            return Some(first.clone());
        }

        // Old names of renamed or removed directories are gone for good.
        if matches!(
            event.kind,
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
        ) {
            for path in &event.paths {
                if !path.is_dir() {
                    self.forget(path);
                }
            }
        }
        None
    }

    fn add_tree(&mut self, dir: &Path) {
        if !dir.is_dir() {
            return;
        }
        self.dirs.insert(dir.to_path_buf());
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    self.add_tree(&entry.path());
                }
            }
        }
    }

    fn forget(&mut self, gone: &Path) {
        self.dirs.retain(|dir| !dir.starts_with(gone));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, DataChange, RenameMode};
    use std::time::Duration;

    fn event(kind: EventKind, path: PathBuf) -> Event {
        Event::new(kind).add_path(path)
    }

    fn rename(mode: RenameMode, paths: &[&PathBuf]) -> Event {
        paths.iter().fold(
            Event::new(EventKind::Modify(ModifyKind::Name(mode))),
            |ev, p| ev.add_path((*p).clone()),
        )
    }

    #[test]
    fn test_file_events_are_relevant() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("manifest.json");
        fs::write(&file, b"{}").unwrap();
        let mut index = DirectoryIndex::scan(&[dir.path().to_path_buf()]);

        for kind in [
            EventKind::Create(CreateKind::File),
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            EventKind::Remove(RemoveKind::File),
            EventKind::Any,
        ] {
            assert_eq!(
                index.relevant_path(&event(kind, file.clone())),
                Some(file.clone())
            );
        }
    }

    #[test]
    fn test_deleted_file_is_still_relevant() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("old.bin");
        let mut index = DirectoryIndex::scan(&[dir.path().to_path_buf()]);
        let ev = event(EventKind::Remove(RemoveKind::Any), gone.clone());
        assert_eq!(index.relevant_path(&ev), Some(gone));
    }

    #[test]
    fn test_directory_events_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("nested");
        fs::create_dir(&sub).unwrap();
        let mut index = DirectoryIndex::default();

        assert_eq!(
            index.relevant_path(&event(EventKind::Create(CreateKind::Folder), sub.clone())),
            None
        );
        assert!(index.contains(&sub));
        assert_eq!(
            index.relevant_path(&event(EventKind::Modify(ModifyKind::Any), sub.clone())),
            None
        );
        assert_eq!(
            index.relevant_path(&event(EventKind::Remove(RemoveKind::Folder), sub.clone())),
            None
        );
        assert!(!index.contains(&sub));
    }

    #[test]
    fn test_directory_rename_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("olddir");
        let new = dir.path().join("newdir");
        fs::create_dir_all(old.join("inner")).unwrap();
        let mut index = DirectoryIndex::scan(&[dir.path().to_path_buf()]);

        fs::rename(&old, &new).unwrap();

        assert_eq!(index.relevant_path(&rename(RenameMode::From, &[&old])), None);
        assert_eq!(index.relevant_path(&rename(RenameMode::To, &[&new])), None);
        assert_eq!(
            index.relevant_path(&rename(RenameMode::Both, &[&old, &new])),
            None
        );
        assert!(index.contains(&new.join("inner")));
        assert!(!index.contains(&old.join("inner")));
    }

    #[test]
    fn test_file_rename_is_relevant() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("a.pak");
        let new = dir.path().join("b.pak");
        fs::write(&old, b"x").unwrap();
        let mut index = DirectoryIndex::scan(&[dir.path().to_path_buf()]);

        fs::rename(&old, &new).unwrap();

        assert_eq!(
            index.relevant_path(&rename(RenameMode::From, &[&old])),
            Some(old.clone())
        );
        assert_eq!(
            index.relevant_path(&rename(RenameMode::Both, &[&old, &new])),
            Some(old)
        );
    }

    #[test]
    fn test_removed_directory_without_folder_kind_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("levels");
        fs::create_dir(&sub).unwrap();
        let mut index = DirectoryIndex::scan(&[dir.path().to_path_buf()]);

        fs::remove_dir(&sub).unwrap();

        assert_eq!(
            index.relevant_path(&event(EventKind::Remove(RemoveKind::Any), sub.clone())),
            None
        );
        assert!(!index.contains(&sub));
    }

    #[test]
    fn test_access_events_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"a").unwrap();
        let ev = event(EventKind::Access(AccessKind::Any), file);
        assert_eq!(DirectoryIndex::default().relevant_path(&ev), None);
    }

    #[test]
    fn test_event_without_paths_is_ignored() {
        assert_eq!(
            DirectoryIndex::default().relevant_path(&Event::new(EventKind::Any)),
            None
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_file_change_runs_action() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let target = root.join("channel.json");

        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let watcher = ChangeWatcher::new(vec![root.clone()]);
        let handle = tokio::spawn(watcher.run(
            move |path| {
                let _ = seen_tx.send(path);
            },
            async move {
                let _ = stop_rx.await;
            },
        ));

        // Give the backend time to register the watch.
        tokio::time::sleep(Duration::from_millis(300)).await;
        fs::write(&target, b"{\"version\":\"1.4.0\"}").unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(10), seen_rx.recv())
            .await
            .expect("no change delivered")
            .expect("action channel closed");
        assert_eq!(seen.file_name(), target.file_name());

        let _ = stop_tx.send(());
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("watcher did not stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_directory_rename_runs_no_action() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::create_dir(root.join("olddir")).unwrap();

        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let watcher = ChangeWatcher::new(vec![root.clone()]);
        let handle = tokio::spawn(watcher.run(
            move |path| {
                let _ = seen_tx.send(path);
            },
            async move {
                let _ = stop_rx.await;
            },
        ));

        tokio::time::sleep(Duration::from_millis(300)).await;
        fs::rename(root.join("olddir"), root.join("newdir")).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        // A file write afterwards must be the first thing the action sees.
        fs::write(root.join("marker.json"), b"{}").unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(10), seen_rx.recv())
            .await
            .expect("no change delivered")
            .expect("action channel closed");
        assert_eq!(seen.file_name().unwrap(), "marker.json");

        let _ = stop_tx.send(());
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("watcher did not stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_root_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = ChangeWatcher::new(vec![dir.path().join("does-not-exist")]);
        let result = watcher.run(|_| {}, std::future::pending::<()>()).await;
        assert!(result.is_err());
    }
}
