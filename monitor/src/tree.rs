//! Bookkeeping of the files and directories known under a watched root.
//!
//! The OS backends report renames and removals of a directory as a single
//! event on the directory path, and say nothing about the files it held. The
//! [`FileTree`] remembers what exists under the root so such events can be
//! expanded into one [`FileEvent`] per affected file, and so a file is never
//! announced twice when a scan and a live notification overlap.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use notify::event::{CreateKind, MetadataKind, ModifyKind, RenameMode};
use notify::{Event, EventKind};
use tracing::{trace, warn};

use crate::types::{FileEvent, FileEventKind};

/// Known files and directories under one root.
#[derive(Debug)]
pub(crate) struct FileTree {
    root: PathBuf,
    recursive: bool,
    files: BTreeSet<PathBuf>,
    dirs: BTreeSet<PathBuf>,
}

impl FileTree {
    pub(crate) fn new(root: PathBuf, recursive: bool) -> Self {
        Self {
            root,
            recursive,
            files: BTreeSet::new(),
            dirs: BTreeSet::new(),
        }
    }

    /// Records everything under the root and returns the files that were not
    /// known yet, sorted.
    pub(crate) fn seed(&mut self) -> Vec<PathBuf> {
        let root = self.root.clone();
        let mut found = Vec::new();
        self.scan(&root, &mut found);
        found.sort();
        found
    }

    #[cfg(test)]
    pub(crate) fn contains_file(&self, path: &Path) -> bool {
        self.files.contains(path)
    }

    #[cfg(test)]
    pub(crate) fn contains_dir(&self, path: &Path) -> bool {
        self.dirs.contains(path)
    }

    /// Maps one raw notify event onto file events and updates the bookkeeping.
    ///
    /// Directory paths are never reported. A directory leaving the tree yields
    /// `Removed` for every file known under it; a directory entering the tree
    /// yields `Added` for every file found in it. Renames arrive as a `From`
    /// half and a `To` half; the combined `Both` event that inotify emits after
    /// the halves is ignored so each rename is reported once.
    pub(crate) fn apply(&mut self, event: &Event) -> Vec<FileEvent> {
        let mut out = Vec::new();

        match event.kind {
            EventKind::Create(CreateKind::Folder) => {
                for path in &event.paths {
                    self.dir_appeared(path, &mut out);
                }
            }

            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in &event.paths {
                    self.path_appeared(path, &mut out);
                }
            }

            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in &event.paths {
                    self.path_vanished(path, &mut out);
                }
            }

            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {}

            // Direction unknown (e.g. FSEvents): decide from what is on disk now
            EventKind::Modify(ModifyKind::Name(_)) => {
                for path in &event.paths {
                    if path.exists() {
                        self.path_appeared(path, &mut out);
                    } else {
                        self.path_vanished(path, &mut out);
                    }
                }
            }

            EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime))
            | EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any)) => {
                for path in &event.paths {
                    self.file_changed(path, &mut out);
                }
            }

            _ => trace!(kind = ?event.kind, "Ignoring event kind"),
        }

        // One timestamp per raw event
        if let Some(first) = out.first() {
            let timestamp = first.timestamp;
            for file_event in &mut out {
                file_event.timestamp = timestamp;
            }
        }

        out
    }

    fn path_appeared(&mut self, path: &Path, out: &mut Vec<FileEvent>) {
        if path == self.root {
            return;
        }

        if path.is_dir() {
            self.dir_appeared(path, out);
        } else if self.files.insert(path.to_path_buf()) {
            out.push(FileEvent::new(FileEventKind::Added, path));
        } else {
            trace!(path = %path.display(), "File already known");
        }
    }

    fn dir_appeared(&mut self, path: &Path, out: &mut Vec<FileEvent>) {
        if path == self.root {
            return;
        }

        self.dirs.insert(path.to_path_buf());

        // Files may land in a new directory before the backend watches it
        if self.recursive {
            let mut found = Vec::new();
            self.scan(path, &mut found);
            found.sort();
            out.extend(
                found
                    .into_iter()
                    .map(|file| FileEvent::new(FileEventKind::Added, file)),
            );
        }
    }

    fn path_vanished(&mut self, path: &Path, out: &mut Vec<FileEvent>) {
        if self.files.remove(path) {
            out.push(FileEvent::new(FileEventKind::Removed, path));
            return;
        }

        if !self.dirs.remove(path) {
            trace!(path = %path.display(), "Unknown path vanished");
            return;
        }

        self.dirs.retain(|dir| !dir.starts_with(path));

        let gone: Vec<PathBuf> = self
            .files
            .iter()
            .filter(|file| file.starts_with(path))
            .cloned()
            .collect();
        for file in gone {
            self.files.remove(&file);
            out.push(FileEvent::new(FileEventKind::Removed, file));
        }
    }

    fn file_changed(&mut self, path: &Path, out: &mut Vec<FileEvent>) {
        if path == self.root || self.dirs.contains(path) || path.is_dir() {
            return;
        }

        self.files.insert(path.to_path_buf());
        out.push(FileEvent::new(FileEventKind::Changed, path));
    }

    /// Records the entries of `dir`, descending when recursive. Newly seen
    /// files are appended to `found`. Unreadable directories are skipped.
    fn scan(&mut self, dir: &Path, found: &mut Vec<PathBuf>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();

            if path.is_dir() {
                self.dirs.insert(path.clone());
                if self.recursive {
                    self.scan(&path, found);
                }
            } else if self.files.insert(path.clone()) {
                found.push(path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, AccessMode, DataChange, RemoveKind};
    use tempfile::TempDir;

    fn create_test_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temp dir")
    }

    fn tree_for(dir: &TempDir, recursive: bool) -> FileTree {
        let root = fs::canonicalize(dir.path()).unwrap();
        let mut tree = FileTree::new(root, recursive);
        tree.seed();
        tree
    }

    fn event(kind: EventKind, paths: &[&PathBuf]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |event, path| event.add_path((*path).clone()))
    }

    fn kinds(events: &[FileEvent]) -> Vec<(FileEventKind, PathBuf)> {
        events.iter().map(|e| (e.kind, e.path.clone())).collect()
    }

    #[test]
    fn seed_respects_recursion() {
        let temp_dir = create_test_dir();
        let root = fs::canonicalize(temp_dir.path()).unwrap();
        fs::write(root.join("top.txt"), b"a").unwrap();
        fs::create_dir_all(root.join("nested/deeper")).unwrap();
        fs::write(root.join("nested/deeper/inner.txt"), b"b").unwrap();

        let mut deep = FileTree::new(root.clone(), true);
        assert_eq!(
            deep.seed(),
            vec![root.join("nested/deeper/inner.txt"), root.join("top.txt")]
        );
        assert!(deep.contains_dir(&root.join("nested/deeper")));

        let mut shallow = FileTree::new(root.clone(), false);
        assert_eq!(shallow.seed(), vec![root.join("top.txt")]);
        assert!(shallow.contains_dir(&root.join("nested")));
    }

    #[test]
    fn seed_nonexistent_directory() {
        let mut tree = FileTree::new(PathBuf::from("/nonexistent/path"), true);
        assert!(tree.seed().is_empty());
    }

    #[test]
    fn create_and_remove_file() {
        let temp_dir = create_test_dir();
        let mut tree = tree_for(&temp_dir, true);
        let file = tree.root.join("new.txt");

        let added = tree.apply(&event(EventKind::Create(CreateKind::File), &[&file]));
        assert_eq!(kinds(&added), vec![(FileEventKind::Added, file.clone())]);
        assert!(tree.contains_file(&file));

        let removed = tree.apply(&event(EventKind::Remove(RemoveKind::File), &[&file]));
        assert_eq!(kinds(&removed), vec![(FileEventKind::Removed, file.clone())]);
        assert!(!tree.contains_file(&file));
    }

    #[test]
    fn create_of_known_file_is_not_repeated() {
        let temp_dir = create_test_dir();
        fs::write(temp_dir.path().join("seen.txt"), b"x").unwrap();
        let mut tree = tree_for(&temp_dir, true);
        let file = tree.root.join("seen.txt");

        let events = tree.apply(&event(EventKind::Create(CreateKind::File), &[&file]));
        assert!(events.is_empty());
    }

    #[test]
    fn data_and_write_time_are_changes() {
        let temp_dir = create_test_dir();
        let mut tree = tree_for(&temp_dir, true);
        let file = tree.root.join("f.txt");

        for kind in [
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            EventKind::Modify(ModifyKind::Any),
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)),
        ] {
            assert_eq!(
                kinds(&tree.apply(&event(kind, &[&file]))),
                vec![(FileEventKind::Changed, file.clone())],
                "{kind:?} should map to Changed"
            );
        }
    }

    #[test]
    fn rename_halves() {
        let temp_dir = create_test_dir();
        fs::write(temp_dir.path().join("old.txt"), b"x").unwrap();
        let mut tree = tree_for(&temp_dir, true);
        let old = tree.root.join("old.txt");
        let new = tree.root.join("new.txt");

        let from = tree.apply(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &[&old],
        ));
        let to = tree.apply(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &[&new],
        ));

        assert_eq!(kinds(&from), vec![(FileEventKind::Removed, old)]);
        assert_eq!(kinds(&to), vec![(FileEventKind::Added, new)]);
    }

    #[test]
    fn rename_both_is_not_duplicated() {
        let temp_dir = create_test_dir();
        let mut tree = tree_for(&temp_dir, true);
        let both = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &[&tree.root.join("old.txt"), &tree.root.join("new.txt")],
        );

        assert!(tree.apply(&both).is_empty());
    }

    #[test]
    fn rename_unknown_direction_checks_disk() {
        let temp_dir = create_test_dir();
        fs::write(temp_dir.path().join("missing.txt"), b"x").unwrap();
        let mut tree = tree_for(&temp_dir, true);
        let missing = tree.root.join("missing.txt");
        let present = tree.root.join("present.txt");
        fs::rename(&missing, &present).unwrap();

        let events = tree.apply(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Any)),
            &[&missing, &present],
        ));

        assert_eq!(
            kinds(&events),
            vec![
                (FileEventKind::Removed, missing),
                (FileEventKind::Added, present)
            ]
        );
    }

    #[test]
    fn moved_out_directory_reports_its_files() {
        let temp_dir = create_test_dir();
        fs::create_dir_all(temp_dir.path().join("sub/deeper")).unwrap();
        fs::write(temp_dir.path().join("sub/a.txt"), b"a").unwrap();
        fs::write(temp_dir.path().join("sub/deeper/b.txt"), b"b").unwrap();
        fs::write(temp_dir.path().join("subway.txt"), b"c").unwrap();
        let mut tree = tree_for(&temp_dir, true);
        let sub = tree.root.join("sub");

        let events = tree.apply(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &[&sub],
        ));

        assert_eq!(
            kinds(&events),
            vec![
                (FileEventKind::Removed, sub.join("a.txt")),
                (FileEventKind::Removed, sub.join("deeper/b.txt")),
            ]
        );
        assert!(!tree.contains_dir(&sub));
        assert!(!tree.contains_dir(&sub.join("deeper")));
        assert!(tree.contains_file(&tree.root.join("subway.txt")));
    }

    #[test]
    fn removed_directory_never_reported_itself() {
        let temp_dir = create_test_dir();
        fs::create_dir(temp_dir.path().join("empty")).unwrap();
        let mut tree = tree_for(&temp_dir, true);
        let empty = tree.root.join("empty");
        fs::remove_dir(&empty).unwrap();

        // Windows and kqueue do not say whether the path was a directory
        let events = tree.apply(&event(EventKind::Remove(RemoveKind::Any), &[&empty]));
        assert!(events.is_empty());
        assert!(!tree.contains_dir(&empty));
    }

    #[test]
    fn moved_in_directory_reports_its_files() {
        let temp_dir = create_test_dir();
        let mut tree = tree_for(&temp_dir, true);
        let moved = tree.root.join("moved");
        fs::create_dir_all(moved.join("deeper")).unwrap();
        fs::write(moved.join("a.txt"), b"a").unwrap();
        fs::write(moved.join("deeper/b.txt"), b"b").unwrap();

        let events = tree.apply(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &[&moved],
        ));

        assert_eq!(
            kinds(&events),
            vec![
                (FileEventKind::Added, moved.join("a.txt")),
                (FileEventKind::Added, moved.join("deeper/b.txt")),
            ]
        );
        assert!(tree.contains_dir(&moved));
    }

    #[test]
    fn non_recursive_tree_does_not_descend_into_new_directories() {
        let temp_dir = create_test_dir();
        let mut tree = tree_for(&temp_dir, false);
        let moved = tree.root.join("moved");
        fs::create_dir(&moved).unwrap();
        fs::write(moved.join("a.txt"), b"a").unwrap();

        let events = tree.apply(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &[&moved],
        ));

        assert!(events.is_empty());
        assert!(tree.contains_dir(&moved));
    }

    #[test]
    fn skips_directories_and_access() {
        let temp_dir = create_test_dir();
        let mut tree = tree_for(&temp_dir, true);
        let sub = tree.root.join("sub");
        fs::create_dir(&sub).unwrap();
        let file = tree.root.join("f.txt");

        let folder = event(EventKind::Create(CreateKind::Folder), &[&sub]);
        assert!(tree.apply(&folder).is_empty());

        // Create(Any) and a data change on a directory
        let root = tree.root.clone();
        assert!(tree
            .apply(&event(EventKind::Create(CreateKind::Any), &[&root]))
            .is_empty());
        assert!(tree
            .apply(&event(EventKind::Modify(ModifyKind::Any), &[&sub]))
            .is_empty());

        let access = event(
            EventKind::Access(AccessKind::Close(AccessMode::Write)),
            &[&file],
        );
        assert!(tree.apply(&access).is_empty());

        let chmod = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            &[&file],
        );
        assert!(tree.apply(&chmod).is_empty());
    }

    #[test]
    fn shares_one_timestamp() {
        let temp_dir = create_test_dir();
        fs::write(temp_dir.path().join("a"), b"").unwrap();
        fs::write(temp_dir.path().join("b"), b"").unwrap();
        let mut tree = tree_for(&temp_dir, true);

        let events = tree.apply(&event(
            EventKind::Remove(RemoveKind::Any),
            &[&tree.root.join("a"), &tree.root.join("b")],
        ));

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp, events[1].timestamp);
    }
}
