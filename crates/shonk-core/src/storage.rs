use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use crate::{errors::Error, Result};

/// A stored file and its size in bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
}

impl FileEntry {
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }
}

/// Directory of previously saved items.
///
/// Blocking; async callers should go through `spawn_blocking`.
pub trait FileStore: Send + Sync {
    fn root(&self) -> &Path;

    /// Every regular file under the store, with sizes.
    fn list(&self) -> Result<Vec<FileEntry>>;

    fn count(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    /// Save `bytes` under `file_name` (a bare file name) and return the path.
    fn save(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf>;
}

/// A (possibly nested) directory on local disk.
#[derive(Clone, Debug)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn walk(&self, on_file: &mut dyn FnMut(PathBuf, u64)) -> Result<()> {
        if !self.root.exists() {
            return Ok(());
        }

        let mut dirs = vec![self.root.clone()];
        while let Some(dir) = dirs.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                // Symlinks are skipped: only content actually stored here counts.
                let md = fs::symlink_metadata(entry.path())?;
                if md.is_dir() {
                    dirs.push(entry.path());
                } else if md.is_file() {
                    on_file(entry.path(), md.len());
                }
            }
        }
        Ok(())
    }
}

impl FileStore for DirStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn list(&self) -> Result<Vec<FileEntry>> {
        let mut out = Vec::new();
        self.walk(&mut |path, size| out.push(FileEntry { path, size }))?;
        Ok(out)
    }

    fn count(&self) -> Result<usize> {
        let mut n = 0usize;
        self.walk(&mut |_, _| n += 1)?;
        Ok(n)
    }

    fn save(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let name = sanitize_file_name(file_name)?;
        fs::create_dir_all(&self.root)?;
        let path = self.root.join(name);
        fs::write(&path, bytes)?;
        Ok(path)
    }
}

/// Accept exactly one normal path component.
pub fn sanitize_file_name(raw: &str) -> Result<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::Security("empty file name".to_string()));
    }
    if trimmed.contains(['/', '\\']) {
        return Err(Error::Security(format!(
            "file name contains a path separator: {raw}"
        )));
    }

    let mut comps = Path::new(trimmed).components();
    match (comps.next(), comps.next()) {
        (Some(Component::Normal(_)), None) => Ok(trimmed),
        _ => Err(Error::Security(format!("invalid file name: {raw}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_nested_files_with_sizes() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("top.png"), b"12345").unwrap();
        fs::write(dir.path().join("a/b/deep.jpg"), b"12").unwrap();

        let store = DirStore::new(dir.path());
        let mut files = store.list().unwrap();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        assert_eq!(
            files,
            vec![
                FileEntry::new(dir.path().join("a/b/deep.jpg"), 2),
                FileEntry::new(dir.path().join("top.png"), 5),
            ]
        );
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::new(dir.path().join("nope"));
        assert!(store.list().unwrap().is_empty());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn save_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::new(dir.path().join("storage"));

        for bad in ["../evil.png", "/etc/passwd", "..", ".", "", "a\\b.png"] {
            let err = store.save(bad, b"x").unwrap_err();
            assert!(matches!(err, Error::Security(_)), "{bad:?}");
        }

        let saved = store.save("ok.png", b"xyz").unwrap();
        assert_eq!(saved, dir.path().join("storage/ok.png"));
        assert_eq!(fs::read(saved).unwrap(), b"xyz");
    }
}
