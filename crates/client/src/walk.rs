//! Local directory traversal for folder uploads.

use crate::checksum::checksum;
use crate::error::{ErrorKind, Result};
use crate::models::LocalFile;
use async_stream::stream;
use exn::ResultExt;
use futures::{Stream, TryStreamExt};
use std::path::{Path, PathBuf};
use tokio::fs;

enum WalkEntry {
    File(LocalFile),
    Descend(Vec<PathBuf>),
    Skip,
}

/// Walk `root` and collect every regular file beneath it.
///
/// Fails on the first unreadable directory or file; a partially indexed
/// tree is never returned.
pub async fn walk(root: impl AsRef<Path>) -> Result<Vec<LocalFile>> {
    walk_stream(root).try_collect().await
}

/// Stream every regular file beneath `root`, depth-first.
///
/// Entries of a directory are visited in lexical order of their names, and a
/// subdirectory is descended into at its lexical position, so an unmodified
/// tree always yields the same sequence. Each file is hashed before it is
/// yielded. Symlinks to files are followed, symlinks to directories are
/// skipped and never descended into, and a dangling symlink is an
/// [`Io`](crate::error::ErrorKind::Io) error like any other unreadable file.
/// The stream ends after the first error.
///
/// # Examples
///
/// ```no_run
/// use futures::TryStreamExt;
/// # use filer_client::error::Result;
/// # async fn example() -> Result<()> {
/// let mut files = filer_client::walk_stream("/srv/export");
/// while let Some(file) = files.try_next().await? {
///     println!("{} {}", file.checksum, file.path.display());
/// }
/// # Ok(())
/// # }
/// ```
pub fn walk_stream(root: impl AsRef<Path>) -> impl Stream<Item = Result<LocalFile>> + Send + 'static {
    let root = root.as_ref().to_path_buf();
    Box::pin(stream! {
        let root = match std::path::absolute(&root).or_raise(|| ErrorKind::Io(root.clone())) {
            Ok(root) => root,
            Err(e) => {
                yield Err(e);
                return;
            },
        };
        let mut stack = vec![root.clone()];
        while let Some(current) = stack.pop() {
            match process_entry(&current, current == root).await {
                Ok(WalkEntry::File(file)) => yield Ok(file),
                Ok(WalkEntry::Descend(mut children)) => {
                    // Popped from the back, so push in reverse lexical order.
                    children.reverse();
                    stack.extend(children);
                },
                Ok(WalkEntry::Skip) => {},
                Err(e) => {
                    yield Err(e);
                    break;
                },
            }
        }
    })
}

async fn process_entry(path: &Path, is_root: bool) -> Result<WalkEntry> {
    let link_metadata = fs::symlink_metadata(path).await.or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    if link_metadata.is_dir() {
        return Ok(WalkEntry::Descend(read_sorted(path).await?));
    }
    let is_file = match link_metadata.is_symlink() {
        // Links to directories are dropped unless the caller named the link
        // as the root.
        true => {
            let target = fs::metadata(path).await.or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
            if target.is_dir() && is_root {
                return Ok(WalkEntry::Descend(read_sorted(path).await?));
            }
            target.is_file()
        },
        false => link_metadata.is_file(),
    };
    if !is_file {
        return Ok(WalkEntry::Skip);
    }
    let bytes = fs::read(path).await.or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    Ok(WalkEntry::File(LocalFile {
        name,
        path: path.to_path_buf(),
        checksum: checksum(&bytes),
    }))
}

async fn read_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await.or_raise(|| ErrorKind::Io(dir.to_path_buf()))?;
    let mut children = Vec::new();
    while let Some(entry) = entries.next_entry().await.or_raise(|| ErrorKind::Io(dir.to_path_buf()))? {
        children.push(entry.path());
    }
    children.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, relative: &str, contents: &[u8]) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn relative_paths(root: &Path, files: &[LocalFile]) -> Vec<String> {
        let root = std::path::absolute(root).unwrap();
        files
            .iter()
            .map(|f| f.path.strip_prefix(&root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[tokio::test]
    async fn test_walk_lexical_depth_first() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "b.txt", b"b");
        write(temp_dir.path(), "a.txt", b"a");
        write(temp_dir.path(), "sub/deeper/d.txt", b"d");
        write(temp_dir.path(), "sub/c.txt", b"c");
        write(temp_dir.path(), "z.txt", b"z");
        let files = walk(temp_dir.path()).await.unwrap();
        assert_eq!(
            relative_paths(temp_dir.path(), &files),
            vec!["a.txt", "b.txt", "sub/c.txt", "sub/deeper/d.txt", "z.txt"]
        );
    }

    #[tokio::test]
    async fn test_walk_descriptors() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "docs/report.pdf", b"%PDF-1.7");
        let files = walk(temp_dir.path()).await.unwrap();
        assert_eq!(files.len(), 1);
        let file = &files[0];
        assert_eq!(file.name, "report.pdf");
        assert!(file.path.is_absolute());
        assert_eq!(file.checksum, checksum(b"%PDF-1.7"));
    }

    #[tokio::test]
    async fn test_walk_skips_directories_only() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("empty/nested")).unwrap();
        write(temp_dir.path(), "empty.txt", b"");
        let files = walk(temp_dir.path()).await.unwrap();
        assert_eq!(relative_paths(temp_dir.path(), &files), vec!["empty.txt"]);
        assert_eq!(files[0].checksum, checksum(b""));
    }

    #[tokio::test]
    async fn test_walk_empty_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(walk(temp_dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_walk_is_stable() {
        let temp_dir = tempfile::tempdir().unwrap();
        for name in ["q.txt", "c/x.txt", "m.txt", "c/a.txt", "A.txt"] {
            write(temp_dir.path(), name, name.as_bytes());
        }
        let first = walk(temp_dir.path()).await.unwrap();
        let second = walk(temp_dir.path()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_walk_single_file_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "only.txt", b"only");
        let files = walk(temp_dir.path().join("only.txt")).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "only.txt");
    }

    #[tokio::test]
    async fn test_walk_missing_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("missing");
        let err = walk(&missing).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Io(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_walk_symlinks() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "real/file.txt", b"data");
        std::os::unix::fs::symlink(temp_dir.path().join("real/file.txt"), temp_dir.path().join("link.txt")).unwrap();
        std::os::unix::fs::symlink(temp_dir.path().join("real"), temp_dir.path().join("loop")).unwrap();
        let files = walk(temp_dir.path()).await.unwrap();
        assert_eq!(relative_paths(temp_dir.path(), &files), vec!["link.txt", "real/file.txt"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_walk_dangling_symlink_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "a.txt", b"a");
        let dangling = temp_dir.path().join("b.txt");
        std::os::unix::fs::symlink(temp_dir.path().join("nowhere"), &dangling).unwrap();
        let err = walk(temp_dir.path()).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Io(dangling.clone()));

        let mut files = walk_stream(temp_dir.path().to_path_buf());
        assert_eq!(files.try_next().await.unwrap().unwrap().name, "a.txt");
        assert!(files.try_next().await.is_err());
        assert!(files.try_next().await.unwrap().is_none());
    }
}
