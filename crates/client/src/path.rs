//! Remote path normalization.
//!
//! Remote paths are always `/`-separated and absolute, independent of the
//! local platform. A trailing slash is meaningful to the Filer (it addresses
//! a directory, and uploads into it keep the uploaded file's own name), so it
//! is preserved.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path};

/// Normalizes a remote path.
///
/// Empty and `.` segments are dropped, `..` pops the previous segment, and a
/// `..` that would leave the root is rejected with
/// [`InvalidPath`](crate::error::ErrorKind::InvalidPath), as are null bytes.
///
/// # Examples
///
/// ```
/// use filer_client::normalize_remote;
/// assert_eq!(normalize_remote("a//b/./c").unwrap(), "/a/b/c");
/// assert_eq!(normalize_remote("/photos/2024/").unwrap(), "/photos/2024/");
/// assert_eq!(normalize_remote("/a/../b").unwrap(), "/b");
/// assert_eq!(normalize_remote("").unwrap(), "/");
/// assert!(normalize_remote("/../etc/passwd").is_err());
/// ```
pub fn normalize(path: &str) -> Result<String> {
    if path.contains('\0') {
        exn::bail!(ErrorKind::InvalidPath(path.to_string()));
    }
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {},
            ".." => {
                if segments.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.to_string()));
                }
            },
            normal => segments.push(normal),
        }
    }
    let mut normalized = format!("/{}", segments.join("/"));
    if path.ends_with('/') && !segments.is_empty() {
        normalized.push('/');
    }
    Ok(normalized)
}

/// Places a local relative path underneath a remote prefix.
///
/// Local components are joined with `/` whatever the platform separator is.
/// The relative path must stay within its root: `..`, absolute and
/// prefix components are rejected.
pub fn join(prefix: &str, relative: &Path) -> Result<String> {
    let mut remote = normalize(prefix)?;
    if !remote.ends_with('/') {
        remote.push('/');
    }
    let mut first = true;
    for component in relative.components() {
        match component {
            Component::Normal(segment) => {
                let Some(segment) = segment.to_str() else {
                    exn::bail!(ErrorKind::InvalidPath(relative.display().to_string()));
                };
                if !first {
                    remote.push('/');
                }
                remote.push_str(segment);
                first = false;
            },
            Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                exn::bail!(ErrorKind::InvalidPath(relative.display().to_string()))
            },
        }
    }
    if first {
        exn::bail!(ErrorKind::InvalidPath(relative.display().to_string()));
    }
    Ok(remote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/a/b/c.txt", "/a/b/c.txt")]
    #[case("a/b/c.txt", "/a/b/c.txt")]
    #[case("/a//b//c", "/a/b/c")]
    #[case("/a/./b/./c", "/a/b/c")]
    #[case("/a/b/..", "/a")]
    #[case("/dir/", "/dir/")]
    #[case("/dir///", "/dir/")]
    #[case("/", "/")]
    #[case("", "/")]
    fn test_normalize(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize(input).unwrap(), expected);
    }

    #[rstest]
    #[case("..")]
    #[case("/../etc/passwd")]
    #[case("/a/../../b")]
    #[case("/a\0b")]
    fn test_normalize_rejects(#[case] input: &str) {
        let err = normalize(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[rstest]
    #[case("/backup", "a.txt", "/backup/a.txt")]
    #[case("/backup/", "sub/deeper/a.txt", "/backup/sub/deeper/a.txt")]
    #[case("", "a.txt", "/a.txt")]
    #[case("/", "./a.txt", "/a.txt")]
    fn test_join(#[case] prefix: &str, #[case] relative: &str, #[case] expected: &str) {
        assert_eq!(join(prefix, Path::new(relative)).unwrap(), expected);
    }

    #[test]
    fn test_join_rejects_escapes() {
        assert!(join("/backup", Path::new("../a.txt")).is_err());
        assert!(join("/backup", Path::new("/etc/passwd")).is_err());
        assert!(join("/backup", Path::new("")).is_err());
    }
}
