//! Repository path helpers.
//!
//! Paths are byte strings relative to the repository root, using `/` as the
//! separator. They are not required to be valid UTF-8.

/// Iterate over the proper ancestor directories of `path`, innermost first.
///
/// The repository root (the empty path) is not yielded.
///
/// ```
/// use sds_types::find_dirs;
///
/// let dirs: Vec<&[u8]> = find_dirs(b"a/b/c.txt").collect();
/// assert_eq!(dirs, vec![&b"a/b"[..], &b"a"[..]]);
/// ```
pub fn find_dirs(path: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = path;
    std::iter::from_fn(move || {
        let pos = rest.iter().rposition(|&b| b == b'/')?;
        rest = &rest[..pos];
        Some(rest)
    })
}

/// Normalize a path for lookups on case-insensitive filesystems.
pub fn normcase(path: &[u8]) -> Vec<u8> {
    path.to_ascii_lowercase()
}
