use std::io::{self, Write};
use std::path::Path;

/// Replace `path` with `data` so readers see either the old or the new
/// contents, never a partial file.
///
/// The data goes to a temporary file in the same directory, which is then
/// renamed over `path`.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) => dir,
        None => return Err(io::ErrorKind::InvalidInput.into()),
    };
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_data()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_contents_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dirstate");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent").join("dirstate");
        assert!(atomic_write(&path, b"x").is_err());
        assert!(!path.exists());
    }
}
