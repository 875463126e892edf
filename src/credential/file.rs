//! File-backed credentials

use std::io::Write;
use std::path::Path;

use super::CredentialError;
use super::path::expand_path;

/// Read a secret file, dropping trailing line endings.
pub(crate) fn read(raw_path: &str) -> Result<String, CredentialError> {
    let path = expand_path(raw_path);
    tracing::debug!(path = %path.display(), "Reading credential file");

    let content = match std::fs::read(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CredentialError::NotFound(format!("file {}", path.display())));
        }
        Err(e) => return Err(CredentialError::io(&path, e)),
    };

    let content = String::from_utf8(content).map_err(|_| {
        CredentialError::Invalid(format!("file {} is not valid UTF-8", path.display()))
    })?;

    Ok(content.trim_end_matches(['\r', '\n']).to_string())
}

/// Write a secret file with owner-only permissions.
///
/// The value goes to a temporary file in the target directory which is then
/// renamed over the target, so readers see either the old or the new value.
pub(crate) fn write(raw_path: &str, value: &str) -> Result<(), CredentialError> {
    let path = expand_path(raw_path);
    tracing::debug!(path = %path.display(), "Writing credential file");

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    std::fs::create_dir_all(&dir).map_err(|e| CredentialError::io(&dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| CredentialError::io(&dir, e))?;
    tmp.write_all(value.as_bytes())
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| CredentialError::io(tmp.path(), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(tmp.path(), perms)
            .map_err(|e| CredentialError::io(tmp.path(), e))?;
    }

    tmp.persist(&path)
        .map_err(|e| CredentialError::io(&path, e.error))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("absent");

        let result = read(path.to_str().unwrap());
        assert!(matches!(result, Err(CredentialError::NotFound(_))));
    }

    #[test]
    fn test_directory_is_io_error() {
        let temp_dir = TempDir::new().unwrap();

        let result = read(temp_dir.path().to_str().unwrap());
        assert!(matches!(result, Err(CredentialError::Io { .. })));
    }

    #[test]
    fn test_write_creates_parents_and_trims_on_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/dir/token");
        let path = path.to_str().unwrap();

        write(path, "secret\n").unwrap();
        assert_eq!(read(path).unwrap(), "secret");

        write(path, "rotated").unwrap();
        assert_eq!(read(path).unwrap(), "rotated");
    }

    #[cfg(unix)]
    #[test]
    fn test_write_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("token");

        write(path.to_str().unwrap(), "secret").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
