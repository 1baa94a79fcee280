//! Utility functions for directory management and system file writes
//!
//! Follows the XDG Base Directory specification for runtime state (audit
//! log) and provides the staged-write helper used for every file this tool
//! places under `/etc`.

use crate::core::error::{Error, Result};
use directories::ProjectDirs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn get_state_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "pfwd", "pfwd")
        .and_then(|pd| pd.state_dir().map(Path::to_path_buf))
}

pub fn ensure_dirs() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        let mut builder = DirBuilder::new();
        builder.mode(0o700); // User read/write/execute only
        builder.recursive(true);

        if let Some(dir) = get_state_dir() {
            builder.create(dir)?;
        }
    }

    #[cfg(not(unix))]
    {
        if let Some(dir) = get_state_dir() {
            std::fs::create_dir_all(dir)?;
        }
    }

    Ok(())
}

/// Writes `content` to a system path by staging it in a temp file and
/// installing it with the given octal mode through the elevation layer.
///
/// The stage-then-install pattern keeps the process unprivileged for the
/// write itself and replaces the destination in a single step.
pub fn install_file(content: &str, dest: &Path, mode: &str) -> Result<()> {
    let mut staged = tempfile::NamedTempFile::new()?;
    staged.write_all(content.as_bytes())?;
    staged.flush()?;

    let staged_path = staged
        .path()
        .to_str()
        .ok_or_else(|| Error::Internal("staged path is not valid UTF-8".to_string()))?;
    let dest_str = dest
        .to_str()
        .ok_or_else(|| Error::Internal("destination path is not valid UTF-8".to_string()))?;

    run_install(&["-m", mode, staged_path, dest_str])
}

/// Copies an existing system file to another system path via elevated
/// `install`, preserving nothing but the content (mode is reset).
pub fn install_copy(src: &Path, dest: &Path, mode: &str) -> Result<()> {
    let src_str = src
        .to_str()
        .ok_or_else(|| Error::Internal("source path is not valid UTF-8".to_string()))?;
    let dest_str = dest
        .to_str()
        .ok_or_else(|| Error::Internal("destination path is not valid UTF-8".to_string()))?;

    run_install(&["-m", mode, src_str, dest_str])
}

fn run_install(args: &[&str]) -> Result<()> {
    let output = crate::elevation::install_command(args)
        .map_err(|e| Error::Elevation(e.to_string()))?
        .output()?;

    if output.status.success() {
        Ok(())
    } else {
        Err(Error::Io(std::io::Error::other(format!(
            "install failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::setup_test_env;

    #[test]
    fn test_install_file_writes_content() {
        setup_test_env();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("target.conf");

        install_file("key = value\n", &dest, "644").unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "key = value\n");
    }

    #[test]
    fn test_install_file_overwrites() {
        setup_test_env();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("target.conf");

        install_file("first\n", &dest, "644").unwrap();
        install_file("second\n", &dest, "644").unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "second\n");
    }

    #[test]
    fn test_install_copy() {
        setup_test_env();

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.conf");
        let dest = dir.path().join("dest.conf");
        std::fs::write(&src, "payload\n").unwrap();

        install_copy(&src, &dest, "600").unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "payload\n");
    }
}
