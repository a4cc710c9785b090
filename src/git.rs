//! `.gitignore` upkeep for files that must never be committed.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(feature = "git")]
use git2::Repository;

const GITIGNORE: &str = ".gitignore";

pub struct GitRepo {
    workdir: PathBuf,
}

impl GitRepo {
    /// Find the working tree containing `path`, if any
    #[cfg(feature = "git")]
    pub fn discover(path: impl AsRef<Path>) -> Option<Self> {
        let repo = Repository::discover(path).ok()?;
        let workdir = repo.workdir()?.to_path_buf();
        Some(Self { workdir })
    }

    #[cfg(not(feature = "git"))]
    pub fn discover(_path: impl AsRef<Path>) -> Option<Self> {
        None
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Append `pattern` to the root `.gitignore` unless already listed.
    ///
    /// Returns whether the file was changed.
    pub fn ensure_ignored(&self, pattern: &str) -> io::Result<bool> {
        let path = self.workdir.join(GITIGNORE);
        let existing = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };

        if existing.lines().any(|line| line.trim() == pattern) {
            return Ok(false);
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if !existing.is_empty() && !existing.ends_with('\n') {
            writeln!(file)?;
        }
        writeln!(file, "{pattern}")?;
        Ok(true)
    }
}
