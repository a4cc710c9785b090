//! Atomic file replacement.
//!
//! Every file the CLI rewrites (pulled env files, key files, the cache) goes
//! through [`write_atomic`]: the bytes land in a temporary file in the target's
//! directory, which is then renamed over the target. An interrupted write
//! leaves the previous contents in place.

use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

pub const FILE_MODE: u32 = 0o644;
/// Files holding key material or credentials
pub const PRIVATE_MODE: u32 = 0o600;

pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
