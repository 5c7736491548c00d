use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::{debug, warn};

use crate::registry::{LanguageProfile, SCRIPT_BASENAME};

/// Submitted script written to a uniquely named file on the host.
///
/// The file lives exactly as long as this value: `remove` deletes it
/// explicitly, and dropping it (including during unwinding) deletes it too.
#[derive(Debug)]
pub struct StagedScript {
    path: TempPath,
}

impl StagedScript {
    /// Write `content` verbatim to a fresh file in `dir` whose suffix matches
    /// the language.
    pub fn stage(dir: &Path, content: &str, profile: &LanguageProfile) -> std::io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix(&format!("{}_", SCRIPT_BASENAME))
            .suffix(profile.extension)
            .tempfile_in(dir)?;

        file.write_all(content.as_bytes())?;
        file.flush()?;

        // The container user is unknown here; the bind is read-only anyway.
        #[cfg(unix)]
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644))?;

        let path = file.into_temp_path();
        debug!(path = %path.display(), "staged script");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bind specification mounting the script read-only at `target`.
    pub fn bind(&self, target: &str) -> String {
        format!("{}:{}:ro", self.path.display(), target)
    }

    pub fn remove(self) -> std::io::Result<()> {
        let path: PathBuf = self.path.to_path_buf();
        self.path.close().map_err(|err| {
            warn!(path = %path.display(), error = %err, "failed to remove staged script");
            err
        })
    }
}
