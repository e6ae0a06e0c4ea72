//! ROM image discovery.
//!
//! The engine needs a control ROM and a PCM ROM. Each is looked up in the
//! configured directory under its CM-32L name first and its MT-32 name second.

use super::Mt32Error;
use std::fmt;
use std::fs;
use std::path::PathBuf;

/// Longest accepted `mt32.romdir`; longer values fall back to the current dir.
pub const MAX_ROMDIR_LEN: usize = 4080;

/// Directory used when none (or an unusable one) is configured.
pub const CURRENT_DIR: &str = "./";

/// The two firmware images an engine needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RomRole {
    Control,
    Pcm,
}

impl RomRole {
    /// Candidate file names, preferred first.
    pub fn file_names(self) -> [&'static str; 2] {
        match self {
            RomRole::Control => ["CM32L_CONTROL.ROM", "MT32_CONTROL.ROM"],
            RomRole::Pcm => ["CM32L_PCM.ROM", "MT32_PCM.ROM"],
        }
    }
}

impl fmt::Display for RomRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RomRole::Control => f.write_str("Control"),
            RomRole::Pcm => f.write_str("PCM"),
        }
    }
}

/// A ROM image read from disk.
#[derive(Clone, PartialEq, Eq)]
pub struct RomImage {
    pub role: RomRole,
    /// Path the image was read from.
    pub path: PathBuf,
    pub data: Vec<u8>,
}

impl fmt::Debug for RomImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RomImage")
            .field("role", &self.role)
            .field("path", &self.path)
            .field("len", &self.data.len())
            .finish()
    }
}

/// The resolved ROM directory.
///
/// Paths are built by plain string concatenation so that whatever separator
/// style the user configured is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomDir {
    dir: String,
    add_separator: bool,
}

impl RomDir {
    /// Resolves the configured directory.
    ///
    /// Empty or over-long values fall back to [`CURRENT_DIR`]. A `/` is
    /// appended when building paths unless the directory already ends in
    /// `/` or `\`.
    pub fn new(configured: &str) -> Self {
        if configured.is_empty() {
            return Self::current();
        }
        if configured.len() > MAX_ROMDIR_LEN {
            tracing::warn!("MT32: mt32.romdir is too long, using the current dir.");
            return Self::current();
        }
        let add_separator = !configured.ends_with(['/', '\\']);
        Self {
            dir: configured.to_string(),
            add_separator,
        }
    }

    fn current() -> Self {
        Self {
            dir: CURRENT_DIR.to_string(),
            add_separator: false,
        }
    }

    /// The directory as resolved.
    pub fn as_str(&self) -> &str {
        &self.dir
    }

    /// Full path of `file_name` inside this directory.
    pub fn path_for(&self, file_name: &str) -> String {
        let mut path = String::with_capacity(self.dir.len() + 1 + file_name.len());
        path.push_str(&self.dir);
        if self.add_separator {
            path.push('/');
        }
        path.push_str(file_name);
        path
    }

    /// Reads the image for `role`, trying each candidate name in order.
    ///
    /// # Errors
    ///
    /// Returns [`Mt32Error::RomNotFound`] if no candidate can be read.
    pub fn load(&self, role: RomRole) -> Result<RomImage, Mt32Error> {
        for name in role.file_names() {
            let path = self.path_for(name);
            match fs::read(&path) {
                Ok(data) => {
                    tracing::debug!("MT32: Using {} ROM {}", role, path);
                    return Ok(RomImage {
                        role,
                        path: PathBuf::from(path),
                        data,
                    });
                }
                Err(e) => tracing::debug!("MT32: Cannot read {}: {}", path, e),
            }
        }

        tracing::error!("MT32: {} ROM file not found", role);
        Err(Mt32Error::RomNotFound {
            role,
            dir: self.dir.clone(),
        })
    }
}
