//! Common test fixtures for render load tests.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Minimal binary glTF header used as model file content.
pub const GLB_MAGIC: &[u8] = b"glTF\x02\x00\x00\x00";

/// Model file names used across tests.
pub mod models {
    pub const SHIRT: &str = "1_p1_t-shirt.glb";
    pub const DUVET: &str = "1_p1_duvet-cover_1350x2000.glb";
    pub const MUG: &str = "mug.glb";
}

/// A temporary directory populated with model (and other) files.
///
/// The directory is removed when the fixture is dropped.
pub struct ModelDir {
    dir: TempDir,
}

impl ModelDir {
    /// Create an empty directory.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    /// Create a directory containing the given files, each with [`GLB_MAGIC`] content.
    pub fn with_files(names: &[&str]) -> std::io::Result<Self> {
        let fixture = Self::new()?;
        for name in names {
            fixture.add_file(name, GLB_MAGIC)?;
        }
        Ok(fixture)
    }

    /// Write a file into the directory.
    pub fn add_file(&self, name: &str, contents: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Create a subdirectory (which a non-recursive scan must ignore).
    pub fn add_dir(&self, name: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a file inside the directory.
    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}
