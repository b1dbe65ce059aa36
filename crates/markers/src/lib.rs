//! Durable markers stored as flat text files in the node's data directory.
//!
//! Markers are how one run of the emulated node leaves evidence for the next one: a completed or
//! corrupted snapshot download, a corrupted database that has to be replayed as an exit code, or
//! the fact that the work phase has been reached. Nothing is cached in memory, every query goes to
//! the filesystem so that a marker written by a previous process is always observed.

use std::{
    fmt::Display,
    fs::{File, read_to_string, remove_file, rename},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};

/// The kinds of markers the store knows about. Every kind maps onto exactly one file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MarkerKind {
    /// The snapshot download finished successfully.
    SnapshotPresent,
    /// The snapshot download finished but left unusable data behind.
    SnapshotCorrupted,
    /// A previous run corrupted the local storage.
    DbCorrupted,
    /// The work simulation phase was reached.
    Working,
}

impl MarkerKind {
    pub const ALL: [MarkerKind; 4] = [
        Self::SnapshotPresent,
        Self::SnapshotCorrupted,
        Self::DbCorrupted,
        Self::Working,
    ];

    /// The name of the file backing this marker kind inside the data directory.
    pub const fn file_name(&self) -> &'static str {
        match self {
            Self::SnapshotPresent => "snapshot.txt",
            Self::SnapshotCorrupted => "corrupted_snapshot.txt",
            Self::DbCorrupted => "corrupted_db.txt",
            Self::Working => "working.txt",
        }
    }
}

impl Display for MarkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_name())
    }
}

/// A marker together with its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Marker {
    SnapshotPresent,
    SnapshotCorrupted,
    /// Carries the exit code that the next startup attempt has to replay.
    DbCorrupted { exit_code: i32 },
    Working,
}

impl Marker {
    const SNAPSHOT_PAYLOAD: &str = "I'm a snapshot";
    const CORRUPTED_SNAPSHOT_PAYLOAD: &str = "I'm a corrupted snapshot";
    const WORKING_PAYLOAD: &str = "working ok";

    pub const fn kind(&self) -> MarkerKind {
        match self {
            Self::SnapshotPresent => MarkerKind::SnapshotPresent,
            Self::SnapshotCorrupted => MarkerKind::SnapshotCorrupted,
            Self::DbCorrupted { .. } => MarkerKind::DbCorrupted,
            Self::Working => MarkerKind::Working,
        }
    }

    /// The textual content written into the marker file.
    pub fn payload(&self) -> String {
        match self {
            Self::SnapshotPresent => Self::SNAPSHOT_PAYLOAD.to_string(),
            Self::SnapshotCorrupted => Self::CORRUPTED_SNAPSHOT_PAYLOAD.to_string(),
            Self::DbCorrupted { exit_code } => exit_code.to_string(),
            Self::Working => Self::WORKING_PAYLOAD.to_string(),
        }
    }

    /// Reconstructs a marker of the given kind from the content of its file.
    ///
    /// Only [`MarkerKind::DbCorrupted`] carries information; the payload of the other kinds is
    /// informational and the presence of the file is all that matters.
    pub fn parse(kind: MarkerKind, content: &str) -> Result<Self> {
        Ok(match kind {
            MarkerKind::SnapshotPresent => Self::SnapshotPresent,
            MarkerKind::SnapshotCorrupted => Self::SnapshotCorrupted,
            MarkerKind::Working => Self::Working,
            MarkerKind::DbCorrupted => {
                let line = content.lines().next().unwrap_or_default().trim();
                let exit_code = line.parse().with_context(|| {
                    format!("Corrupted database marker holds a non-numeric exit code: {line:?}")
                })?;
                Self::DbCorrupted { exit_code }
            }
        })
    }
}

/// File-backed store for the markers of a single data directory.
#[derive(Clone, Debug)]
pub struct MarkerStore {
    data_directory: PathBuf,
}

impl MarkerStore {
    pub fn new(data_directory: impl Into<PathBuf>) -> Self {
        Self {
            data_directory: data_directory.into(),
        }
    }

    pub fn data_directory(&self) -> &Path {
        &self.data_directory
    }

    pub fn path(&self, kind: MarkerKind) -> PathBuf {
        self.data_directory.join(kind.file_name())
    }

    pub fn exists(&self, kind: MarkerKind) -> bool {
        self.path(kind).is_file()
    }

    /// Reads the marker of the given kind, returning [`None`] if no such marker exists.
    pub fn read(&self, kind: MarkerKind) -> Result<Option<Marker>> {
        let path = self.path(kind);
        let content = match read_to_string(&path) {
            Ok(content) => content,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("Failed to read marker {}", path.display()));
            }
        };
        Marker::parse(kind, &content)
            .with_context(|| format!("Failed to parse marker {}", path.display()))
            .map(Some)
    }

    /// Persists the marker.
    ///
    /// The payload is staged in a sibling file which is synced and then renamed over the target,
    /// so a crash leaves either the previous or the complete new content behind.
    pub fn write(&self, marker: &Marker) -> Result<()> {
        let kind = marker.kind();
        let path = self.path(kind);
        if !self.data_directory.is_dir() {
            bail!(
                "Cannot write marker {kind}: {} is not a directory",
                self.data_directory.display()
            );
        }

        let staging_path = self.data_directory.join(format!(".{}.tmp", kind.file_name()));
        let mut file = File::create(&staging_path)
            .with_context(|| format!("Failed to create {}", staging_path.display()))?;
        file.write_all(marker.payload().as_bytes())
            .with_context(|| format!("Failed to write {}", staging_path.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync {}", staging_path.display()))?;
        drop(file);

        rename(&staging_path, &path).with_context(|| {
            format!(
                "Failed to move {} into place at {}",
                staging_path.display(),
                path.display()
            )
        })?;
        tracing::debug!(marker = %kind, path = %path.display(), "Marker written");
        Ok(())
    }

    /// Removes the marker. Removing an absent marker is not an error.
    pub fn delete(&self, kind: MarkerKind) -> Result<()> {
        let path = self.path(kind);
        match remove_file(&path) {
            Ok(()) => {
                tracing::debug!(marker = %kind, path = %path.display(), "Marker deleted");
                Ok(())
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => {
                Err(error).with_context(|| format!("Failed to delete marker {}", path.display()))
            }
        }
    }
}
