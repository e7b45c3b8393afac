//! Node storage area: servable files plus temporary block artifacts.
//!
//! Layout under the root:
//!   files/<name>            fully present, servable files
//!   blocks/<name>/<index>   block artifacts of an in-flight download
//!   blocks/<name>.partial   artifact being reassembled, pre-verification
//!
//! A file only moves into files/ after reassembly and verification, so the
//! servable set never contains a half-built artifact.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const FILES_DIR: &str = "files";
const BLOCKS_DIR: &str = "blocks";

/// Per-node storage directory.
#[derive(Debug, Clone)]
pub struct StorageArea {
    root: PathBuf,
}

impl StorageArea {
    /// Open the storage root, creating the layout if needed.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(FILES_DIR))?;
        fs::create_dir_all(root.join(BLOCKS_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of servable files, sorted.
    pub fn list_files(&self) -> io::Result<Vec<String>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(self.root.join(FILES_DIR))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Ok(name) = entry.file_name().into_string() {
                    out.push(name);
                }
            }
        }
        out.sort();
        Ok(out)
    }

    pub fn contains(&self, name: &str) -> bool {
        validate_name(name).is_ok() && self.root.join(FILES_DIR).join(name).is_file()
    }

    /// Open a servable file for reading.
    pub fn open_file(&self, name: &str) -> io::Result<fs::File> {
        validate_name(name)?;
        fs::File::open(self.root.join(FILES_DIR).join(name))
    }

    /// Place a file directly into the servable set (seeding, tests).
    pub fn write_file(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
        validate_name(name)?;
        fs::write(self.root.join(FILES_DIR).join(name), bytes)
    }

    /// Persist one received block payload.
    pub fn write_block(&self, file_name: &str, index: u64, payload: &[u8]) -> io::Result<()> {
        validate_name(file_name)?;
        let dir = self.root.join(BLOCKS_DIR).join(file_name);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(index.to_string()), payload)
    }

    /// Concatenate blocks `0..total_blocks` in index order into the partial
    /// artifact. `total_blocks = 0` produces an empty artifact. Returns the
    /// partial path for verification.
    pub fn reassemble(&self, file_name: &str, total_blocks: u64) -> io::Result<PathBuf> {
        validate_name(file_name)?;
        let partial = self.partial_path(file_name);
        let mut out = fs::File::create(&partial)?;
        let dir = self.root.join(BLOCKS_DIR).join(file_name);
        for index in 0..total_blocks {
            let mut block = fs::File::open(dir.join(index.to_string()))?;
            io::copy(&mut block, &mut out)?;
        }
        out.sync_all()?;
        Ok(partial)
    }

    /// Commit the partial artifact into the servable set.
    pub fn publish(&self, file_name: &str) -> io::Result<()> {
        validate_name(file_name)?;
        fs::rename(
            self.partial_path(file_name),
            self.root.join(FILES_DIR).join(file_name),
        )
    }

    /// Drop the partial artifact of a failed transfer, if any.
    pub fn discard_partial(&self, file_name: &str) -> io::Result<()> {
        validate_name(file_name)?;
        match fs::remove_file(self.partial_path(file_name)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Remove every block artifact of a transfer.
    pub fn remove_blocks(&self, file_name: &str) -> io::Result<()> {
        validate_name(file_name)?;
        match fs::remove_dir_all(self.root.join(BLOCKS_DIR).join(file_name)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn partial_path(&self, file_name: &str) -> PathBuf {
        self.root.join(BLOCKS_DIR).join(format!("{file_name}.partial"))
    }
}

/// File names come off the wire; confine them to plain names inside the
/// storage area.
fn validate_name(name: &str) -> io::Result<()> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0');
    if plain {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid file name: {name:?}"),
        ))
    }
}
