//! Retrieved folders and the scratch copy the parser works on

use crate::error::{ParserError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Files retrieved from a finished calculation
pub trait RetrievedFolder: Send + Sync {
    /// Relative file names, `/` separated
    fn list(&self) -> Result<Vec<String>>;

    fn read(&self, name: &str) -> Result<Vec<u8>>;
}

/// Retrieved folder on local disk
#[derive(Debug, Clone)]
pub struct LocalFolder {
    root: PathBuf,
}

impl LocalFolder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn walk(&self, dir: &Path, names: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.walk(&path, names)?;
            } else if let Ok(relative) = path.strip_prefix(&self.root) {
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                names.push(name);
            }
        }
        Ok(())
    }
}

impl RetrievedFolder for LocalFolder {
    fn list(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Err(ParserError::Folder(format!("{} is not a directory", self.root.display())));
        }
        let mut names = Vec::new();
        self.walk(&self.root, &mut names)?;
        names.sort();
        Ok(names)
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.root.join(checked_relative(name)?))?)
    }
}

/// Retrieved folder held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryFolder {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryFolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(name, content);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), content.into());
    }
}

impl RetrievedFolder for MemoryFolder {
    fn list(&self) -> Result<Vec<String>> {
        Ok(self.files.keys().cloned().collect())
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| ParserError::Folder(format!("no file named {}", name)))
    }
}

/// Reject absolute names and `..` so a listing cannot escape the scratch dir
fn checked_relative(name: &str) -> Result<PathBuf> {
    let path = PathBuf::from(name);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if name.is_empty() || escapes {
        return Err(ParserError::Folder(format!("refusing file name {}", name)));
    }
    Ok(path)
}

/// Scratch copy of a retrieved folder
#[derive(Debug)]
pub struct Scratch {
    dir: TempDir,
    files: Vec<String>,
}

impl Scratch {
    /// Copy every retrieved file into a new temporary directory
    pub fn materialize(folder: &dyn RetrievedFolder, root: Option<&Path>) -> Result<Self> {
        let dir = match root {
            Some(root) => {
                fs::create_dir_all(root)?;
                tempfile::Builder::new().prefix("yambo-parse-").tempdir_in(root)?
            }
            None => tempfile::Builder::new().prefix("yambo-parse-").tempdir()?,
        };

        let mut files = folder.list()?;
        files.sort();
        for name in &files {
            let target = dir.path().join(checked_relative(name)?);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, folder.read(name)?)?;
        }

        debug!(path = %dir.path().display(), files = files.len(), "Retrieved folder materialized");
        Ok(Self { dir, files })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Relative names, sorted
    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn contains_basename(&self, basename: &str) -> bool {
        self.files
            .iter()
            .any(|f| f.rsplit('/').next() == Some(basename))
    }

    /// Leading bytes of a file
    pub fn head(&self, name: &str, len: usize) -> Result<Vec<u8>> {
        use std::io::Read;
        let mut buffer = vec![0u8; len];
        let mut file = fs::File::open(self.file_path(name))?;
        let mut filled = 0;
        while filled < len {
            let n = file.read(&mut buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buffer.truncate(filled);
        Ok(buffer)
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.file_path(name))?)
    }

    /// Keep the directory on disk after the parse and return its path
    pub fn persist(self) -> PathBuf {
        self.dir.keep()
    }
}
