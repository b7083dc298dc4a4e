//! Locating impulse response files on disk

use std::path::{Path, PathBuf};
use tracing::debug;

/// Extension of the native kernel format (a WAV file)
pub const IRS_EXTENSION: &str = "irs";

/// Extensions listed as kernels
const KERNEL_EXTENSIONS: &[&str] = &[IRS_EXTENSION, "wav", "flac"];

/// Subdirectory levels searched below the root
const MAX_DEPTH: usize = 3;

/// A folder of impulse responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelDirectory {
    root: PathBuf,
}

impl Default for KernelDirectory {
    fn default() -> Self {
        Self::new(Self::default_dir())
    }
}

impl KernelDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<data dir>/irfx/irs`
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("irfx")
            .join("irs")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Turn a kernel name or path into an existing file
    ///
    /// An existing path is returned as-is. Otherwise `<name>` and
    /// `<name>.irs` are looked up in the root and its subdirectories.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let direct = Path::new(name);
        if direct.is_file() {
            return Some(direct.to_path_buf());
        }

        let with_ext = format!("{}.{}", name, IRS_EXTENSION);
        let found = find_file(&self.root, &[name, with_ext.as_str()], 0);

        match &found {
            Some(path) => debug!("Resolved kernel '{}' to {}", name, path.display()),
            None => debug!("Kernel '{}' not found under {}", name, self.root.display()),
        }

        found
    }

    /// All kernel files under the root, sorted by file name
    pub fn list(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        collect_kernels(&self.root, 0, &mut files);
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()).then_with(|| a.cmp(b)));
        files
    }
}

fn find_file(dir: &Path, names: &[&str], depth: usize) -> Option<PathBuf> {
    for name in names {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    if depth >= MAX_DEPTH {
        return None;
    }

    let mut subdirs: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort();

    subdirs
        .iter()
        .find_map(|sub| find_file(sub, names, depth + 1))
}

fn collect_kernels(dir: &Path, depth: usize, files: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();

        if path.is_file() {
            if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                if KERNEL_EXTENSIONS.iter().any(|k| k.eq_ignore_ascii_case(ext)) {
                    files.push(path);
                }
            }
        } else if path.is_dir() && depth < MAX_DEPTH {
            collect_kernels(&path, depth + 1, files);
        }
    }
}
