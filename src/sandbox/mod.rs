//! Filesystem sandbox for tool-backed file access.
//!
//! Every path handed to the sandbox is resolved against a fixed root and
//! must stay inside it after symlink resolution:
//! - `..` segments are folded lexically, then the deepest existing ancestor
//!   is canonicalised so a symlinked directory cannot smuggle a path out
//! - a symlink at the final component is followed and re-validated
//! - writes land in a temp file next to the destination and are renamed
//!   over it, so readers never observe a partial file
//!
//! Task-scoped sandboxes (`<root>/tasks/<task_id>`) isolate concurrent agent
//! runs from each other's drafts.

mod patch;

pub use patch::{Patch, apply_patches_to_text};

use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SandboxError;

/// Directory under the sandbox root that holds task-scoped sandboxes.
pub const TASKS_DIR: &str = "tasks";

/// Maximum number of symlink hops followed during validation.
const MAX_SYMLINK_DEPTH: usize = 16;

/// A directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// File access confined to a single root directory.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    /// Serialises read-modify-write cycles within this process.
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Sandbox {
    /// Create a sandbox rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| io_err(root, e))?;
        let root = root.canonicalize().map_err(|e| io_err(root, e))?;
        Ok(Self {
            root,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// The canonical sandbox root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A sandbox confined to `<root>/tasks/<task_id>`.
    ///
    /// It shares this sandbox's write lock, so read-modify-write cycles stay
    /// serialised across every scope of one root.
    pub fn task_scoped(&self, task_id: &str) -> Result<Self, SandboxError> {
        let mut components = Path::new(task_id).components();
        let valid = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !valid || task_id.is_empty() {
            return Err(SandboxError::InvalidPath {
                path: task_id.to_string(),
                reason: "task id must be a single path segment".to_string(),
            });
        }
        let scoped = Self::new(self.root.join(TASKS_DIR).join(task_id))?;
        Ok(Self {
            write_lock: self.write_lock.clone(),
            ..scoped
        })
    }

    /// Resolve `path` to an absolute path inside the sandbox.
    ///
    /// Relative paths resolve against the root. The target does not have to
    /// exist, which lets writes create new files.
    pub fn validate(&self, path: &str) -> Result<PathBuf, SandboxError> {
        self.validate_depth(Path::new(path), path, 0)
    }

    fn validate_depth(
        &self,
        path: &Path,
        original: &str,
        depth: usize,
    ) -> Result<PathBuf, SandboxError> {
        if depth > MAX_SYMLINK_DEPTH {
            return Err(SandboxError::InvalidPath {
                path: original.to_string(),
                reason: "too many levels of symbolic links".to_string(),
            });
        }

        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let normalized = normalize(&joined);
        let resolved = canonicalize_existing_prefix(&normalized)
            .map_err(|e| io_err(&normalized, e))?;

        self.ensure_contained(&resolved, original)?;

        if let Ok(meta) = std::fs::symlink_metadata(&resolved)
            && meta.file_type().is_symlink()
        {
            let target = std::fs::read_link(&resolved).map_err(|e| io_err(&resolved, e))?;
            let target = match resolved.parent() {
                Some(parent) if target.is_relative() => parent.join(target),
                _ => target,
            };
            return self.validate_depth(&target, original, depth + 1);
        }

        Ok(resolved)
    }

    fn ensure_contained(&self, resolved: &Path, original: &str) -> Result<(), SandboxError> {
        let escape = || SandboxError::PathEscape {
            path: original.to_string(),
        };
        let relative = resolved.strip_prefix(&self.root).map_err(|_| escape())?;
        if relative.is_absolute()
            || matches!(relative.components().next(), Some(Component::ParentDir))
        {
            return Err(escape());
        }
        Ok(())
    }

    /// Whether `path` exists inside the sandbox.
    pub async fn exists(&self, path: &str) -> Result<bool, SandboxError> {
        let resolved = self.validate(path)?;
        Ok(tokio::fs::try_exists(&resolved).await.unwrap_or(false))
    }

    /// Read a UTF-8 file.
    pub async fn read(&self, path: &str) -> Result<String, SandboxError> {
        let resolved = self.validate(path)?;
        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SandboxError::NotFound {
                    path: path.to_string(),
                },
                _ => SandboxError::Io {
                    path: path.to_string(),
                    source: e,
                },
            })
    }

    /// Atomically replace the file at `path` with `content`.
    ///
    /// Returns the absolute path written.
    pub async fn write(&self, path: &str, content: &str) -> Result<PathBuf, SandboxError> {
        let resolved = self.validate(path)?;
        let _guard = self.write_lock.lock().await;
        write_atomic(resolved.clone(), content.as_bytes().to_vec()).await?;
        tracing::debug!(path = %resolved.display(), bytes = content.len(), "Sandbox write");
        Ok(resolved)
    }

    /// List a directory. `None` or an empty string lists the root.
    pub async fn list(&self, path: Option<&str>) -> Result<Vec<DirEntry>, SandboxError> {
        let display = path.filter(|p| !p.is_empty()).unwrap_or(".");
        let resolved = self.validate(display)?;

        let mut reader = tokio::fs::read_dir(&resolved)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SandboxError::NotFound {
                    path: display.to_string(),
                },
                _ => SandboxError::Io {
                    path: display.to_string(),
                    source: e,
                },
            })?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| SandboxError::Io {
            path: display.to_string(),
            source: e,
        })? {
            let meta = entry.metadata().await.map_err(|e| SandboxError::Io {
                path: display.to_string(),
                source: e,
            })?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Apply line-range patches to an existing file and write it back atomically.
    pub async fn apply_patches(
        &self,
        path: &str,
        patches: &[Patch],
    ) -> Result<String, SandboxError> {
        let resolved = self.validate(path)?;
        let _guard = self.write_lock.lock().await;
        let original = self.read(path).await?;
        self.write_patched(resolved, path, &original, patches).await
    }

    /// Like [`Sandbox::apply_patches`], but a file missing here is first
    /// seeded from the same path in `fallback`.
    ///
    /// The seed read and the patch happen under one lock acquisition, so
    /// concurrent first patches cannot overwrite each other.
    pub async fn apply_patches_seeded(
        &self,
        path: &str,
        patches: &[Patch],
        fallback: &Sandbox,
    ) -> Result<String, SandboxError> {
        let resolved = self.validate(path)?;
        let _guard = self.write_lock.lock().await;
        let original = match self.read(path).await {
            Err(SandboxError::NotFound { .. }) => fallback.read(path).await?,
            other => other?,
        };
        self.write_patched(resolved, path, &original, patches).await
    }

    async fn write_patched(
        &self,
        resolved: PathBuf,
        path: &str,
        original: &str,
        patches: &[Patch],
    ) -> Result<String, SandboxError> {
        let patched = apply_patches_to_text(original, patches).map_err(|reason| {
            SandboxError::InvalidPatch {
                path: path.to_string(),
                reason,
            }
        })?;
        write_atomic(resolved, patched.clone().into_bytes()).await?;
        Ok(patched)
    }
}

/// Write `content` to `path` via a temp file in the same directory plus rename.
///
/// Creates missing parent directories. A crash mid-write leaves the previous
/// file untouched.
pub fn write_atomic_blocking(path: &Path, content: &[u8]) -> Result<(), SandboxError> {
    let atomic_err = |reason: String| SandboxError::AtomicWrite {
        path: path.to_path_buf(),
        reason,
    };

    let dir = path
        .parent()
        .ok_or_else(|| atomic_err("destination has no parent directory".to_string()))?;
    std::fs::create_dir_all(dir).map_err(|e| atomic_err(e.to_string()))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".ironloop-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| atomic_err(e.to_string()))?;
    tmp.write_all(content).map_err(|e| atomic_err(e.to_string()))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| atomic_err(e.to_string()))?;
    tmp.persist(path).map_err(|e| atomic_err(e.error.to_string()))?;
    Ok(())
}

/// Async wrapper around [`write_atomic_blocking`].
pub async fn write_atomic(path: PathBuf, content: Vec<u8>) -> Result<(), SandboxError> {
    let target = path.clone();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&target, &content))
        .await
        .map_err(|e| SandboxError::AtomicWrite {
            path,
            reason: format!("write task failed: {}", e),
        })?
}

/// Lexically fold `.` and `..` segments. `..` never climbs above the filesystem root.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalise the deepest existing ancestor and re-append the missing tail.
fn canonicalize_existing_prefix(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();

    loop {
        match std::fs::symlink_metadata(&existing) {
            // Final component is a link: keep the link itself so the caller
            // can validate its target separately.
            Ok(meta) if meta.file_type().is_symlink() && tail.is_empty() => {
                return match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => Ok(parent.canonicalize()?.join(name)),
                    _ => existing.canonicalize(),
                };
            }
            Ok(_) => {
                let mut out = existing.canonicalize()?;
                for part in tail.iter().rev() {
                    out.push(part);
                }
                return Ok(out);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                match (existing.file_name(), existing.parent()) {
                    (Some(name), Some(parent)) => {
                        tail.push(name.to_os_string());
                        existing = parent.to_path_buf();
                    }
                    _ => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }
    }
}

fn io_err(path: &Path, source: std::io::Error) -> SandboxError {
    SandboxError::Io {
        path: path.display().to_string(),
        source,
    }
}
