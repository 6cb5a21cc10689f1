//! Local filesystem sandbox rooted at a working folder.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use once_cell::sync::Lazy;
use walkdir::WalkDir;

use crate::error::SandboxError;
use crate::sandbox::{FileEntry, GrepMatch, Sandbox};

/// Directories grep never descends into.
static VENDOR_DIRS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "node_modules",
        "target",
        "vendor",
        "dist",
        "build",
        "__pycache__",
        ".venv",
    ]
    .into_iter()
    .collect()
});

/// File extensions grep treats as binary and skips.
static BINARY_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "png", "jpg", "jpeg", "gif", "ico", "pdf", "zip", "gz", "tar", "bz2", "xz", "exe",
        "bin", "so", "dylib", "dll", "class", "o", "a", "wasm", "woff", "woff2", "ttf", "otf",
        "mp3", "mp4", "avi", "mov", "sqlite", "db",
    ]
    .into_iter()
    .collect()
});

/// Sandbox over the local filesystem. Relative paths resolve against the
/// working folder; absolute paths are used as given.
pub struct LocalSandbox {
    root: PathBuf,
}

impl LocalSandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.') && name != "." && name != ".."
}

fn skip_in_walk(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() {
        return is_hidden(&name) || VENDOR_DIRS.contains(name.as_ref());
    }
    false
}

fn has_binary_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| BINARY_EXTENSIONS.contains(e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn ls(&self, path: &str) -> Result<Vec<FileEntry>, SandboxError> {
        let dir = self.resolve(path);
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| SandboxError::Io(format!("{}: {}", dir.display(), e)))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SandboxError::Io(e.to_string()))?;
            out.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: entry.file_type().map(|t| t.is_dir()).unwrap_or(false),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let file = self.resolve(path);
        let bytes = std::fs::read(&file).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SandboxError::NotFound(file.display().to_string()),
            _ => SandboxError::Io(format!("{}: {}", file.display(), e)),
        })?;
        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(e) => Ok(format!(
                "base64:{}",
                base64::engine::general_purpose::STANDARD.encode(e.into_bytes())
            )),
        }
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let file = self.resolve(path);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SandboxError::Io(format!("{}: {}", parent.display(), e)))?;
        }
        std::fs::write(&file, content)
            .map_err(|e| SandboxError::Io(format!("{}: {}", file.display(), e)))
    }

    async fn edit_file(
        &self,
        path: &str,
        old_text: &str,
        new_text: &str,
    ) -> Result<(), SandboxError> {
        if old_text.is_empty() {
            return Err(SandboxError::InvalidArgument("old_text is empty".into()));
        }
        let content = self.read_file(path).await?;
        let Some(at) = content.find(old_text) else {
            return Err(SandboxError::InvalidArgument(format!(
                "old_text not found in {}",
                path
            )));
        };
        let mut edited = String::with_capacity(content.len() - old_text.len() + new_text.len());
        edited.push_str(&content[..at]);
        edited.push_str(new_text);
        edited.push_str(&content[at + old_text.len()..]);
        self.write_file(path, &edited).await
    }

    async fn glob(&self, pattern: &str, path: &str) -> Result<Vec<String>, SandboxError> {
        let dir = self.resolve(path);
        let full = dir.join(pattern);
        let full = full.to_string_lossy().into_owned();
        let paths = glob::glob(&full)
            .map_err(|e| SandboxError::InvalidArgument(format!("bad pattern: {}", e)))?;
        let mut out = Vec::new();
        for p in paths {
            let p = p.map_err(|e| SandboxError::Io(e.to_string()))?;
            out.push(p.to_string_lossy().into_owned());
        }
        out.sort();
        Ok(out)
    }

    async fn grep(&self, pattern: &str, path: &str) -> Result<Vec<GrepMatch>, SandboxError> {
        let re = regex::Regex::new(pattern)
            .map_err(|e| SandboxError::InvalidArgument(format!("bad regex: {}", e)))?;
        let dir = self.resolve(path);
        let mut out = Vec::new();
        // Depth 0 is the search root itself; only children are filtered.
        let walker = WalkDir::new(&dir)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !skip_in_walk(e));
        for entry in walker {
            let entry = entry.map_err(|e| SandboxError::Io(e.to_string()))?;
            if !entry.file_type().is_file() || has_binary_extension(entry.path()) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                // Unreadable or non-UTF-8 content; not greppable.
                continue;
            };
            for (i, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    out.push(GrepMatch {
                        path: entry.path().to_string_lossy().into_owned(),
                        line_number: i + 1,
                        line: line.to_string(),
                    });
                }
            }
        }
        Ok(out)
    }

    async fn exec(&self, command: &str) -> Result<String, SandboxError> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|e| SandboxError::Io(format!("spawn: {}", e)))?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&String::from_utf8_lossy(&output.stderr));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> (tempfile::TempDir, LocalSandbox) {
        let dir = tempfile::tempdir().unwrap();
        let sb = LocalSandbox::new(dir.path());
        (dir, sb)
    }

    /// write_file creates parents; read_file returns the text back.
    #[tokio::test]
    async fn write_and_read_round_trip() {
        let (_dir, sb) = sandbox();
        sb.write_file("sub/a.txt", "hello").await.unwrap();
        assert_eq!(sb.read_file("sub/a.txt").await.unwrap(), "hello");
    }

    /// Binary content comes back base64-tagged.
    #[tokio::test]
    async fn binary_read_is_base64_tagged() {
        let (dir, sb) = sandbox();
        std::fs::write(dir.path().join("blob"), [0u8, 159, 146, 150]).unwrap();
        let out = sb.read_file("blob").await.unwrap();
        assert!(out.starts_with("base64:"), "got: {out}");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(out.strip_prefix("base64:").unwrap())
            .unwrap();
        assert_eq!(decoded, vec![0u8, 159, 146, 150]);
    }

    /// edit_file replaces the first occurrence only and fails when absent.
    #[tokio::test]
    async fn edit_file_first_occurrence() {
        let (_dir, sb) = sandbox();
        sb.write_file("a.txt", "one two one").await.unwrap();
        sb.edit_file("a.txt", "one", "1").await.unwrap();
        assert_eq!(sb.read_file("a.txt").await.unwrap(), "1 two one");

        let err = sb.edit_file("a.txt", "missing", "x").await.unwrap_err();
        assert!(matches!(err, SandboxError::InvalidArgument(_)));
    }

    /// ls lists sorted entries with directory flags.
    #[tokio::test]
    async fn ls_lists_sorted_entries() {
        let (dir, sb) = sandbox();
        std::fs::create_dir(dir.path().join("zdir")).unwrap();
        std::fs::write(dir.path().join("afile"), "x").unwrap();
        let entries = sb.ls(".").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "afile");
        assert!(!entries[0].is_dir);
        assert_eq!(entries[1].name, "zdir");
        assert!(entries[1].is_dir);
    }

    /// glob matches by pattern under the given directory.
    #[tokio::test]
    async fn glob_matches_pattern() {
        let (_dir, sb) = sandbox();
        sb.write_file("src/a.rs", "x").await.unwrap();
        sb.write_file("src/b.rs", "x").await.unwrap();
        sb.write_file("src/c.txt", "x").await.unwrap();
        let hits = sb.glob("src/*.rs", ".").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].ends_with("a.rs"));
    }

    /// grep walks the tree, skipping hidden and vendor directories.
    #[tokio::test]
    async fn grep_skips_hidden_and_vendor_dirs() {
        let (_dir, sb) = sandbox();
        sb.write_file("src/a.txt", "needle here").await.unwrap();
        sb.write_file(".git/config", "needle hidden").await.unwrap();
        sb.write_file("node_modules/x.js", "needle vendored").await.unwrap();
        let hits = sb.grep("needle", ".").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].path.ends_with("a.txt"));
        assert_eq!(hits[0].line_number, 1);
    }

    /// grep skips files with binary extensions.
    #[tokio::test]
    async fn grep_skips_binary_extensions() {
        let (_dir, sb) = sandbox();
        sb.write_file("notes.txt", "needle").await.unwrap();
        sb.write_file("image.png", "needle").await.unwrap();
        let hits = sb.grep("needle", ".").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].path.ends_with("notes.txt"));
    }

    /// exec runs through the shell in the working folder and merges streams.
    #[tokio::test]
    async fn exec_runs_in_root() {
        let (_dir, sb) = sandbox();
        sb.write_file("present.txt", "x").await.unwrap();
        let out = sb.exec("ls").await.unwrap();
        assert!(out.contains("present.txt"));
    }
}
