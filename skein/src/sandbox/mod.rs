//! Sandbox capability: filesystem and shell operations for middleware tools.
//!
//! The loop never touches the sandbox; the filesystem, memory, and skills
//! middleware consume it. [`LocalSandbox`] backs the operations with the local
//! filesystem; container-daemon backends implement the same trait elsewhere.

mod local;

pub use local::LocalSandbox;

use async_trait::async_trait;

use crate::error::SandboxError;

/// One directory entry from [`Sandbox::ls`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct FileEntry {
    pub name: String,
    pub is_dir: bool,
}

/// One line matched by [`Sandbox::grep`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct GrepMatch {
    pub path: String,
    pub line_number: usize,
    pub line: String,
}

/// Filesystem and shell capability.
///
/// `read_file` returns text content; binary files come back as
/// `"base64:" + base64(bytes)`. `edit_file` replaces the first occurrence of
/// `old_text` and fails when it is absent. `exec` returns combined output.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn ls(&self, path: &str) -> Result<Vec<FileEntry>, SandboxError>;
    async fn read_file(&self, path: &str) -> Result<String, SandboxError>;
    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;
    async fn edit_file(&self, path: &str, old_text: &str, new_text: &str)
        -> Result<(), SandboxError>;
    async fn glob(&self, pattern: &str, path: &str) -> Result<Vec<String>, SandboxError>;
    async fn grep(&self, pattern: &str, path: &str) -> Result<Vec<GrepMatch>, SandboxError>;
    async fn exec(&self, command: &str) -> Result<String, SandboxError>;
}
