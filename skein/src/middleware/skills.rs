//! Skills middleware: progressive disclosure of skill documents.
//!
//! Each skill lives in an immediate subdirectory of a configured root as a
//! `SKILL.md` with `---`-delimited YAML frontmatter (`name`, `description`).
//! The catalog advertised to the model carries only the metadata and the path;
//! the model reads the body on demand with `read_file`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::AgentError;
use crate::message::{Message, Role};
use crate::middleware::{AgentMiddleware, Phase};
use crate::sandbox::Sandbox;
use crate::state::AgentState;

const SKILL_FILE: &str = "SKILL.md";

/// Catalog entry for one discovered skill.
#[derive(Clone, Debug, PartialEq)]
pub struct SkillEntry {
    pub name: String,
    pub description: String,
    pub path: String,
}

#[derive(Debug, Default, Deserialize)]
struct Frontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Parses a `---`-delimited YAML frontmatter block at the start of `content`.
fn parse_frontmatter(content: &str) -> Frontmatter {
    let Some(rest) = content.strip_prefix("---") else {
        return Frontmatter::default();
    };
    let Some(end) = rest.find("\n---") else {
        return Frontmatter::default();
    };
    serde_yaml::from_str(&rest[..end]).unwrap_or_default()
}

/// Middleware that scans skill roots and advertises the catalog.
pub struct SkillsMiddleware {
    sandbox: Arc<dyn Sandbox>,
    roots: Vec<String>,
    catalog: RwLock<Vec<SkillEntry>>,
}

impl SkillsMiddleware {
    pub fn new(sandbox: Arc<dyn Sandbox>, roots: Vec<String>) -> Self {
        Self {
            sandbox,
            roots,
            catalog: RwLock::new(Vec::new()),
        }
    }

    /// A snapshot of the discovered catalog, mainly for tests and debugging.
    pub async fn catalog(&self) -> Vec<SkillEntry> {
        self.catalog.read().await.clone()
    }
}

#[async_trait]
impl AgentMiddleware for SkillsMiddleware {
    fn name(&self) -> &str {
        "skills"
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::BeforeAgent, Phase::ModifyRequest]
    }

    async fn before_agent(&self, _state: &mut AgentState) -> Result<(), AgentError> {
        let mut catalog = Vec::new();
        for root in &self.roots {
            let entries = match self.sandbox.ls(root).await {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(root = %root, error = %e, "skipping unreadable skill root");
                    continue;
                }
            };
            for entry in entries.into_iter().filter(|e| e.is_dir) {
                let path = format!("{}/{}/{}", root, entry.name, SKILL_FILE);
                let Ok(content) = self.sandbox.read_file(&path).await else {
                    continue;
                };
                let meta = parse_frontmatter(&content);
                catalog.push(SkillEntry {
                    name: meta.name.unwrap_or_else(|| entry.name.clone()),
                    description: meta.description.unwrap_or_default(),
                    path,
                });
            }
        }
        *self.catalog.write().await = catalog;
        Ok(())
    }

    async fn modify_request(&self, mut messages: Vec<Message>) -> Result<Vec<Message>, AgentError> {
        let catalog = self.catalog.read().await;
        if catalog.is_empty() {
            return Ok(messages);
        }
        match messages.first_mut() {
            Some(first) if first.role == Role::System => {
                first.content.push_str("\n\nAvailable skills:\n");
                for skill in catalog.iter() {
                    first.content.push_str(&format!(
                        "[{}] {} → Read {} for full instructions\n",
                        skill.name, skill.description, skill.path
                    ));
                }
                Ok(messages)
            }
            _ => Ok(messages),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SandboxError;
    use crate::sandbox::{FileEntry, GrepMatch};
    use std::collections::HashMap;

    struct TreeSandbox {
        // dir path -> entries, file path -> content
        dirs: HashMap<String, Vec<FileEntry>>,
        files: HashMap<String, String>,
    }

    #[async_trait]
    impl Sandbox for TreeSandbox {
        async fn ls(&self, path: &str) -> Result<Vec<FileEntry>, SandboxError> {
            self.dirs
                .get(path)
                .cloned()
                .ok_or_else(|| SandboxError::NotFound(path.into()))
        }
        async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| SandboxError::NotFound(path.into()))
        }
        async fn write_file(&self, _p: &str, _c: &str) -> Result<(), SandboxError> {
            Ok(())
        }
        async fn edit_file(&self, _p: &str, _o: &str, _n: &str) -> Result<(), SandboxError> {
            Ok(())
        }
        async fn glob(&self, _pattern: &str, _path: &str) -> Result<Vec<String>, SandboxError> {
            Ok(vec![])
        }
        async fn grep(&self, _pattern: &str, _path: &str) -> Result<Vec<GrepMatch>, SandboxError> {
            Ok(vec![])
        }
        async fn exec(&self, _command: &str) -> Result<String, SandboxError> {
            Ok(String::new())
        }
    }

    fn dir(name: &str) -> FileEntry {
        FileEntry {
            name: name.into(),
            is_dir: true,
        }
    }

    fn file(name: &str) -> FileEntry {
        FileEntry {
            name: name.into(),
            is_dir: false,
        }
    }

    fn skills_fixture() -> SkillsMiddleware {
        let mut dirs = HashMap::new();
        dirs.insert(
            "skills".to_string(),
            vec![dir("deploy"), dir("review"), dir("empty"), file("README.md")],
        );
        let mut files = HashMap::new();
        files.insert(
            "skills/deploy/SKILL.md".to_string(),
            "---\nname: deployer\ndescription: Ship a release safely\n---\nBody here".to_string(),
        );
        files.insert(
            "skills/review/SKILL.md".to_string(),
            "no frontmatter at all".to_string(),
        );
        SkillsMiddleware::new(
            Arc::new(TreeSandbox { dirs, files }),
            vec!["skills".to_string()],
        )
    }

    /// Frontmatter name/description are used; the directory name is the
    /// fallback; subdirectories without SKILL.md are skipped.
    #[tokio::test]
    async fn scan_builds_catalog_with_fallbacks() {
        let mw = skills_fixture();
        let mut state = AgentState::new("t");
        mw.before_agent(&mut state).await.unwrap();

        let catalog = mw.catalog().await;
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].name, "deployer");
        assert_eq!(catalog[0].description, "Ship a release safely");
        assert_eq!(catalog[0].path, "skills/deploy/SKILL.md");
        // No frontmatter: directory name, empty description.
        assert_eq!(catalog[1].name, "review");
        assert_eq!(catalog[1].description, "");
    }

    /// The catalog is appended to a leading system message.
    #[tokio::test]
    async fn catalog_appends_to_system_message() {
        let mw = skills_fixture();
        let mut state = AgentState::new("t");
        mw.before_agent(&mut state).await.unwrap();

        let out = mw
            .modify_request(vec![Message::system("base"), Message::user("hi")])
            .await
            .unwrap();
        assert!(out[0]
            .content
            .contains("[deployer] Ship a release safely → Read skills/deploy/SKILL.md for full instructions"));
        assert!(out[0].content.contains("[review]"));
    }

    /// Without a system message or without skills the request is untouched.
    #[tokio::test]
    async fn passthrough_cases() {
        let mw = skills_fixture();
        let mut state = AgentState::new("t");
        mw.before_agent(&mut state).await.unwrap();
        let input = vec![Message::user("hi")];
        assert_eq!(mw.modify_request(input.clone()).await.unwrap(), input);

        let empty = SkillsMiddleware::new(
            Arc::new(TreeSandbox {
                dirs: HashMap::new(),
                files: HashMap::new(),
            }),
            vec!["nowhere".to_string()],
        );
        let mut state = AgentState::new("t");
        empty.before_agent(&mut state).await.unwrap();
        let input = vec![Message::system("base")];
        assert_eq!(empty.modify_request(input.clone()).await.unwrap(), input);
    }

    /// Frontmatter parsing tolerates malformed YAML.
    #[test]
    fn frontmatter_parse_is_lenient() {
        let ok = parse_frontmatter("---\nname: a\ndescription: b\n---\nrest");
        assert_eq!(ok.name.as_deref(), Some("a"));
        let none = parse_frontmatter("plain text");
        assert!(none.name.is_none());
        let unterminated = parse_frontmatter("---\nname: a");
        assert!(unterminated.name.is_none());
    }
}
