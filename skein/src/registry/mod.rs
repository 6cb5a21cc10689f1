//! Agent registry: templates by key, built instances by (key, user).
//!
//! A template is an [`AgentConfig`]; the first access for a user clones it
//! into an instance, applies that instance's middleware overrides, and builds
//! the [`Agent`] lazily. Overrides resolve at build time, never at run time,
//! so a single run always observes a stable middleware stack. Changing
//! overrides or the global tool set invalidates cached agents; they rebuild on
//! next use.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::agent::{Agent, DEFAULT_MAX_ITERATIONS};
use crate::llm::ModelClient;
use crate::middleware::{
    AgentMiddleware, FilesystemMiddleware, MemoryMiddleware, SkillsMiddleware,
    SummarizationMiddleware, TodoListMiddleware, TracingMiddleware, DEFAULT_CONTEXT_WINDOW,
};
use crate::sandbox::{LocalSandbox, Sandbox};
use crate::store::ThreadStore;
use crate::tools::Tool;
use crate::trace::TraceRecorder;

/// Backend selector for an agent's sandbox capability.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// No sandbox: filesystem, memory, and skills middleware are not installed.
    #[default]
    None,
    /// Local filesystem rooted at `root`.
    Local { root: String },
}

/// Template for building an agent.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    pub system_prompt: String,
    /// Tool names to advertise; empty means all installed tools.
    pub tools: Vec<String>,
    pub backend: BackendConfig,
    pub skills_paths: Vec<String>,
    pub memory_paths: Vec<String>,
    pub context_window: u32,
    pub max_iterations: u32,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            system_prompt: String::new(),
            tools: Vec::new(),
            backend: BackendConfig::None,
            skills_paths: Vec::new(),
            memory_paths: Vec::new(),
            context_window: DEFAULT_CONTEXT_WINDOW,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tokens: 4_096,
            temperature: None,
        }
    }
}

/// Per-instance middleware overrides, resolved when the agent is built.
#[derive(Clone, Default)]
pub struct MiddlewareOverrides {
    /// Default middleware to drop, by name.
    pub remove: Vec<String>,
    /// Extra middleware appended after the defaults.
    pub add: Vec<Arc<dyn AgentMiddleware>>,
    /// Per-middleware configuration, keyed by middleware name.
    pub config: HashMap<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no template registered for agent key '{0}'")]
    UnknownTemplate(String),
}

struct AgentInstance {
    config: AgentConfig,
    overrides: MiddlewareOverrides,
    agent: Option<Arc<Agent>>,
}

/// Process-wide registry of agent templates and built instances.
pub struct Registry {
    model: Arc<dyn ModelClient>,
    store: Arc<ThreadStore>,
    trace: Option<Arc<dyn TraceRecorder>>,
    templates: DashMap<String, AgentConfig>,
    instances: DashMap<(String, String), AgentInstance>,
    global_tools: DashMap<String, Arc<dyn Tool>>,
}

impl Registry {
    pub fn new(model: Arc<dyn ModelClient>, store: Arc<ThreadStore>) -> Self {
        Self {
            model,
            store,
            trace: None,
            templates: DashMap::new(),
            instances: DashMap::new(),
            global_tools: DashMap::new(),
        }
    }

    pub fn with_trace(mut self, trace: Arc<dyn TraceRecorder>) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Registers (or replaces) the template for `key`. Existing instances keep
    /// their cloned config until rebuilt.
    pub fn register_template(&self, key: impl Into<String>, config: AgentConfig) {
        self.templates.insert(key.into(), config);
    }

    /// Returns the built agent for (key, user), cloning the template into a
    /// fresh instance on first access and building lazily.
    pub fn get_or_build(&self, key: &str, user: &str) -> Result<Arc<Agent>, RegistryError> {
        let instance_key = (key.to_string(), user.to_string());
        let mut entry = match self.instances.entry(instance_key) {
            dashmap::mapref::entry::Entry::Occupied(e) => e.into_ref(),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let template = self
                    .templates
                    .get(key)
                    .map(|t| t.value().clone())
                    .ok_or_else(|| RegistryError::UnknownTemplate(key.to_string()))?;
                v.insert(AgentInstance {
                    config: template,
                    overrides: MiddlewareOverrides::default(),
                    agent: None,
                })
            }
        };
        if entry.agent.is_none() {
            let built = Arc::new(self.build_agent(&entry.config, &entry.overrides));
            entry.agent = Some(built);
        }
        Ok(Arc::clone(entry.agent.as_ref().expect("agent just built")))
    }

    /// Removes and invalidates the instance for (key, user).
    pub fn delete_instance(&self, key: &str, user: &str) {
        self.instances.remove(&(key.to_string(), user.to_string()));
    }

    /// Atomically replaces the instance's overrides and drops its cached
    /// agent; the next access rebuilds with the new stack.
    pub fn update_middleware_overrides(
        &self,
        key: &str,
        user: &str,
        overrides: MiddlewareOverrides,
    ) -> Result<(), RegistryError> {
        let instance_key = (key.to_string(), user.to_string());
        match self.instances.entry(instance_key) {
            dashmap::mapref::entry::Entry::Occupied(mut e) => {
                let instance = e.get_mut();
                instance.overrides = overrides;
                instance.agent = None;
            }
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let template = self
                    .templates
                    .get(key)
                    .map(|t| t.value().clone())
                    .ok_or_else(|| RegistryError::UnknownTemplate(key.to_string()))?;
                v.insert(AgentInstance {
                    config: template,
                    overrides,
                    agent: None,
                });
            }
        }
        Ok(())
    }

    /// Drops every cached built agent; instances rebuild on next use.
    pub fn invalidate_all(&self) {
        for mut entry in self.instances.iter_mut() {
            entry.agent = None;
        }
    }

    /// Installs a process-wide tool available to every agent and invalidates
    /// cached builds so they pick it up.
    pub fn register_tool(&self, tool: Arc<dyn Tool>) {
        self.global_tools.insert(tool.name().to_string(), tool);
        self.invalidate_all();
    }

    fn build_agent(&self, config: &AgentConfig, overrides: &MiddlewareOverrides) -> Agent {
        let sandbox: Option<Arc<dyn Sandbox>> = match &config.backend {
            BackendConfig::None => None,
            BackendConfig::Local { root } => Some(Arc::new(LocalSandbox::new(root.clone()))),
        };
        let stack = self.middleware_stack(config, overrides, sandbox);

        let mut builder = Agent::builder(Arc::clone(&self.model), Arc::clone(&self.store))
            .model_id(config.model.clone())
            .system_prompt(config.system_prompt.clone())
            .middleware_stack(stack)
            .advertise(config.tools.clone())
            .max_iterations(config.max_iterations)
            .max_tokens(config.max_tokens);
        if let Some(t) = config.temperature {
            builder = builder.temperature(t);
        }
        if let Some(trace) = &self.trace {
            builder = builder.trace(Arc::clone(trace));
        }
        for entry in self.global_tools.iter() {
            builder = builder.tool(Arc::clone(entry.value()));
        }
        builder.build()
    }

    /// Default stack order: todos, filesystem, memory, skills, summarization,
    /// tracing; then removals, then additions.
    fn middleware_stack(
        &self,
        config: &AgentConfig,
        overrides: &MiddlewareOverrides,
        sandbox: Option<Arc<dyn Sandbox>>,
    ) -> Vec<Arc<dyn AgentMiddleware>> {
        let mut stack: Vec<Arc<dyn AgentMiddleware>> = vec![Arc::new(TodoListMiddleware::new())];

        if let Some(sandbox) = &sandbox {
            stack.push(Arc::new(FilesystemMiddleware::new(Arc::clone(sandbox))));
            let memory_paths = override_paths(overrides, "memory", &config.memory_paths);
            if !memory_paths.is_empty() {
                stack.push(Arc::new(MemoryMiddleware::new(
                    Arc::clone(sandbox),
                    memory_paths,
                )));
            }
            let skills_paths = override_paths(overrides, "skills", &config.skills_paths);
            if !skills_paths.is_empty() {
                stack.push(Arc::new(SkillsMiddleware::new(
                    Arc::clone(sandbox),
                    skills_paths,
                )));
            }
        } else if !config.memory_paths.is_empty() || !config.skills_paths.is_empty() {
            warn!("memory/skills paths configured without a backend; skipping those middleware");
        }

        let context_window = overrides
            .config
            .get("summarization")
            .and_then(|v| v.get("context_window"))
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(config.context_window);
        stack.push(Arc::new(
            SummarizationMiddleware::new(Arc::clone(&self.model), config.model.clone())
                .with_context_window(context_window),
        ));
        stack.push(Arc::new(TracingMiddleware::new()));

        stack.retain(|mw| !overrides.remove.iter().any(|name| name == mw.name()));
        stack.extend(overrides.add.iter().cloned());
        stack
    }
}

fn override_paths(overrides: &MiddlewareOverrides, name: &str, defaults: &[String]) -> Vec<String> {
    overrides
        .config
        .get(name)
        .and_then(|v| v.get("paths"))
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_else(|| defaults.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockModel;
    use serde_json::json;

    fn registry() -> Registry {
        let model = Arc::new(MockModel::text("ok"));
        let store = ThreadStore::with_config(
            std::time::Duration::from_secs(60),
            std::time::Duration::from_secs(60),
        );
        Registry::new(model, store)
    }

    /// Unknown keys error; registered keys build and cache one instance.
    #[tokio::test]
    async fn get_or_build_caches_per_user() {
        let reg = registry();
        assert!(matches!(
            reg.get_or_build("helper", "u1"),
            Err(RegistryError::UnknownTemplate(_))
        ));

        reg.register_template("helper", AgentConfig::default());
        let a = reg.get_or_build("helper", "u1").unwrap();
        let b = reg.get_or_build("helper", "u1").unwrap();
        assert!(Arc::ptr_eq(&a, &b), "same user gets the cached build");

        let c = reg.get_or_build("helper", "u2").unwrap();
        assert!(!Arc::ptr_eq(&a, &c), "distinct users get distinct instances");
    }

    /// Updating overrides invalidates the cached agent.
    #[tokio::test]
    async fn override_update_invalidates() {
        let reg = registry();
        reg.register_template("helper", AgentConfig::default());
        let before = reg.get_or_build("helper", "u1").unwrap();

        reg.update_middleware_overrides(
            "helper",
            "u1",
            MiddlewareOverrides {
                remove: vec!["tracing".into()],
                ..Default::default()
            },
        )
        .unwrap();
        let after = reg.get_or_build("helper", "u1").unwrap();
        assert!(!Arc::ptr_eq(&before, &after), "override update rebuilds");
    }

    /// invalidate_all and register_tool drop every cached build.
    #[tokio::test]
    async fn invalidation_drops_cached_builds() {
        let reg = registry();
        reg.register_template("helper", AgentConfig::default());
        let before = reg.get_or_build("helper", "u1").unwrap();
        reg.invalidate_all();
        let after = reg.get_or_build("helper", "u1").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));

        let before = Arc::clone(&after);
        reg.register_tool(Arc::new(crate::tools::FuncTool::new(
            "ping",
            "answers pong",
            json!({"type": "object"}),
            |_args, _ctx| async { Ok("pong".to_string()) },
        )));
        let after = reg.get_or_build("helper", "u1").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
    }

    /// delete_instance forgets the per-user clone.
    #[tokio::test]
    async fn delete_instance_forgets_clone() {
        let reg = registry();
        reg.register_template("helper", AgentConfig::default());
        let before = reg.get_or_build("helper", "u1").unwrap();
        reg.delete_instance("helper", "u1");
        let after = reg.get_or_build("helper", "u1").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
    }

    /// AgentConfig deserializes from a JSON document with defaults applied.
    #[test]
    fn agent_config_deserializes_with_defaults() {
        let config: AgentConfig = serde_json::from_value(json!({
            "model": "test-model",
            "system_prompt": "be useful",
            "backend": { "kind": "local", "root": "/tmp/agent" },
            "memory_paths": ["mem/AGENT.md"],
            "context_window": 64000
        }))
        .unwrap();
        assert_eq!(config.model, "test-model");
        assert_eq!(
            config.backend,
            BackendConfig::Local {
                root: "/tmp/agent".into()
            }
        );
        assert_eq!(config.context_window, 64_000);
        assert_eq!(config.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert!(config.tools.is_empty());
    }

    /// The default stack contains the expected middleware in order.
    #[tokio::test]
    async fn default_stack_order_and_overrides() {
        let reg = registry();
        let config = AgentConfig {
            backend: BackendConfig::Local { root: "/tmp".into() },
            memory_paths: vec!["m.md".into()],
            skills_paths: vec!["skills".into()],
            ..Default::default()
        };
        let sandbox: Option<Arc<dyn Sandbox>> =
            Some(Arc::new(LocalSandbox::new("/tmp".to_string())));
        let stack = reg.middleware_stack(&config, &MiddlewareOverrides::default(), sandbox.clone());
        let names: Vec<&str> = stack.iter().map(|m| m.name()).collect();
        assert_eq!(
            names,
            vec!["todos", "filesystem", "memory", "skills", "summarization", "tracing"]
        );

        let overrides = MiddlewareOverrides {
            remove: vec!["skills".into(), "tracing".into()],
            ..Default::default()
        };
        let stack = reg.middleware_stack(&config, &overrides, sandbox);
        let names: Vec<&str> = stack.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["todos", "filesystem", "memory", "summarization"]);
    }
}
