use std::path::PathBuf;
use std::sync::Arc;

use goscript_wire::TypeRegistry;

use crate::backend::{ExecutionBackend, GoRunBackend};
use crate::harness::HarnessTemplate;

pub const ENV_TMPDIR: &str = "GOSCRIPT_TMPDIR";

/// Everything a [`crate::Script`] needs besides the snippet.
///
/// Cheap to clone; many scripts can share one configuration.
#[derive(Debug, Clone)]
pub struct ScriptConfig {
    pub backend: Arc<dyn ExecutionBackend>,
    pub template: Arc<HarnessTemplate>,
    pub registry: Arc<TypeRegistry>,
    /// Root for per-script work directories; the system temp dir when unset.
    pub temp_root: Option<PathBuf>,
}

impl ScriptConfig {
    pub fn new(backend: impl ExecutionBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
            template: Arc::new(HarnessTemplate::standard()),
            registry: Arc::new(TypeRegistry::default()),
            temp_root: None,
        }
    }

    /// `go run` configured from `GOSCRIPT_GO`, `GOSCRIPT_GO_FLAGS` and
    /// `GOSCRIPT_TMPDIR`.
    pub fn from_env() -> Self {
        let mut config = Self::new(GoRunBackend::from_env());
        config.temp_root = std::env::var_os(ENV_TMPDIR)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        config
    }

    pub fn with_registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_template(mut self, template: HarnessTemplate) -> Self {
        self.template = Arc::new(template);
        self
    }

    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self::new(GoRunBackend::default())
    }
}
