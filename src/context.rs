//! Application context.
//!
//! Everything a command needs (workspace layout, merged configuration,
//! step registry and job store) is built once by [`AppContext::open`] and
//! passed down explicitly. [`AppContext::close`] is the matching teardown.

use std::path::Path;
use std::sync::Arc;

use crate::config::{load_config, PlateflowConfig, RunnerKind};
use crate::engine::{CommandRunner, ExecutionEngine, InProcessRunner, JobRunner, LocalEngine};
use crate::error::Result;
use crate::steps::StepRegistry;
use crate::store::{FileStore, JobStore};
use crate::workspace::Workspace;

pub struct AppContext {
    workspace: Workspace,
    config: PlateflowConfig,
    registry: Arc<StepRegistry>,
    store: Box<dyn JobStore>,
}

impl AppContext {
    /// Load configuration under `root` and open the file store it names.
    pub fn open(root: &Path, config_override: Option<&Path>) -> Result<Self> {
        let workspace = Workspace::new(root);
        let config = load_config(root, config_override)?;
        let store_file = workspace.store_file(config.store_path.as_deref());
        let store = FileStore::open(store_file)?;
        tracing::debug!("Opened workspace {}", root.display());
        Ok(Self::from_parts(
            workspace,
            config,
            StepRegistry::with_builtins(),
            Box::new(store),
        ))
    }

    pub fn from_parts(
        workspace: Workspace,
        config: PlateflowConfig,
        registry: StepRegistry,
        store: Box<dyn JobStore>,
    ) -> Self {
        Self {
            workspace,
            config,
            registry: Arc::new(registry),
            store,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn config(&self) -> &PlateflowConfig {
        &self.config
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Registry handle that outlives a borrow of the context.
    pub fn shared_registry(&self) -> Arc<StepRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn store(&self) -> &dyn JobStore {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn JobStore {
        self.store.as_mut()
    }

    /// Local engine configured by the `engine` settings.
    pub fn local_engine(&self) -> Result<Box<dyn ExecutionEngine>> {
        let settings = &self.config.engine;
        let runner: Box<dyn JobRunner> = match settings.runner {
            RunnerKind::InProcess => Box::new(InProcessRunner::new(
                self.workspace.clone(),
                Arc::clone(&self.registry),
            )),
            RunnerKind::Command => match &settings.program {
                Some(program) => Box::new(CommandRunner::new(program, self.workspace.clone())),
                None => Box::new(CommandRunner::current_exe(self.workspace.clone())?),
            },
        };
        tracing::debug!(
            "Local engine with {:?} runner, {} job(s) per progress call",
            settings.runner,
            settings.max_in_flight
        );
        Ok(Box::new(LocalEngine::new(
            self.workspace.clone(),
            runner,
            settings.max_in_flight,
        )))
    }

    /// Release the store.
    pub fn close(self) {
        tracing::debug!("Closing workspace {}", self.workspace.root().display());
        drop(self.store);
    }
}
