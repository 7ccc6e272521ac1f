//! Command dispatching.
//!
//! - [`Command`] trait implemented by every subcommand
//! - [`CommandResult`] for uniform exit codes
//! - [`CommandEnv`] for the workspace a command operates on
//! - [`CommandDispatcher`] routing parsed arguments to commands

use std::path::{Path, PathBuf};

use crate::cli::args::{Cli, Commands};
use crate::context::AppContext;
use crate::error::Result;
use crate::ui::UserInterface;

pub trait Command {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult>;
}

#[derive(Debug)]
pub struct CommandResult {
    pub success: bool,
    /// 0 for success.
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success() -> Self {
        Self {
            success: true,
            exit_code: 0,
        }
    }

    pub fn failure(exit_code: i32) -> Self {
        Self {
            success: false,
            exit_code,
        }
    }
}

/// Workspace root and config override shared by all commands.
#[derive(Debug, Clone)]
pub struct CommandEnv {
    root: PathBuf,
    config: Option<PathBuf>,
}

impl CommandEnv {
    pub fn new(root: impl Into<PathBuf>, config: Option<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load configuration and open the job store.
    pub fn open(&self) -> Result<AppContext> {
        AppContext::open(&self.root, self.config.as_deref())
    }
}

pub struct CommandDispatcher {
    env: CommandEnv,
}

impl CommandDispatcher {
    pub fn new(project_root: PathBuf, config: Option<PathBuf>) -> Self {
        Self {
            env: CommandEnv::new(project_root, config),
        }
    }

    pub fn project_root(&self) -> &Path {
        self.env.root()
    }

    pub fn dispatch(&self, cli: &Cli, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let env = self.env.clone();
        match &cli.command {
            Commands::Plan(args) => super::plan::PlanCommand::new(env, args.clone()).execute(ui),
            Commands::Run(args) => super::run::RunCommand::new(env, args.clone()).execute(ui),
            Commands::Submit(args) => {
                super::submit::SubmitCommand::new(env, args.clone()).execute(ui)
            }
            Commands::Resubmit(args) => {
                super::submit::ResubmitCommand::new(env, args.clone()).execute(ui)
            }
            Commands::Collect(args) => {
                super::collect::CollectCommand::new(env, args.clone()).execute(ui)
            }
            Commands::Status(args) => {
                super::status::StatusCommand::new(env, args.clone()).execute(ui)
            }
            Commands::Stop(args) => super::stop::StopCommand::new(env, args.clone()).execute(ui),
            Commands::Workflow(args) => {
                super::workflow::WorkflowCommand::new(env, args.clone()).execute(ui)
            }
            Commands::Info(args) => super::info::InfoCommand::new(env, args.clone()).execute(ui),
            Commands::Log(args) => super::info::LogCommand::new(env, args.clone()).execute(ui),
            Commands::Cleanup(args) => {
                super::cleanup::CleanupCommand::new(env, args.clone()).execute(ui)
            }
            Commands::Steps(args) => super::steps::StepsCommand::new(env, args.clone()).execute(ui),
            Commands::Completions(args) => {
                super::completions::CompletionsCommand::new(args.clone()).execute(ui)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::MockUI;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn command_result_codes() {
        assert_eq!(CommandResult::success().exit_code, 0);
        let failed = CommandResult::failure(1);
        assert!(!failed.success);
        assert_eq!(failed.exit_code, 1);
    }

    #[test]
    fn dispatches_steps_listing() {
        let temp = TempDir::new().unwrap();
        let dispatcher = CommandDispatcher::new(temp.path().to_path_buf(), None);
        let cli = Cli::parse_from(["plateflow", "steps"]);
        let mut ui = MockUI::new();

        let result = dispatcher.dispatch(&cli, &mut ui).unwrap();

        assert!(result.success);
        assert!(ui.has_message("corilla"));
        assert_eq!(dispatcher.project_root(), temp.path());
    }
}
