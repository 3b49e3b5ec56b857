//! SteamCMD driver: command construction, execution and output classification.

mod command;
mod files;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AgentError, Result};
use crate::process::{run_process, RunOutcome, RunRequest};

pub use command::{ensure_quit, SteamCmdCommand};
pub use files::{cleanup_cache, ensure_installed, fresh_reset, SweepReport};

/// Stdout line SteamCMD prints for `+app_status` and at the end of installs.
pub const INSTALL_STATE_SENTINEL: &str = "install state:";

/// Substring of the install state line when a newer build is available.
const UPDATE_REQUIRED: &str = "update required";

/// Runs one SteamCMD script. The seam tests replace.
#[async_trait]
pub trait SteamCmdExecutor: Send + Sync {
    async fn execute(&self, args: &[String], sentinel: Option<&str>) -> Result<RunOutcome>;
}

/// Executes the real SteamCMD binary through the scoped process runner.
#[derive(Debug, Clone)]
pub struct SteamCmdProcess {
    exe: PathBuf,
}

impl SteamCmdProcess {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }
}

#[async_trait]
impl SteamCmdExecutor for SteamCmdProcess {
    async fn execute(&self, args: &[String], sentinel: Option<&str>) -> Result<RunOutcome> {
        run_process(RunRequest {
            program: &self.exe,
            args,
            cwd: self.exe.parent(),
            sentinel,
            label: "steamcmd",
        })
        .await
    }
}

/// High-level SteamCMD operations used by the lifecycle engine.
#[derive(Clone)]
pub struct SteamCmd {
    executor: Arc<dyn SteamCmdExecutor>,
    username: String,
}

impl SteamCmd {
    pub fn new(executor: Arc<dyn SteamCmdExecutor>, username: impl Into<String>) -> Self {
        Self {
            executor,
            username: username.into(),
        }
    }

    fn base(&self) -> SteamCmdCommand {
        SteamCmdCommand::new().login(&self.username)
    }

    /// Run raw SteamCMD arguments, appending `+quit` when absent.
    ///
    /// The captured sentinel line (if any) comes back in the outcome.
    pub async fn run_command(&self, mut args: Vec<String>) -> Result<RunOutcome> {
        ensure_quit(&mut args);
        log::debug!("steamcmd {}", args.join(" "));
        self.executor
            .execute(&args, Some(INSTALL_STATE_SENTINEL))
            .await
    }

    async fn run_checked(&self, command: SteamCmdCommand, what: &str) -> Result<RunOutcome> {
        let outcome = self.run_command(command.into_args()).await?;
        if outcome.success() {
            Ok(outcome)
        } else {
            Err(AgentError::steamcmd(format!(
                "{} failed (exit code {:?}){}",
                what,
                outcome.exit_code,
                outcome
                    .error_line
                    .as_deref()
                    .map(|l| format!(": {}", l.trim()))
                    .unwrap_or_default()
            )))
        }
    }

    /// Log in once so SteamCMD updates itself. Used at boot.
    pub async fn self_update(&self) -> Result<()> {
        self.run_checked(self.base(), "SteamCMD self-update")
            .await
            .map(|_| ())
    }

    /// Install or update an app into `install_dir`.
    pub async fn app_update(&self, install_dir: &Path, app_id: u32, validate: bool) -> Result<()> {
        let command = self
            .base()
            .install_dir(install_dir)
            .app_update(app_id, validate);
        self.run_checked(command, &format!("app_update {}", app_id))
            .await
            .map(|_| ())
    }

    /// Download one workshop item for `game_id` into `install_dir`.
    pub async fn workshop_download(
        &self,
        install_dir: &Path,
        game_id: u32,
        item_id: u64,
        validate: bool,
    ) -> Result<()> {
        let command = self
            .base()
            .install_dir(install_dir)
            .workshop_download(game_id, item_id, validate);
        self.run_checked(command, &format!("workshop item {}", item_id))
            .await
            .map(|_| ())
    }

    /// True iff SteamCMD reports "update required" for the installed app.
    pub async fn check_for_update(&self, install_dir: &Path, app_id: u32) -> Result<bool> {
        let command = self.base().install_dir(install_dir).app_status(app_id);
        let outcome = self.run_command(command.into_args()).await?;
        Ok(update_required(outcome.sentinel_or_empty()))
    }
}

/// Classify an install state line.
pub fn update_required(install_state_line: &str) -> bool {
    install_state_line.to_lowercase().contains(UPDATE_REQUIRED)
}


#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use super::testing::FakeSteamCmd;
    use super::{update_required, SteamCmd};
    use crate::error::ErrorKind;
    use crate::process::RunOutcome;

    #[test]
    fn classifies_install_state_lines() {
        assert!(update_required(
            " - install state: Fully Installed,Update Required,"
        ));
        assert!(!update_required(" - install state: Fully Installed,"));
        assert!(!update_required(""));
    }

    #[tokio::test]
    async fn run_command_appends_quit() {
        let fake = Arc::new(FakeSteamCmd::default());
        let steam = SteamCmd::new(fake.clone(), "");
        steam
            .run_command(vec!["+login".into(), "anonymous".into()])
            .await
            .unwrap();
        assert_eq!(fake.joined_calls(), vec!["+login anonymous +quit"]);
    }

    #[tokio::test]
    async fn check_for_update_reads_sentinel() {
        let fake = Arc::new(FakeSteamCmd::default());
        fake.reply(RunOutcome {
            exit_code: None,
            sentinel_line: Some(" - install state: Fully Installed,Update Required,".into()),
            error_line: None,
        });
        let steam = SteamCmd::new(fake.clone(), "");

        assert!(steam
            .check_for_update(Path::new("/srv/x"), 2394010)
            .await
            .unwrap());
        // No sentinel captured: reported as up to date.
        assert!(!steam
            .check_for_update(Path::new("/srv/x"), 2394010)
            .await
            .unwrap());
        assert!(fake.joined_calls()[0].contains("+app_status 2394010"));
    }

    #[tokio::test]
    async fn failed_update_is_a_steamcmd_error() {
        let fake = Arc::new(FakeSteamCmd::default());
        fake.reply(RunOutcome {
            exit_code: Some(8),
            sentinel_line: None,
            error_line: Some("ERROR! Failed to install app '12345' (No subscription)".into()),
        });
        let steam = SteamCmd::new(fake, "");

        let err = steam
            .app_update(Path::new("/srv/x"), 12345, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SteamCmd);
        assert!(err.to_string().contains("No subscription"));
    }
}
