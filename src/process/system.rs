//! `ProcessControl` backed by the real operating system.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::process::Command;

use super::control::graceful_shutdown;
use super::{matches_instance, LaunchSpec, ProcessControl, RunningProcess};
use crate::error::{AgentError, Result};

/// Process control through `sysinfo` lookups and `tokio::process` launches.
#[derive(Debug, Default)]
pub struct SystemProcessControl;

impl SystemProcessControl {
    pub fn new() -> Self {
        Self
    }
}

fn scan_processes(process_name: &str, install_dir: &Path) -> Option<RunningProcess> {
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_exe(UpdateKind::OnlyIfNotSet),
    );

    sys.processes().values().find_map(|process| {
        let name = process.name().to_string_lossy();
        if matches_instance(&name, process.exe(), process_name, install_dir) {
            Some(RunningProcess {
                pid: process.pid().as_u32(),
                name: name.into_owned(),
                exe: process.exe().map(Path::to_path_buf),
            })
        } else {
            None
        }
    })
}

#[async_trait]
impl ProcessControl for SystemProcessControl {
    async fn find_running(
        &self,
        process_name: &str,
        install_dir: &Path,
    ) -> Result<Option<RunningProcess>> {
        let process_name = process_name.to_string();
        let install_dir = install_dir.to_path_buf();
        let found =
            tokio::task::spawn_blocking(move || scan_processes(&process_name, &install_dir))
                .await?;
        Ok(found)
    }

    async fn spawn(&self, spec: &LaunchSpec) -> Result<RunningProcess> {
        if !spec.program.exists() {
            return Err(AgentError::process(format!(
                "Startup executable not found: {:?}",
                spec.program
            )));
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(target_os = "windows")]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::process(format!("Failed to start game server: {}", e)))?;

        let pid = child
            .id()
            .ok_or_else(|| AgentError::process("Failed to get process ID"))?;

        if let Some(stdout) = child.stdout.take() {
            let label = spec.label.clone();
            let mut reader = BufReader::new(stdout).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = reader.next_line().await {
                    log::info!("[{} stdout] {}", label, line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let label = spec.label.clone();
            let mut reader = BufReader::new(stderr).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = reader.next_line().await {
                    log::warn!("[{} stderr] {}", label, line);
                }
            });
        }

        let label = spec.label.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            log::info!("[{}] process {} exited: {:?}", label, pid, status);
        });

        let name = spec
            .program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(RunningProcess {
            pid,
            name,
            exe: Some(PathBuf::from(&spec.program)),
        })
    }

    async fn terminate(&self, process: &RunningProcess, grace: Duration) -> Result<()> {
        log::info!("Stopping process {} (pid: {})", process.name, process.pid);
        graceful_shutdown(process.pid, grace).await
    }
}
