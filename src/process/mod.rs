//! Process management: scoped external-command runs and OS-level control of game servers.

mod control;
mod runner;
mod system;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use control::{force_kill, graceful_shutdown, is_port_bound, is_process_alive};
pub use runner::{run_process, RunOutcome, RunRequest};
pub use system::SystemProcessControl;

/// How long a finished run may take to exit after its output is consumed.
const EXIT_GRACE: Duration = Duration::from_secs(30);

/// Poll period while waiting for a terminated process to disappear.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A process considered to be the running copy of a game server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningProcess {
    pub pid: u32,
    pub name: String,
    pub exe: Option<PathBuf>,
}

/// Everything needed to launch a game server executable.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Prefix used for the child's log lines.
    pub label: String,
}

/// OS process operations the lifecycle engine relies on.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Find the process named `process_name` whose executable lives under
    /// `install_dir`. Both comparisons are case-insensitive.
    async fn find_running(
        &self,
        process_name: &str,
        install_dir: &Path,
    ) -> Result<Option<RunningProcess>>;

    /// Launch a detached game server process.
    async fn spawn(&self, spec: &LaunchSpec) -> Result<RunningProcess>;

    /// Ask the process to exit, force killing it once `grace` elapses.
    async fn terminate(&self, process: &RunningProcess, grace: Duration) -> Result<()>;
}

/// Case-insensitive match of a process against a name and install directory.
pub(crate) fn matches_instance(
    candidate_name: &str,
    candidate_exe: Option<&Path>,
    process_name: &str,
    install_dir: &Path,
) -> bool {
    let wanted = strip_exe_suffix(process_name);
    let name_matches = strip_exe_suffix(candidate_name).eq_ignore_ascii_case(wanted)
        || candidate_exe
            .and_then(|exe| exe.file_name())
            .and_then(|n| n.to_str())
            .map(|n| strip_exe_suffix(n).eq_ignore_ascii_case(wanted))
            .unwrap_or(false);
    if !name_matches {
        return false;
    }

    let Some(exe) = candidate_exe else {
        return false;
    };
    let exe = exe.to_string_lossy().replace('\\', "/").to_lowercase();
    let dir = install_dir.to_string_lossy().replace('\\', "/").to_lowercase();
    let dir = dir.trim_end_matches('/');
    exe.starts_with(&format!("{dir}/"))
}

fn strip_exe_suffix(name: &str) -> &str {
    let lower_len = name.len().saturating_sub(4);
    match name.get(lower_len..) {
        Some(ext) if ext.eq_ignore_ascii_case(".exe") => &name[..lower_len],
        _ => name,
    }
}
