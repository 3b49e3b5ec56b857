//! Platform-agnostic process control functions.

use std::net::{Ipv4Addr, TcpListener, UdpSocket};
use std::time::Duration;

use tokio::time::Instant;

use super::EXIT_POLL_INTERVAL;
use crate::error::{AgentError, Result};

/// Check if a process is alive by PID.
#[cfg(target_os = "windows")]
pub fn is_process_alive(pid: u32) -> bool {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).is_some()
}

/// Check if a process is alive by PID.
#[cfg(not(target_os = "windows"))]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Ask the process to close its windows and exit.
#[cfg(target_os = "windows")]
fn graceful_signal(pid: u32) -> Result<()> {
    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T"])
        .status()
        .map_err(|e| AgentError::process(format!("Failed to run taskkill: {e}")))?;
    if status.success() {
        Ok(())
    } else {
        Err(AgentError::process(format!("taskkill refused pid {pid}")))
    }
}

/// Send a graceful shutdown signal to a process.
#[cfg(not(target_os = "windows"))]
fn graceful_signal(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| AgentError::process(format!("Failed to send SIGTERM to PID {}: {}", pid, e)))
}

#[cfg(target_os = "windows")]
pub fn force_kill(pid: u32) -> Result<()> {
    let output = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output()
        .map_err(|e| AgentError::process(format!("Failed to run taskkill: {e}")))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(AgentError::process(format!(
            "taskkill failed for pid {}: {}",
            pid,
            stderr.trim()
        )))
    }
}

/// Kill the process group the PID leads, falling back to the PID alone.
#[cfg(not(target_os = "windows"))]
pub fn force_kill(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::{getpgid, Pid};

    let target = Pid::from_raw(pid as i32);
    match getpgid(Some(target)) {
        Ok(pgid) if pgid == target => killpg(pgid, Signal::SIGKILL).map_err(|e| {
            AgentError::process(format!(
                "Failed to kill process group {} (from pid {}): {}",
                pgid.as_raw(),
                pid,
                e
            ))
        }),
        _ => kill(target, Signal::SIGKILL)
            .map_err(|e| AgentError::process(format!("Failed to kill process {}: {}", pid, e))),
    }
}

/// Signal the process, wait up to `grace` for it to exit, then force kill it.
pub async fn graceful_shutdown(pid: u32, grace: Duration) -> Result<()> {
    if !is_process_alive(pid) {
        return Ok(());
    }

    if let Err(e) = graceful_signal(pid) {
        log::warn!("Graceful signal failed for PID {pid}: {e}, force killing");
        return force_kill(pid);
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return Ok(());
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL.min(grace)).await;
    }

    if is_process_alive(pid) {
        log::warn!(
            "PID {pid} did not exit within {}s, force killing",
            grace.as_secs()
        );
        force_kill(pid)?;
    }
    Ok(())
}

/// A port counts as bound when something already holds it over TCP or UDP.
pub fn is_port_bound(port: u16) -> bool {
    if port == 0 {
        return false;
    }
    let tcp_taken = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_err();
    let udp_taken = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).is_err();
    tcp_taken || udp_taken
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, TcpListener, UdpSocket};

    use super::{is_port_bound, is_process_alive};

    #[test]
    fn detects_bound_tcp_and_udp_ports() {
        let tcp = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        assert!(is_port_bound(tcp.local_addr().unwrap().port()));

        let udp = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        assert!(is_port_bound(udp.local_addr().unwrap().port()));

        assert!(!is_port_bound(0));
    }

    #[test]
    fn current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }
}
