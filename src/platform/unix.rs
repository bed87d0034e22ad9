use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;

/// Unused on Unix, where the group is killed with killpg on the child PID.
pub struct ProcessGroupHandle;

pub fn configure_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

pub fn post_spawn_setup(_child_pid: Option<u32>) -> Option<ProcessGroupHandle> {
    // On Unix, process group is configured before spawn via process_group(0).
    None
}

pub async fn kill_tree(
    child: &mut tokio::process::Child,
    child_pid: Option<u32>,
    _group_handle: Option<&ProcessGroupHandle>,
) {
    match child_pid {
        Some(pid) => match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => debug!(pid, "sent SIGKILL to process group"),
            Err(nix::errno::Errno::ESRCH) => debug!(pid, "process group already exited"),
            Err(e) => {
                warn!(pid, error = %e, "killpg(SIGKILL) failed, falling back to kill");
                let _ = child.start_kill();
            }
        },
        None => {
            let _ = child.start_kill();
        }
    }

    if tokio::time::timeout(Duration::from_secs(5), child.wait())
        .await
        .is_err()
    {
        warn!(pid = ?child_pid, "child not reaped within 5s of SIGKILL");
    }
}

pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(target_os = "linux")]
pub fn identify_port_owner(port: u16) -> Option<String> {
    let port_hex = format!("{:04X}", port);
    let inode = ["/proc/net/tcp", "/proc/net/tcp6"]
        .iter()
        .find_map(|table| listening_inode(table, &port_hex))?;
    let pid = pid_holding_socket(&inode)?;
    Some(describe_pid(&pid))
}

/// Socket inode of the LISTEN entry for `port_hex` in a `/proc/net/tcp*` table.
#[cfg(target_os = "linux")]
fn listening_inode(table: &str, port_hex: &str) -> Option<String> {
    const TCP_LISTEN: &str = "0A";

    let content = std::fs::read_to_string(table).ok()?;
    content.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 || fields[3] != TCP_LISTEN {
            return None;
        }
        let local_port = fields[1].rsplit(':').next()?;
        (local_port == port_hex && fields[9] != "0").then(|| fields[9].to_string())
    })
}

#[cfg(target_os = "linux")]
fn pid_holding_socket(inode: &str) -> Option<String> {
    let needle = format!("socket:[{}]", inode);
    let proc_dir = std::fs::read_dir("/proc").ok()?;
    for entry in proc_dir.flatten() {
        let pid = entry.file_name().to_string_lossy().to_string();
        if !pid.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let Ok(fds) = std::fs::read_dir(format!("/proc/{}/fd", pid)) else {
            continue;
        };
        let holds = fds.flatten().any(|fd| {
            std::fs::read_link(fd.path())
                .map(|link| link.to_string_lossy() == needle)
                .unwrap_or(false)
        });
        if holds {
            return Some(pid);
        }
    }
    None
}

#[cfg(target_os = "linux")]
fn describe_pid(pid: &str) -> String {
    let cmd = std::fs::read_to_string(format!("/proc/{}/cmdline", pid))
        .map(|raw| raw.replace('\0', " ").trim().to_string())
        .unwrap_or_default();
    if cmd.is_empty() {
        format!("PID {}", pid)
    } else if cmd.chars().count() > 60 {
        let head: String = cmd.chars().take(57).collect();
        format!("{}... (PID {})", head, pid)
    } else {
        format!("{} (PID {})", cmd, pid)
    }
}

#[cfg(not(target_os = "linux"))]
pub fn identify_port_owner(_port: u16) -> Option<String> {
    None
}
