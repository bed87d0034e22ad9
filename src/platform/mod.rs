use std::path::PathBuf;
use tokio::process::Command;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use unix as imp;
#[cfg(windows)]
use windows as imp;

pub use imp::ProcessGroupHandle;

/// Configure the command to run in a new process group.
/// Unix: `process_group(0)`, Windows: `CREATE_NEW_PROCESS_GROUP`
pub fn configure_process_group(cmd: &mut Command) {
    imp::configure_process_group(cmd)
}

/// Perform any post-spawn setup (e.g., Job Object on Windows).
/// Returns a handle that must be kept alive for the process lifetime.
pub fn post_spawn_setup(child_pid: Option<u32>) -> Option<ProcessGroupHandle> {
    imp::post_spawn_setup(child_pid)
}

/// Forcefully kill a child process and every process in its group, then reap it.
///
/// There is no graceful phase. Errors are logged and swallowed because the
/// process may already be gone.
pub async fn kill_tree(
    child: &mut tokio::process::Child,
    child_pid: Option<u32>,
    group_handle: Option<&ProcessGroupHandle>,
) {
    imp::kill_tree(child, child_pid, group_handle).await
}

/// Check if a process with the given PID is still alive.
pub fn is_process_alive(pid: u32) -> bool {
    imp::is_process_alive(pid)
}

/// Identify which process owns a given TCP port.
pub fn identify_port_owner(port: u16) -> Option<String> {
    imp::identify_port_owner(port)
}

/// Get the current user's home directory.
pub fn home_dir() -> Option<PathBuf> {
    dirs::home_dir()
}

#[cfg(test)]
pub mod test_commands {
    use tokio::process::Command;

    /// Plain non-login shell, fast enough for tests.
    #[cfg(unix)]
    pub fn shell(command: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
    #[cfg(windows)]
    pub fn shell(command: &str) -> Command {
        let mut cmd = Command::new("cmd.exe");
        cmd.arg("/C").arg(command);
        cmd
    }

    #[cfg(unix)]
    pub fn sleep_long() -> &'static str {
        "sleep 60"
    }
    #[cfg(windows)]
    pub fn sleep_long() -> &'static str {
        // `timeout` exits immediately when stdout is piped (non-interactive).
        "ping -n 61 127.0.0.1 > nul"
    }

    #[cfg(unix)]
    pub fn exit_failure() -> &'static str {
        "exit 3"
    }
    #[cfg(windows)]
    pub fn exit_failure() -> &'static str {
        "exit /b 3"
    }

    #[cfg(unix)]
    pub fn echo_both_streams() -> &'static str {
        "echo hello && echo oops >&2 && sleep 60"
    }
    #[cfg(windows)]
    pub fn echo_both_streams() -> &'static str {
        "echo hello&& echo oops>&2&& ping -n 61 127.0.0.1 > nul"
    }
}
