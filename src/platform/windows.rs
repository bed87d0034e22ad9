use std::ffi::c_void;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use windows_sys::Win32::Foundation::CloseHandle;
use windows_sys::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JobObjectExtendedLimitInformation,
    SetInformationJobObject, TerminateJobObject, JOBOBJECT_EXTENDED_LIMIT_INFORMATION,
    JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
};
use windows_sys::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, CREATE_NEW_PROCESS_GROUP,
    PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_SET_QUOTA, PROCESS_TERMINATE,
};

const STILL_ACTIVE: u32 = 259;

/// Job object owning a service process tree. Closing the last handle kills
/// the whole tree, so a supervisor that goes away cannot leak services.
pub struct ProcessGroupHandle {
    job: *mut c_void,
}

impl Drop for ProcessGroupHandle {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.job);
        }
    }
}

// SAFETY: job handles are kernel objects usable from any thread.
unsafe impl Send for ProcessGroupHandle {}
unsafe impl Sync for ProcessGroupHandle {}

pub fn configure_process_group(cmd: &mut Command) {
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

unsafe fn kill_on_close_job() -> Option<*mut c_void> {
    let job = CreateJobObjectW(std::ptr::null(), std::ptr::null());
    if job.is_null() {
        warn!("CreateJobObjectW failed");
        return None;
    }
    let mut limits: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = std::mem::zeroed();
    limits.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
    let ok = SetInformationJobObject(
        job,
        JobObjectExtendedLimitInformation,
        &limits as *const _ as *const c_void,
        std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
    );
    if ok == 0 {
        debug!("could not set kill-on-close on service job");
    }
    Some(job)
}

pub fn post_spawn_setup(child_pid: Option<u32>) -> Option<ProcessGroupHandle> {
    let pid = child_pid?;
    unsafe {
        let job = kill_on_close_job()?;
        let process = OpenProcess(PROCESS_SET_QUOTA | PROCESS_TERMINATE, 0, pid);
        if process.is_null() {
            warn!(pid, "OpenProcess failed, service tree will not be tracked");
            CloseHandle(job);
            return None;
        }
        let assigned = AssignProcessToJobObject(job, process);
        CloseHandle(process);
        if assigned == 0 {
            warn!(pid, "AssignProcessToJobObject failed");
            CloseHandle(job);
            return None;
        }
        Some(ProcessGroupHandle { job })
    }
}

pub async fn kill_tree(
    child: &mut tokio::process::Child,
    child_pid: Option<u32>,
    group_handle: Option<&ProcessGroupHandle>,
) {
    let terminated = group_handle
        .map(|handle| unsafe { TerminateJobObject(handle.job, 1) != 0 })
        .unwrap_or(false);
    if !terminated {
        debug!(pid = ?child_pid, "no service job to terminate, killing the root process");
        let _ = child.start_kill();
    }

    if tokio::time::timeout(Duration::from_secs(5), child.wait())
        .await
        .is_err()
    {
        warn!(pid = ?child_pid, "service process not reaped within 5s of termination");
    }
}

pub fn is_process_alive(pid: u32) -> bool {
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle.is_null() {
            return false;
        }
        let mut exit_code: u32 = 0;
        let queried = GetExitCodeProcess(handle, &mut exit_code);
        CloseHandle(handle);
        queried != 0 && exit_code == STILL_ACTIVE
    }
}

/// Owner of a listening TCP port, from `netstat -ano` and `tasklist`.
pub fn identify_port_owner(port: u16) -> Option<String> {
    let netstat = std::process::Command::new("netstat")
        .args(["-ano", "-p", "TCP"])
        .output()
        .ok()?;
    let pid = listening_pid(&String::from_utf8_lossy(&netstat.stdout), port)?;

    let image = std::process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/FO", "CSV", "/NH"])
        .output()
        .ok()
        .and_then(|out| {
            let text = String::from_utf8_lossy(&out.stdout).into_owned();
            text.split(',')
                .next()
                .map(|s| s.trim().trim_matches('"').to_string())
                .filter(|s| !s.is_empty() && !s.starts_with("INFO:"))
        });
    Some(match image {
        Some(image) => format!("{} (PID {})", image, pid),
        None => format!("PID {}", pid),
    })
}

/// PID of the LISTENING row for `port` in `netstat -ano` output.
fn listening_pid(netstat: &str, port: u16) -> Option<u32> {
    let suffix = format!(":{}", port);
    netstat.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [_, local, _, "LISTENING", pid] if local.ends_with(&suffix) => pid.parse().ok(),
            _ => None,
        }
    })
}
