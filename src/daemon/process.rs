/// OS process helpers for the supervisor
///
/// Liveness probing and termination go through `kill(2)`; spawning detaches the
/// child into its own session so it outlives the CLI and ignores signals sent to
/// the CLI's process group.

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::{self, Pid},
};
use std::{
    fs::OpenOptions,
    io,
    net::TcpListener,
    os::unix::process::CommandExt,
    path::Path,
    process::{Child, Command, Stdio},
};

fn to_pid(pid: u32) -> Option<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
        _ => None,
    }
}

/// Whether `pid` names a live process we could signal
///
/// `EPERM` counts as dead: the daemon runs as the current user, so a PID owned by
/// someone else has been recycled.
pub fn is_alive(pid: u32) -> bool {
    match to_pid(pid) {
        Some(pid) => signal::kill(pid, None).is_ok(),
        None => false,
    }
}

/// Send `SIGTERM`; returns false when the process was already gone
pub fn terminate(pid: u32) -> bool {
    let Some(target) = to_pid(pid) else {
        return false;
    };
    match signal::kill(target, Signal::SIGTERM) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            tracing::warn!("Failed to signal pid {}: {}", pid, e);
            false
        }
    }
}

/// Ask the OS for a currently free loopback port
pub fn find_free_port() -> io::Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Spawn `program args...` in a new session with stdin closed
///
/// Output goes to `log` (appended) when given, otherwise it is discarded.
pub fn spawn_detached(program: &Path, args: &[String], log: Option<&Path>) -> io::Result<Child> {
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null());

    match log {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            command.stdout(file.try_clone()?).stderr(file);
        }
        None => {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
    }

    // SAFETY: setsid is async-signal-safe and touches no parent state
    unsafe {
        command.pre_exec(|| unistd::setsid().map(|_| ()).map_err(io::Error::from));
    }

    command.spawn()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn invalid_pids_are_not_alive() {
        assert!(!is_alive(0));
        assert!(!is_alive(u32::MAX));
        assert!(!is_alive(1 << 22));
    }

    #[test]
    fn free_port_is_nonzero() {
        assert!(find_free_port().unwrap() > 0);
    }

    #[test]
    fn terminated_process_is_reported_dead() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        assert!(is_alive(pid));

        assert!(terminate(pid));
        child.wait().unwrap();
        assert!(!is_alive(pid));
        assert!(!terminate(pid));
    }

    #[test]
    fn detached_child_runs_in_its_own_session() {
        let mut child = spawn_detached(Path::new("sleep"), &["30".to_string()], None).unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        let session = unistd::getsid(Some(pid)).unwrap();
        assert_eq!(session, pid);

        child.kill().unwrap();
        child.wait().unwrap();
    }
}
