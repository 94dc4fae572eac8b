//! Signal delivery to a child's process group.
//!
//! Children are spawned as leaders of their own process group so that
//! grandchildren (shells, tool subprocesses) are terminated with them.

use tokio::process::Child;

#[cfg(unix)]
fn signal_group(child: &Child, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        // ESRCH here means the group already exited.
        let _ = killpg(Pid::from_raw(pid as i32), signal);
    }
}

/// Ask the child to stop (SIGTERM to its group).
#[cfg(unix)]
pub(crate) fn request_termination(child: &mut Child) {
    signal_group(child, nix::sys::signal::Signal::SIGTERM);
}

/// Stop the child unconditionally (SIGKILL to its group).
#[cfg(unix)]
pub(crate) fn force_kill(child: &mut Child) {
    signal_group(child, nix::sys::signal::Signal::SIGKILL);
    let _ = child.start_kill();
}

#[cfg(not(unix))]
pub(crate) fn request_termination(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(not(unix))]
pub(crate) fn force_kill(child: &mut Child) {
    let _ = child.start_kill();
}

/// Exit code for a status that carries none (killed by a signal): 128 + signal.
#[cfg(unix)]
pub(crate) fn signal_exit_code(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|sig| 128 + sig)
}

#[cfg(not(unix))]
pub(crate) fn signal_exit_code(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
