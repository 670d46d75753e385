//! Process tree termination used by the executor's timeout and cancellation paths.
//!
//! On Unix every child is spawned as the leader of its own process group, so one `killpg`
//! reaches the whole tree. Descendants that moved to another group (via `setsid`) are found by
//! walking the process table before the group is signalled; afterwards they are reparented and
//! the parent links are gone.

#[cfg(unix)]
use nix::sys::signal::{kill, killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

#[derive(Debug, Clone, Default)]
pub struct KillReport {
    pub pid: u32,
    pub group_signalled: bool,
    pub descendants_killed: Vec<u32>,
}

/// Kills the process group led by `pid` plus every descendant of `pid` that left the group.
pub fn kill_process_tree(pid: u32) -> KillReport {
    let descendants = collect_descendants(pid);
    let group_signalled = signal_group(pid);

    let mut descendants_killed = Vec::new();
    for child in descendants {
        if kill_single(child) {
            descendants_killed.push(child);
        }
    }

    tracing::debug!(
        pid,
        group_signalled,
        descendants = descendants_killed.len(),
        "killed process tree"
    );

    KillReport {
        pid,
        group_signalled,
        descendants_killed,
    }
}

/// Signals only the process group `pgid`, with no process-table walk.
///
/// This is the only kill that is valid once the group leader has been reaped: the leader's pid
/// may be reused by then, but a group id stays reserved while any member is alive.
pub fn kill_process_group(pgid: u32) -> bool {
    let signalled = signal_group(pgid);
    tracing::debug!(pgid, signalled, "signalled process group");
    signalled
}

#[cfg(unix)]
fn signal_group(pid: u32) -> bool {
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => true,
        Err(errno) => {
            tracing::debug!(pid, %errno, "killpg failed");
            false
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32) -> bool {
    // No process groups here; the caller kills the direct child through its handle.
    false
}

#[cfg(unix)]
fn kill_single(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), Signal::SIGKILL).is_ok()
}

#[cfg(all(not(unix), feature = "process-tree"))]
fn kill_single(pid: u32) -> bool {
    use sysinfo::{Pid as SPid, System};
    let mut sys = System::new();
    sys.refresh_processes();
    sys.process(SPid::from_u32(pid))
        .map(|p| p.kill())
        .unwrap_or(false)
}

#[cfg(all(not(unix), not(feature = "process-tree")))]
fn kill_single(_pid: u32) -> bool {
    false
}

/// Descendants of `root`, deepest first.
fn collect_descendants(root: u32) -> Vec<u32> {
    #[cfg(feature = "process-tree")]
    {
        use sysinfo::{Pid as SPid, System};

        let mut sys = System::new();
        sys.refresh_processes();

        let mut found = vec![SPid::from_u32(root)];
        let mut idx = 0;
        while idx < found.len() {
            let cur = found[idx];
            for (pid, proc_) in sys.processes() {
                if proc_.parent() == Some(cur) && !found.contains(pid) {
                    found.push(*pid);
                }
            }
            idx += 1;
        }

        found
            .into_iter()
            .skip(1)
            .rev()
            .map(|p| p.as_u32())
            .collect()
    }
    #[cfg(not(feature = "process-tree"))]
    {
        let _ = root;
        Vec::new()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn killing_a_missing_group_reports_failure() {
        // pid 0x7fff_fff0 is far above any default pid_max
        let report = kill_process_tree(0x7fff_fff0);
        assert!(!report.group_signalled);
        assert!(report.descendants_killed.is_empty());
        assert!(!kill_process_group(0x7fff_fff0));
    }

    #[test]
    fn group_kill_reaches_members() {
        use std::os::unix::process::{CommandExt, ExitStatusExt};

        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        assert!(kill_process_group(child.id()));
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGKILL as i32));
    }
}
