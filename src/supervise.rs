//! Supervision of collector processes.
//!
//! Each collector runs as `sh -c <command>` in its own process group,
//! with stdout and stderr going to its log file. The supervisor polls the
//! group leaders until they all exit, a wall-clock timeout passes, or an
//! interrupt arrives. Stragglers are stopped with a two-stage escalation
//! described by [`CancellationPolicy`]: SIGTERM to the whole group, a grace
//! period, then SIGKILL.
//!
//! Group signals are delivered through the shell's `kill` builtin, so no
//! unsafe FFI is needed.

use std::fs::File;
use std::io;
use std::os::unix::process::CommandExt as _;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// CancellationPolicy
// ---------------------------------------------------------------------------

/// Poll interval and escalation timings for stopping collectors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CancellationPolicy {
    /// How often running processes are checked.
    pub poll_interval: Duration,
    /// Wait after SIGTERM before escalating to SIGKILL.
    pub grace: Duration,
    /// Wait after SIGKILL before reporting the group as stuck.
    pub kill_wait: Duration,
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            grace: Duration::from_secs(2),
            kill_wait: Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Supervised
// ---------------------------------------------------------------------------

/// A collector process and the name it is reported under.
#[derive(Debug)]
pub struct Supervised {
    pub name: String,
    child: Child,
}

impl Supervised {
    /// Process id of the group leader (equal to the process group id).
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// `true` while the process has not exited. Also reaps it once it has.
    pub fn is_running(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(e) => {
                warn!(collector = %self.name, error = %e, "cannot query process state");
                false
            }
        }
    }

    /// Exit status, if the process has exited.
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }
}

/// Start `command` under `sh` in a new process group, logging to `log_path`.
///
/// The log file (and its parent directories) is created, truncating any
/// previous content.
///
/// # Errors
/// Fails if the log file cannot be created or the shell cannot be spawned.
pub fn spawn_logged(name: &str, command: &str, log_path: &Path) -> io::Result<Supervised> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log = File::create(log_path)?;
    let log_err = log.try_clone()?;

    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .process_group(0)
        .spawn()?;

    info!(collector = %name, pid = child.id(), log = %log_path.display(), "collector started");
    Ok(Supervised {
        name: name.to_owned(),
        child,
    })
}

// ---------------------------------------------------------------------------
// Waiting
// ---------------------------------------------------------------------------

/// How a supervised batch ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every process exited on its own.
    Completed,
    /// The timeout passed; stragglers were terminated.
    TimedOut,
    /// An interrupt arrived; running processes were terminated.
    Interrupted,
}

/// Wait for every process in `procs`, enforcing `timeout` and honouring
/// `interrupted`.
///
/// Returns how the wait ended and the run duration. After a timeout the
/// duration is reported as exactly `timeout`.
pub fn wait_all(
    procs: &mut [Supervised],
    timeout: Duration,
    policy: &CancellationPolicy,
    interrupted: &AtomicBool,
) -> (WaitOutcome, Duration) {
    let start = Instant::now();
    loop {
        if procs.iter_mut().all(|p| !p.is_running()) {
            info!("all collectors completed within the time limit");
            return (WaitOutcome::Completed, start.elapsed());
        }
        if interrupted.load(Ordering::SeqCst) {
            warn!("interrupted; terminating running collectors");
            let elapsed = start.elapsed();
            terminate_all(procs, policy);
            return (WaitOutcome::Interrupted, elapsed);
        }
        if start.elapsed() > timeout {
            warn!(timeout_secs = timeout.as_secs(), "time limit exceeded; terminating running collectors");
            terminate_all(procs, policy);
            return (WaitOutcome::TimedOut, timeout);
        }
        thread::sleep(policy.poll_interval);
    }
}

fn terminate_all(procs: &mut [Supervised], policy: &CancellationPolicy) {
    for proc in procs.iter_mut() {
        if proc.is_running() {
            terminate(proc, policy);
        }
    }
}

// ---------------------------------------------------------------------------
// Termination
// ---------------------------------------------------------------------------

/// Stop a process group: SIGTERM, wait `grace`, SIGKILL, wait `kill_wait`.
///
/// If the group cannot be signalled, the direct child is killed instead.
/// Returns `true` if the process is no longer running.
pub fn terminate(proc: &mut Supervised, policy: &CancellationPolicy) -> bool {
    if !proc.is_running() {
        return true;
    }
    let pgid = proc.pid();

    info!(collector = %proc.name, pgid, "terminating process group");
    if let Err(e) = signal_group(pgid, "TERM") {
        warn!(collector = %proc.name, error = %e, "group signal failed; killing process directly");
        return kill_direct(proc, policy);
    }
    thread::sleep(policy.grace);
    if !proc.is_running() {
        info!(collector = %proc.name, pgid, "process group terminated");
        return true;
    }

    warn!(collector = %proc.name, pgid, "force killing process group");
    if let Err(e) = signal_group(pgid, "KILL") {
        warn!(collector = %proc.name, error = %e, "group kill failed; killing process directly");
        return kill_direct(proc, policy);
    }
    thread::sleep(policy.kill_wait);
    if proc.is_running() {
        warn!(collector = %proc.name, pgid, "process group may still be running");
        false
    } else {
        info!(collector = %proc.name, pgid, "process group killed");
        true
    }
}

fn kill_direct(proc: &mut Supervised, policy: &CancellationPolicy) -> bool {
    if let Err(e) = proc.child.kill() {
        debug!(collector = %proc.name, error = %e, "direct kill failed");
    }
    thread::sleep(policy.kill_wait);
    !proc.is_running()
}

/// Send `signal` (a name such as `TERM`) to every process in group `pgid`.
///
/// # Errors
/// Fails if `kill` cannot be run or reports failure (e.g. no such group).
pub fn signal_group(pgid: u32, signal: &str) -> io::Result<()> {
    let status = Command::new("sh")
        .arg("-c")
        .arg(format!("kill -s {signal} -- -{pgid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!(
            "kill -s {signal} -{pgid} exited with {status}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Interrupts
// ---------------------------------------------------------------------------

/// Install a Ctrl-C / SIGTERM handler that raises the returned flag.
///
/// If a handler is already installed, a warning is logged and the flag will
/// simply never be raised.
#[must_use]
pub fn interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    if let Err(e) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst)) {
        warn!(error = %e, "could not install interrupt handler");
    }
    flag
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_policy() -> CancellationPolicy {
        CancellationPolicy {
            poll_interval: Duration::from_millis(20),
            grace: Duration::from_millis(200),
            kill_wait: Duration::from_millis(200),
        }
    }

    #[test]
    fn completed_processes_write_their_logs() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("logs").join("echo.log");
        let mut procs = vec![spawn_logged("echo", "echo seeded", &log).unwrap()];

        let (outcome, _) = wait_all(
            &mut procs,
            Duration::from_secs(10),
            &quick_policy(),
            &AtomicBool::new(false),
        );

        assert_eq!(outcome, WaitOutcome::Completed);
        assert!(procs[0].exit_status().is_some_and(|s| s.success()));
        assert_eq!(std::fs::read_to_string(&log).unwrap().trim(), "seeded");
    }

    #[test]
    fn chained_commands_run_every_step() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("chain.log");
        let mut procs = vec![spawn_logged("chain", "echo first && echo second", &log).unwrap()];

        let (outcome, _) = wait_all(
            &mut procs,
            Duration::from_secs(10),
            &quick_policy(),
            &AtomicBool::new(false),
        );

        assert_eq!(outcome, WaitOutcome::Completed);
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn timeout_terminates_stragglers() {
        let dir = tempfile::tempdir().unwrap();
        let mut procs = vec![
            spawn_logged("fast", "true", &dir.path().join("fast.log")).unwrap(),
            spawn_logged("slow", "sleep 30", &dir.path().join("slow.log")).unwrap(),
        ];

        let timeout = Duration::from_millis(300);
        let (outcome, duration) =
            wait_all(&mut procs, timeout, &quick_policy(), &AtomicBool::new(false));

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(duration, timeout);
        assert!(procs.iter_mut().all(|p| !p.is_running()));
    }

    #[test]
    fn sigterm_ignoring_group_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let mut proc = spawn_logged(
            "stubborn",
            "sh -c 'trap \"\" TERM; sleep 30'",
            &dir.path().join("stubborn.log"),
        )
        .unwrap();
        // Give the inner shell time to install its trap.
        thread::sleep(Duration::from_millis(200));

        assert!(terminate(&mut proc, &quick_policy()));
        assert!(!proc.is_running());
    }

    #[test]
    fn raised_interrupt_stops_the_wait() {
        let dir = tempfile::tempdir().unwrap();
        let mut procs = vec![spawn_logged("slow", "sleep 30", &dir.path().join("slow.log")).unwrap()];

        let (outcome, duration) = wait_all(
            &mut procs,
            Duration::from_secs(60),
            &quick_policy(),
            &AtomicBool::new(true),
        );

        assert_eq!(outcome, WaitOutcome::Interrupted);
        assert!(duration < Duration::from_secs(60));
        assert!(!procs[0].is_running());
    }

    #[test]
    fn signalling_a_missing_group_fails() {
        // Process group ids are bounded by pid_max, which is far below this.
        assert!(signal_group(999_999_999, "TERM").is_err());
    }
}
