//! Remote-build orchestration.
//!
//! The latency win of the whole tool lives here: the local preprocess
//! subprocess runs on a worker thread while the calling thread connects to
//! the fleet and picks the least-loaded host. Only after both finish does
//! the preprocessed unit travel to the selected host, get compiled there,
//! and come back as an object file.

use std::process::Command;
use std::thread;

use tracing::{debug, info};

use swarm_common::args::ArgList;
use swarm_common::config::PREPROCESS_EXPECTED_STATUS;
use swarm_common::errors::{Result, SwarmError};
use swarm_common::hosts;
use swarm_common::ssh::{HostKeyPolicy, Session, SshOptions};

use crate::rewrite::{rewrite, Rewrite};

/// Drive one wrapped compiler invocation to completion. The returned value
/// is the wrapper's exit status: the bypassed command's status, the remote
/// compiler's status, or 0.
pub fn run(args: ArgList) -> Result<i32> {
    let local_host = hosts::local()?;

    let plan = match rewrite(args, &local_host)? {
        Rewrite::Bypass(rest) => {
            let command = rest.command();
            info!(command = %command.trim_end(), "bypassing, running locally");
            return run_shell(&command);
        }
        Rewrite::Remote(plan) => plan,
    };
    info!(
        source = %plan.remote_preprocessed,
        object = %plan.local_object,
        "dispatching compile step"
    );

    if let Some(parent) = std::path::Path::new(&plan.local_preprocessed).parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Preprocess locally while the fleet probe picks a host.
    let preprocess_command = plan.preprocess.command();
    let preprocess = thread::spawn(move || run_shell(&preprocess_command));

    let opts = SshOptions::from_env(HostKeyPolicy::Prompt)?;
    let selection = Session::connect_least_loaded(&hosts::fleet(), &opts);

    let status = preprocess
        .join()
        .map_err(|_| SwarmError::Config("preprocess thread panicked".into()))??;
    if status != PREPROCESS_EXPECTED_STATUS {
        return Err(SwarmError::Preprocess(status));
    }
    let session = selection?;
    debug!(host = session.hostname(), "preprocess and selection joined");

    session.copy_local_to_remote(&plan.local_preprocessed, &plan.remote_preprocessed)?;

    let status = session.execute(&plan.compile.command())?;
    if status != 0 {
        // The remote compiler's diagnostics already went to stderr; its
        // status is the wrapper's status, and there is no object to fetch.
        info!(host = session.hostname(), status, "remote compile failed");
        return Ok(status);
    }

    session.copy_remote_to_local(&plan.remote_object, &plan.local_object)?;
    info!(host = session.hostname(), object = %plan.local_object, "object retrieved");
    Ok(0)
}

/// Run a joined command line through the local shell and report its exit
/// status. Death by signal maps to the conventional 128+N.
pub fn run_shell(command: &str) -> Result<i32> {
    let status = Command::new("sh").arg("-c").arg(command).status()?;
    Ok(status.code().unwrap_or_else(|| {
        use std::os::unix::process::ExitStatusExt;
        128 + status.signal().unwrap_or(0)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(tokens: &[&str]) -> ArgList {
        let mut argv = vec!["swarm-cc".to_string()];
        argv.extend(tokens.iter().map(|t| t.to_string()));
        ArgList::from_argv(argv).expect("valid argv")
    }

    #[test]
    fn run_shell_reports_exit_status() {
        assert_eq!(run_shell("true").unwrap(), 0);
        assert_eq!(run_shell("false").unwrap(), 1);
        assert_eq!(run_shell("exit 42").unwrap(), 42);
    }

    #[test]
    fn bypass_runs_locally_without_touching_the_fleet() {
        // No source/object classification: the command runs through the
        // shell and its status comes straight back. No SSH is involved,
        // so this works with no fleet configured at all.
        assert_eq!(run(args(&["true"])).unwrap(), 0);
        assert_eq!(run(args(&["false"])).unwrap(), 1);
        assert_eq!(run(args(&["exit", "42"])).unwrap(), 42);
    }

    #[test]
    fn bypassed_command_side_effects_land() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("ran");
        let status = run(args(&["touch", &marker.to_string_lossy()])).unwrap();
        assert_eq!(status, 0);
        assert!(marker.exists());
    }
}
