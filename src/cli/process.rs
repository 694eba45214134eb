use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::{bail, Context, Result};
use sysinfo::{get_current_pid, ProcessRefreshKind, ProcessesToUpdate, Signal, System, UpdateKind};
use tracing::{debug, info};

use crate::daemon::args::ConfigOverrides;

const AGENT_NAME: &str = "shiftwatch-agent";

/// The agent binary is shipped next to the cli.
pub fn to_agent_path(mut path: PathBuf) -> PathBuf {
    path.set_file_name(AGENT_NAME);
    #[cfg(windows)]
    {
        path.set_extension("exe");
    }
    path
}

pub fn agent_path() -> Result<PathBuf> {
    let current = std::env::current_exe().context("Can't operate without an executable")?;
    Ok(to_agent_path(current))
}

/// Terminates every process started from `name`. Returns how many were stopped.
pub fn kill_running_agents(name: &Path) -> Result<usize> {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_exe(UpdateKind::OnlyIfNotSet),
    );
    let current_id = get_current_pid().map_err(anyhow::Error::msg)?;
    let mut stopped = 0;
    for (pid, process) in system.processes().iter() {
        if *pid == current_id {
            continue;
        }

        if process
            .exe()
            .filter(|v| v.exists())
            .filter(|v| name == *v)
            .is_some()
        {
            debug!("Stopping agent {pid}");
            // This will forcefully terminate the process on Windows. Anything better will require a
            // lot more work.
            if process.kill_with(Signal::Term).is_none() {
                process.kill();
            }
            process.wait();
            stopped += 1;
        }
    }
    Ok(stopped)
}

pub fn agent_args(dir: Option<&Path>, overrides: &ConfigOverrides) -> Vec<OsString> {
    let mut args = vec![];
    if let Some(dir) = dir {
        args.push("--dir".into());
        args.push(dir.into());
    }
    if let Some(endpoint) = &overrides.endpoint {
        args.push("--endpoint".into());
        args.push(endpoint.into());
    }
    if let Some(identity) = &overrides.identity {
        args.push("--identity".into());
        args.push(identity.into());
    }
    args
}

/// Replaces a running agent with a new one. The agent detaches by itself, so this only waits
/// for the launcher to exit.
pub fn restart_agent(dir: Option<&Path>, overrides: &ConfigOverrides) -> Result<()> {
    let agent = agent_path()?;
    let stopped = kill_running_agents(&agent)?;
    if stopped > 0 {
        info!("Stopped {stopped} running agents");
    }

    let mut command = std::process::Command::new(&agent);
    command.args(agent_args(dir, overrides));
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());

    let status = command
        .status()
        .with_context(|| format!("Failed to launch {agent:?}"))?;
    if !status.success() {
        bail!("Agent launcher exited with {status}");
    }
    Ok(())
}
