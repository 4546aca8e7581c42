//! System-service wrappers for the CLI surface.
//!
//! Install writes a systemd unit that re-runs this executable with
//! `--service`; start/stop delegate to `systemctl`. On hosts without
//! systemd these fail with the command error; foreground mode never
//! touches any of this.

use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;

pub const SERVICE_NAME: &str = "rendev";

const UNIT_PATH: &str = "/etc/systemd/system/rendev.service";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("systemctl {0} failed: {1}")]
    Systemctl(String, String),
}

fn exe_path() -> Result<PathBuf, ServiceError> {
    Ok(std::env::current_exe()?)
}

fn systemctl(args: &[&str]) -> Result<(), ServiceError> {
    let output = Command::new("systemctl").args(args).output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(ServiceError::Systemctl(
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

pub fn install() -> Result<(), ServiceError> {
    let exe = exe_path()?;
    let workdir = exe.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/"));
    let unit = format!(
        "[Unit]\n\
         Description=Rendev rendezvous frame router\n\
         After=network.target\n\
         \n\
         [Service]\n\
         ExecStart={} --service\n\
         WorkingDirectory={}\n\
         Restart=on-failure\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        exe.display(),
        workdir.display(),
    );
    std::fs::write(UNIT_PATH, unit)?;
    systemctl(&["daemon-reload"])?;
    systemctl(&["enable", SERVICE_NAME])
}

pub fn uninstall() -> Result<(), ServiceError> {
    systemctl(&["disable", "--now", SERVICE_NAME]).ok();
    std::fs::remove_file(UNIT_PATH)?;
    systemctl(&["daemon-reload"])
}

pub fn start() -> Result<(), ServiceError> {
    systemctl(&["start", SERVICE_NAME])
}

pub fn stop() -> Result<(), ServiceError> {
    systemctl(&["stop", SERVICE_NAME])
}
