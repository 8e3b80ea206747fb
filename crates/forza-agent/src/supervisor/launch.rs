//! Launch options and command construction for the workload.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use super::SupervisorError;
use crate::demux::ChannelKind;

/// Everything used to launch the workload.
///
/// `env` is a private copy of the agent's environment taken at spawn time.
/// Plugins edit it in `on_spawn_options`; the agent's own environment is never
/// touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub env: BTreeMap<OsString, OsString>,
    pub cwd: Option<PathBuf>,
}

impl LaunchOptions {
    /// Build options from a command line and a base environment.
    pub fn from_command_line<S, I, K, V>(command: &[S], env: I) -> Result<Self, SupervisorError>
    where
        S: AsRef<OsStr>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        let (program, args) = command.split_first().ok_or(SupervisorError::EmptyCommand)?;
        Ok(Self {
            program: program.as_ref().to_os_string(),
            args: args.iter().map(|a| a.as_ref().to_os_string()).collect(),
            env: env.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            cwd: None,
        })
    }

    pub fn set_env(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) {
        self.env.insert(key.into(), value.into());
    }

    pub fn remove_env(&mut self, key: impl AsRef<OsStr>) -> Option<OsString> {
        self.env.remove(key.as_ref())
    }

    pub fn env_var(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
        self.env.get(key.as_ref()).map(OsString::as_os_str)
    }

    /// Human-readable command line for logs.
    pub fn display_command(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Build the command: stdin inherited, stdout and stderr piped, and
    /// `ipc_writer` installed as fd 3 in the child.
    ///
    /// `ipc_writer` must stay open until the command has been spawned.
    pub(crate) fn command(&self, ipc_writer: &OwnedFd) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let writer_fd = ipc_writer.as_raw_fd();
        let ipc_fd = ChannelKind::Ipc.fd();
        // SAFETY: the closure runs in the forked child before exec and only
        // calls dup2(2) and fcntl(2), both async-signal-safe. `writer_fd` is
        // kept open by the caller for the duration of the spawn.
        #[allow(unsafe_code)]
        unsafe {
            cmd.pre_exec(move || {
                if writer_fd == ipc_fd {
                    let flags = libc::fcntl(ipc_fd, libc::F_GETFD);
                    if flags < 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    if libc::fcntl(ipc_fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                } else if libc::dup2(writer_fd, ipc_fd) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        cmd
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn splits_program_and_args() {
        let opts = LaunchOptions::from_command_line(
            &["sh", "-c", "echo hi"],
            [("PATH", "/usr/bin")],
        )
        .unwrap();
        assert_eq!(opts.program, "sh");
        assert_eq!(opts.args, vec![OsString::from("-c"), OsString::from("echo hi")]);
        assert_eq!(opts.env_var("PATH"), Some(OsStr::new("/usr/bin")));
        assert_eq!(opts.display_command(), "sh -c echo hi");
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = LaunchOptions::from_command_line::<&str, _, _, _>(
            &[],
            std::iter::empty::<(&str, &str)>(),
        )
        .unwrap_err();
        assert!(matches!(err, SupervisorError::EmptyCommand));
    }

    #[test]
    fn env_edits_stay_local() {
        let mut opts =
            LaunchOptions::from_command_line(&["true"], std::env::vars_os()).unwrap();
        opts.set_env("FORZA_LAUNCH_TEST_ONLY", "1");
        assert_eq!(opts.env_var("FORZA_LAUNCH_TEST_ONLY"), Some(OsStr::new("1")));
        assert!(std::env::var_os("FORZA_LAUNCH_TEST_ONLY").is_none());

        assert_eq!(opts.remove_env("FORZA_LAUNCH_TEST_ONLY"), Some("1".into()));
        assert!(opts.env_var("FORZA_LAUNCH_TEST_ONLY").is_none());
    }
}
