//! Subprocess execution for the handful of commands this daemon must run as
//! root: `mkfs`, `mount`, `umount`, `mkdir`, `rm`, `ln`, `udevadm`.
//!
//! Every other component that needs to touch the filesystem or device tree
//! goes through an `Executor` rather than shelling out directly, so tests can
//! substitute an in-memory recorder (see [`FakeExecutor`]) instead of
//! actually running commands as root.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{FuxiError, FuxiResult};

/// Output of a successful subprocess invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Wraps subprocess invocation, optionally as root via a configured
/// rootwrap/sudo prefix. No shell interpretation is ever performed: argv is
/// passed straight to `exec`.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, argv: &[&str], as_root: bool) -> FuxiResult<CommandOutput>;
}

/// Production executor. Prefixes `as_root` invocations with the configured
/// root-helper command, e.g. `sudo fuxi-rootwrap /etc/fuxi/rootwrap.conf`.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    root_helper: Vec<String>,
}

impl ProcessExecutor {
    pub fn new(root_helper: Vec<String>) -> Self {
        Self { root_helper }
    }

    fn build_argv<'a>(&'a self, argv: &[&'a str], as_root: bool) -> Vec<&'a str> {
        if !as_root {
            return argv.to_vec();
        }
        let mut full: Vec<&str> = self.root_helper.iter().map(String::as_str).collect();
        full.extend_from_slice(argv);
        full
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn run(&self, argv: &[&str], as_root: bool) -> FuxiResult<CommandOutput> {
        let full_argv = self.build_argv(argv, as_root);
        let (program, args) = full_argv
            .split_first()
            .ok_or_else(|| FuxiError::InvalidInput("empty command".to_string()))?;

        let command_str = full_argv.join(" ");
        log::debug!("Executing: {}", command_str);

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                FuxiError::Other(anyhow::anyhow!("failed to spawn {}: {}", command_str, e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            log::warn!("Command {} exited {}: {}", command_str, code, stderr.trim());
            return Err(FuxiError::Execution {
                argv: full_argv.iter().map(|s| s.to_string()).collect(),
                code,
                stderr,
            });
        }

        log::trace!("Command {} succeeded", command_str);
        Ok(CommandOutput { stdout, stderr })
    }
}

/// In-memory executor for tests. Records every invocation and returns canned
/// output keyed off the joined argv, falling back to a default response.
#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    pub struct FakeExecutor {
        pub calls: Mutex<Vec<(Vec<String>, bool)>>,
        responses: Mutex<std::collections::HashMap<String, FuxiResult<CommandOutput>>>,
    }

    impl FakeExecutor {
        pub fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                responses: Mutex::new(std::collections::HashMap::new()),
            }
        }

        /// Queue a canned response for a given argv (joined with spaces).
        pub fn on(&self, argv_prefix: &str, result: FuxiResult<CommandOutput>) {
            self.responses
                .lock()
                .unwrap()
                .insert(argv_prefix.to_string(), result);
        }

        pub fn calls(&self) -> Vec<(Vec<String>, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn run(&self, argv: &[&str], as_root: bool) -> FuxiResult<CommandOutput> {
            let owned: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
            self.calls.lock().unwrap().push((owned.clone(), as_root));
            let joined = owned.join(" ");
            let mut responses = self.responses.lock().unwrap();
            for (prefix, result) in responses.iter_mut() {
                if joined.starts_with(prefix.as_str()) {
                    return match result {
                        Ok(out) => Ok(out.clone()),
                        Err(e) => Err(clone_error(e)),
                    };
                }
            }
            Ok(CommandOutput::default())
        }
    }

    fn clone_error(e: &FuxiError) -> FuxiError {
        FuxiError::Other(anyhow::anyhow!("{}", e))
    }
}

#[cfg(test)]
mod test {
    use super::fake::FakeExecutor;
    use super::*;

    #[tokio::test]
    async fn records_calls_and_returns_default_output() {
        let exec = FakeExecutor::new();
        let out = exec.run(&["mount", "/dev/sdb", "/mnt"], true).await.unwrap();
        assert_eq!(out.stdout, "");
        let calls = exec.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, vec!["mount", "/dev/sdb", "/mnt"]);
        assert!(calls[0].1);
    }

    #[tokio::test]
    async fn canned_failure_is_returned() {
        let exec = FakeExecutor::new();
        exec.on(
            "mount",
            Err(FuxiError::Mount {
                device: "/dev/sdb".into(),
                mountpoint: "/mnt".into(),
                stderr: "bad fs".into(),
            }),
        );
        let err = exec.run(&["mount", "/dev/sdb", "/mnt"], true).await.unwrap_err();
        assert!(matches!(err, FuxiError::Mount { .. }));
    }

    #[test]
    fn root_helper_is_prefixed() {
        let exec = ProcessExecutor::new(vec!["sudo".into(), "fuxi-rootwrap".into()]);
        let argv = exec.build_argv(&["mount", "/dev/sdb", "/mnt"], true);
        assert_eq!(argv, vec!["sudo", "fuxi-rootwrap", "mount", "/dev/sdb", "/mnt"]);
        let argv = exec.build_argv(&["mount", "/dev/sdb", "/mnt"], false);
        assert_eq!(argv, vec!["mount", "/dev/sdb", "/mnt"]);
    }
}
