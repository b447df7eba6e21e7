/*
 *
 *    Copyright (c) 2020-2022 Project CHIP Authors
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! Launching test subprocesses, optionally relocated into a network namespace.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use log::debug;

use crate::error::Error;

use super::cmd::CommandRunner;
use super::namespace::{IsolatedNetworkNamespace, NetnsNames};

/// The role of a subprocess in a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubprocessKind {
    /// The application under test (or a simulated accessory)
    App,
    /// A controller tool driving the application
    Tool,
}

/// A subprocess to be launched: its role, program and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubprocessInfo {
    pub kind: SubprocessKind,
    pub path: PathBuf,
    pub args: Vec<String>,
}

impl SubprocessInfo {
    pub fn new(kind: SubprocessKind, path: impl AsRef<Path>) -> Self {
        Self {
            kind,
            path: path.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Return a copy of this subprocess run through `wrapper`.
    ///
    /// The first element of `wrapper` becomes the program; the rest of it, followed by
    /// the original program and arguments, become the arguments.
    pub fn wrap_with(&self, wrapper: &[&str]) -> Self {
        let Some((program, wrapper_args)) = wrapper.split_first() else {
            return self.clone();
        };

        let args = wrapper_args
            .iter()
            .map(ToString::to_string)
            .chain(core::iter::once(self.path.to_string_lossy().into_owned()))
            .chain(self.args.iter().cloned())
            .collect();

        Self {
            kind: self.kind,
            path: PathBuf::from(program),
            args,
        }
    }

    /// The full command line, program first.
    pub fn command_line(&self) -> Vec<String> {
        core::iter::once(self.path.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect()
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.args(&self.args);
        cmd
    }
}

/// Launches subprocesses on behalf of the tests.
pub trait Executor {
    /// Adjust the subprocess before it is launched. The default is the identity.
    fn wrap(&self, subproc: &SubprocessInfo) -> SubprocessInfo {
        subproc.clone()
    }

    /// Spawn the (wrapped) subprocess with the given standard streams.
    fn spawn(
        &self,
        subproc: &SubprocessInfo,
        stdin: Stdio,
        stdout: Stdio,
        stderr: Stdio,
    ) -> Result<Child, Error> {
        let wrapped = self.wrap(subproc);

        let mut cmd = wrapped.to_command();
        cmd.stdin(stdin).stdout(stdout).stderr(stderr);

        debug!("Spawning {:?} subprocess: {cmd:?}", subproc.kind);

        cmd.spawn().map_err(|e| {
            Error::from(e).with_context(format!("failed to spawn {}", wrapped.path.display()))
        })
    }

    /// Run the (wrapped) subprocess to completion through `runner`, returning its output.
    fn output<R>(&self, runner: R, subproc: &SubprocessInfo) -> Result<String, Error>
    where
        R: CommandRunner,
        Self: Sized,
    {
        let cmdline = self.wrap(subproc).command_line();
        let args = cmdline.iter().map(String::as_str).collect::<Vec<_>>();

        runner.output(&args)
    }
}

/// Runs subprocesses in the current network namespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {}

/// Runs subprocesses inside the namespace matching their kind, by prefixing them
/// with `ip netns exec <namespace>`.
#[derive(Debug, Clone)]
pub struct LinuxNamespacedExecutor {
    names: NetnsNames,
}

impl LinuxNamespacedExecutor {
    pub fn new<R>(ns: &IsolatedNetworkNamespace<R>) -> Self
    where
        R: CommandRunner,
    {
        Self::from_names(ns.names().clone())
    }

    pub const fn from_names(names: NetnsNames) -> Self {
        Self { names }
    }
}

impl Executor for LinuxNamespacedExecutor {
    fn wrap(&self, subproc: &SubprocessInfo) -> SubprocessInfo {
        subproc.wrap_with(&[
            "ip",
            "netns",
            "exec",
            self.names.netns_for_subprocess_kind(subproc.kind),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::linux::namespace::NamespaceConfig;

    #[test]
    fn test_wrap_with() {
        let subproc = SubprocessInfo::new(SubprocessKind::App, "/usr/bin/chip-lighting-app")
            .with_args(["--discriminator", "3840"]);

        let wrapped = subproc.wrap_with(&["sudo", "-E"]);
        assert_eq!(
            wrapped.command_line(),
            ["sudo", "-E", "/usr/bin/chip-lighting-app", "--discriminator", "3840"]
        );
        assert_eq!(wrapped.kind, SubprocessKind::App);

        assert_eq!(subproc.wrap_with(&[]), subproc);
    }

    #[test]
    fn test_namespaced_executor() {
        let names = NetnsNames::new(2, &NamespaceConfig::default()).unwrap();
        let executor = LinuxNamespacedExecutor::from_names(names);

        let app = SubprocessInfo::new(SubprocessKind::App, "chip-all-clusters-app");
        let tool = SubprocessInfo::new(SubprocessKind::Tool, "chip-tool").with_args(["pairing"]);

        assert_eq!(
            executor.wrap(&app).command_line(),
            ["ip", "netns", "exec", "app-2", "chip-all-clusters-app"]
        );
        assert_eq!(
            executor.wrap(&tool).command_line(),
            ["ip", "netns", "exec", "tool-2", "chip-tool", "pairing"]
        );
        assert_eq!(DirectExecutor.wrap(&tool), tool);
    }
}
