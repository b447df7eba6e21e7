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

//! Execution of the OS commands the harness relies on (`ip`, `ot-ctl`, shell pipelines).

use std::process::{Command, Stdio};
use std::sync::Arc;

use log::{debug, trace};

use crate::error::{Error, ErrorCode};

/// Runs external commands on behalf of the harness.
///
/// `SystemRunner` is the real thing; tests substitute recording fakes.
pub trait CommandRunner {
    /// Run `args` to completion, failing if the command exits with a non-zero status.
    fn run(&self, args: &[&str]) -> Result<(), Error> {
        self.output(args).map(|_| ())
    }

    /// Run `args` to completion and return its standard output.
    fn output(&self, args: &[&str]) -> Result<String, Error>;

    /// Run `script` with `sh -c`.
    fn shell(&self, script: &str) -> Result<(), Error> {
        self.run(&["sh", "-c", script])
    }
}

impl<T> CommandRunner for &T
where
    T: CommandRunner + ?Sized,
{
    fn run(&self, args: &[&str]) -> Result<(), Error> {
        (**self).run(args)
    }

    fn output(&self, args: &[&str]) -> Result<String, Error> {
        (**self).output(args)
    }
}

impl<T> CommandRunner for Arc<T>
where
    T: CommandRunner + ?Sized,
{
    fn run(&self, args: &[&str]) -> Result<(), Error> {
        (**self).run(args)
    }

    fn output(&self, args: &[&str]) -> Result<String, Error> {
        (**self).output(args)
    }
}

/// A `CommandRunner` spawning real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner {
    print_cmd_output: bool,
}

impl SystemRunner {
    pub const fn new(print_cmd_output: bool) -> Self {
        Self { print_cmd_output }
    }
}

impl CommandRunner for SystemRunner {
    fn output(&self, args: &[&str]) -> Result<String, Error> {
        let (program, rest) = args.split_first().ok_or_else(|| {
            Error::new_with_context(ErrorCode::InvalidArgument, "empty command line")
        })?;

        let mut cmd = Command::new(program);
        cmd.args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Running: {cmd:?}");

        let output = cmd
            .output()
            .map_err(|e| Error::from(e).with_context(format!("failed to execute {cmd:?}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if self.print_cmd_output {
            for line in stdout.lines().chain(stderr.lines()) {
                trace!("{line}");
            }
        }

        if !output.status.success() {
            return Err(Error::new_with_context(
                ErrorCode::CommandFailed,
                format!(
                    "`{}` failed with {}: {}",
                    args.join(" "),
                    output.status,
                    stderr.trim()
                ),
            ));
        }

        Ok(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_and_failure() {
        let runner = SystemRunner::default();

        assert_eq!(runner.output(&["echo", "Done"]).unwrap().trim(), "Done");

        let err = runner.shell("echo broken >&2; exit 3").unwrap_err();
        assert_eq!(err.code(), ErrorCode::CommandFailed);
        assert!(err.context().unwrap().contains("broken"));

        let err = runner.run(&[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }
}
