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

//! Supervision of an OpenThread Border Router (`otbr-agent`) running inside the
//! app-side namespace of an `IsolatedNetworkNamespace`.
//!
//! Readiness is detected by watching the agent's log output for fixed lines:
//! `Co-processor version:` once the radio co-processor answered, and
//! `Sent RA on infra netif` once border routing is up. These are string contracts
//! with the external binary.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use regex::Regex;

use crate::error::{Error, ErrorCode};

use super::cmd::{CommandRunner, SystemRunner};
use super::executor::{Executor, LinuxNamespacedExecutor, SubprocessInfo, SubprocessKind};
use super::namespace::{NetnsNames, APP_IPV4_ADDR};

const COPROCESSOR_READY: &str = r"Co-processor version:";
const RA_SENT: &str = r"Sent RA on infra netif";

/// How many of the most recent output lines are kept for diagnostics.
const MAX_CAPTURED_LINES: usize = 200;

/// Configuration of a `ThreadBorderRouter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorderRouterConfig {
    /// The Thread radio simulation node ID; change it if it conflicts with other simulated nodes
    pub node_id: u32,
    pub agent: String,
    pub ot_ctl: String,
    pub coprocessor_timeout: Duration,
    pub router_advertisement_timeout: Duration,
}

impl Default for BorderRouterConfig {
    fn default() -> Self {
        Self {
            node_id: 9,
            agent: "otbr-agent".to_string(),
            ot_ctl: "ot-ctl".to_string(),
            coprocessor_timeout: Duration::from_secs(20),
            router_advertisement_timeout: Duration::from_secs(15),
        }
    }
}

impl BorderRouterConfig {
    fn radio_url(&self) -> String {
        format!(
            "spinel+hdlc+forkpty:///usr/bin/env?forkpty-arg=ot-rcp&forkpty-arg={}",
            self.node_id
        )
    }

    /// The `ot-ctl` pipeline forming a Thread network from `dataset` and waiting
    /// until the router is leader and border routing runs.
    fn join_script(&self, dataset: &str) -> String {
        let ot_ctl = &self.ot_ctl;

        [
            format!("{ot_ctl} dataset init tlvs {dataset}"),
            format!("{ot_ctl} dataset commit active"),
            format!("{ot_ctl} ifconfig up"),
            format!("{ot_ctl} routerselectionjitter 1"),
            format!("{ot_ctl} thread start"),
            format!("{ot_ctl} state leader"),
            format!("while ! {ot_ctl} state | grep -q leader; do sleep 1; done"),
            format!("{ot_ctl} netdata show"),
            format!("{ot_ctl} srp server enable"),
            format!("while ! {ot_ctl} br state | grep -q running; do sleep 1; done"),
            "echo TBR ready".to_string(),
        ]
        .join(" && ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderRouterState {
    Starting,
    WaitingCoprocessorReady,
    JoiningNetwork,
    WaitingRouterAdvertisement,
    Ready,
    Failed,
}

struct Output {
    pattern: Option<Regex>,
    matched: bool,
    expecting: bool,
    exited: bool,
    lines: VecDeque<String>,
}

/// The log lines of the agent, fed by the reader thread and watched by `expect`.
///
/// Only one pattern can be armed at a time.
struct LineWatcher {
    output: Mutex<Output>,
    condvar: Condvar,
}

impl LineWatcher {
    fn new() -> Self {
        Self {
            output: Mutex::new(Output {
                pattern: None,
                matched: true,
                expecting: false,
                exited: false,
                lines: VecDeque::new(),
            }),
            condvar: Condvar::new(),
        }
    }

    fn feed(&self, line: String) {
        let Ok(mut output) = self.output.lock() else {
            return;
        };

        if !output.matched {
            if let Some(pattern) = &output.pattern {
                if pattern.is_match(&line) {
                    debug!("Matched `{pattern}`");
                    output.matched = true;
                    self.condvar.notify_all();
                }
            }
        }

        if output.lines.len() == MAX_CAPTURED_LINES {
            output.lines.pop_front();
        }
        output.lines.push_back(line);
    }

    fn close(&self) {
        if let Ok(mut output) = self.output.lock() {
            output.exited = true;
            self.condvar.notify_all();
        }
    }

    /// Start watching for `pattern` in the lines arriving from now on.
    fn arm(&self, pattern: &str) -> Result<(), Error> {
        let pattern = Regex::new(pattern)?;
        let mut output = self.lock()?;

        if output.expecting {
            return Err(Error::new_with_context(
                ErrorCode::InvalidState,
                format!("cannot expect `{pattern}`: another expectation is outstanding"),
            ));
        }

        output.pattern = Some(pattern);
        output.matched = false;
        output.expecting = true;

        Ok(())
    }

    /// Wait for the armed pattern to show up.
    fn wait(&self, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now().checked_add(timeout);
        let mut output = self.lock()?;

        let result = loop {
            if output.matched {
                break Ok(());
            }

            let pattern = output
                .pattern
                .as_ref()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default();

            if output.exited {
                break Err(Error::new_with_context(
                    ErrorCode::ProcessExited,
                    format!(
                        "process exited while expecting `{pattern}`; output:\n{}",
                        Self::tail(&output)
                    ),
                ));
            }

            // No deadline when `timeout` overflows the clock
            let Some(deadline) = deadline else {
                output = self.condvar.wait(output)?;
                continue;
            };

            let now = Instant::now();
            if now >= deadline {
                break Err(Error::new_with_context(
                    ErrorCode::Timeout,
                    format!(
                        "failed to expect `{pattern}` within {:.1}s; output:\n{}",
                        timeout.as_secs_f32(),
                        Self::tail(&output)
                    ),
                ));
            }

            output = self.condvar.wait_timeout(output, deadline - now)?.0;
        };

        output.expecting = false;
        output.matched = true;

        result
    }

    fn disarm(&self) {
        if let Ok(mut output) = self.output.lock() {
            output.expecting = false;
            output.matched = true;
        }
    }

    fn captured(&self) -> Vec<String> {
        self.lock()
            .map(|output| output.lines.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn tail(output: &Output) -> String {
        output
            .lines
            .iter()
            .skip(output.lines.len().saturating_sub(20))
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn lock(&self) -> Result<MutexGuard<'_, Output>, Error> {
        Ok(self.output.lock()?)
    }
}

fn read_output<T>(stream: T, watcher: Arc<LineWatcher>)
where
    T: Read,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();

        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                info!("[otbr] {line}");
                watcher.feed(line);
            }
            Err(e) => {
                warn!("Failed to read border router output: {e}");
                break;
            }
        }
    }

    watcher.close();
}

/// A supervised Thread Border Router process.
///
/// The process is never restarted; if it dies, every subsequent `expect` fails
/// with `ErrorCode::ProcessExited`.
pub struct ThreadBorderRouter<R = SystemRunner>
where
    R: CommandRunner,
{
    names: NetnsNames,
    runner: R,
    config: BorderRouterConfig,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    watcher: Arc<LineWatcher>,
    state: BorderRouterState,
}

impl<R> ThreadBorderRouter<R>
where
    R: CommandRunner,
{
    /// Start `otbr-agent` in the app namespace and form (or join) the Thread network
    /// described by the hex-encoded operational `dataset`.
    pub fn new(
        dataset: &str,
        names: NetnsNames,
        runner: R,
        config: BorderRouterConfig,
    ) -> Result<Self, Error> {
        let mut tbr = Self::start(names, runner, config)?;

        tbr.join_network(dataset)?;

        Ok(tbr)
    }

    /// Start `otbr-agent` in the app namespace and wait for its radio co-processor.
    pub fn start(names: NetnsNames, runner: R, config: BorderRouterConfig) -> Result<Self, Error> {
        let agent = SubprocessInfo::new(SubprocessKind::App, &config.agent).with_args([
            "-d7".to_string(),
            "-v".to_string(),
            format!("-B{}", names.app_link),
            config.radio_url(),
        ]);

        let cmd = LinuxNamespacedExecutor::from_names(names.clone())
            .wrap(&agent)
            .to_command();

        Self::with_command(cmd, names, runner, config)
    }

    /// Start the border router from an explicit agent command line.
    pub fn with_command(
        mut cmd: Command,
        names: NetnsNames,
        runner: R,
        config: BorderRouterConfig,
    ) -> Result<Self, Error> {
        let watcher = Arc::new(LineWatcher::new());
        watcher.arm(COPROCESSOR_READY)?;

        // stdout and stderr share one pipe, drained by a single thread
        let (pipe_reader, pipe_writer) = std::io::pipe()?;
        cmd.stdin(Stdio::null())
            .stdout(pipe_writer.try_clone()?)
            .stderr(pipe_writer);

        info!("Starting Thread Border Router: {cmd:?}");

        let child = cmd
            .spawn()
            .map_err(|e| Error::from(e).with_context(format!("failed to spawn {cmd:?}")))?;

        // Close the write ends held by `cmd` so that the reader sees EOF on exit
        drop(cmd);

        let reader = {
            let watcher = watcher.clone();

            thread::Builder::new()
                .name("otbr-output".to_string())
                .spawn(move || read_output(pipe_reader, watcher))?
        };

        let mut tbr = Self {
            names,
            runner,
            config,
            child: Some(child),
            reader: Some(reader),
            watcher,
            state: BorderRouterState::Starting,
        };

        tbr.state = BorderRouterState::WaitingCoprocessorReady;

        let timeout = tbr.config.coprocessor_timeout;
        tbr.checked(|tbr| tbr.watcher.wait(timeout))?;

        info!("Thread Border Router co-processor ready");

        Ok(tbr)
    }

    /// Form the Thread network from `dataset` and wait until border routing is up.
    ///
    /// The `ot-ctl` pipeline runs as one shell call; a non-zero exit is fatal and
    /// not retried.
    pub fn join_network(&mut self, dataset: &str) -> Result<(), Error> {
        self.state = BorderRouterState::JoiningNetwork;

        info!("Joining Thread network");

        // Armed before the pipeline runs, so that an advertisement sent while
        // the pipeline is still polling is not missed
        self.checked(|tbr| tbr.watcher.arm(RA_SENT))?;

        let script = self.config.join_script(dataset);

        if let Err(e) = self.runner.shell(&script) {
            self.watcher.disarm();
            self.state = BorderRouterState::Failed;

            error!("Failed to control Thread Border Router: {e}");

            return Err(Error::new_with_context(
                ErrorCode::CommandFailed,
                format!(
                    "failed to control Thread Border Router: {e}; output:\n{}",
                    self.captured_output().join("\n")
                ),
            ));
        }

        self.state = BorderRouterState::WaitingRouterAdvertisement;

        let timeout = self.config.router_advertisement_timeout;
        self.checked(|tbr| tbr.watcher.wait(timeout))?;

        self.state = BorderRouterState::Ready;

        info!("Thread Border Router ready");

        Ok(())
    }

    /// Wait for a line matching `pattern` to be printed by the agent, considering only
    /// lines printed after this call.
    ///
    /// Only one `expect` may be outstanding at a time; a concurrent call fails with
    /// `ErrorCode::InvalidState`. Fails with `ErrorCode::Timeout` if no line matched
    /// in time, and with `ErrorCode::ProcessExited` if the agent exited first.
    pub fn expect(&self, pattern: &str, timeout: Duration) -> Result<(), Error> {
        self.watcher.arm(pattern)?;
        self.watcher.wait(timeout)
    }

    pub fn state(&self) -> BorderRouterState {
        self.state
    }

    /// The most recent output lines of the agent.
    pub fn captured_output(&self) -> Vec<String> {
        self.watcher.captured()
    }

    /// Query the UDP port of the Border Agent.
    pub fn border_agent_port(&self) -> Result<u16, Error> {
        let output = self.runner.output(&[
            "ip",
            "netns",
            "exec",
            &self.names.app_netns,
            &self.config.ot_ctl,
            "ba",
            "port",
        ])?;

        parse_border_agent_port(&output)
    }

    /// The address the Border Agent is reachable on.
    pub fn border_agent_host(&self) -> &'static str {
        APP_IPV4_ADDR
    }

    /// Terminate the agent and wait for it to exit.
    ///
    /// Safe to call in any state, and more than once. A router terminated before
    /// it became ready ends up `Failed`.
    pub fn terminate(&mut self) -> Result<(), Error> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if child.try_wait()?.is_none() {
            info!("Terminating Thread Border Router (pid {})", child.id());

            let pid = Pid::from_raw(child.id() as _);

            if let Err(e) = kill(pid, Signal::SIGTERM) {
                warn!("Failed to send SIGTERM to {pid}: {e}; killing");
                child.kill()?;
            }
        }

        let status = child.wait()?;
        debug!("Thread Border Router exited with {status}");

        if let Some(reader) = self.reader.take() {
            // The pipe may still be held open by processes forked off the agent
            if reader.is_finished() {
                let _ = reader.join();
            }
        }

        if self.state != BorderRouterState::Ready {
            self.state = BorderRouterState::Failed;
        }

        Ok(())
    }

    fn checked<F, T>(&mut self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Self) -> Result<T, Error>,
    {
        let result = f(self);

        if result.is_err() {
            self.state = BorderRouterState::Failed;
        }

        result
    }
}

impl<R> Drop for ThreadBorderRouter<R>
where
    R: CommandRunner,
{
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!("Failed to terminate Thread Border Router: {e}");
        }
    }
}

/// Parse the output of `ot-ctl ba port`: the port number followed by `Done`.
pub fn parse_border_agent_port(output: &str) -> Result<u16, Error> {
    let number = Regex::new(r"(\d+)")?;

    let port = number
        .captures(output)
        .and_then(|captures| captures.get(1))
        .ok_or_else(|| {
            Error::new_with_context(
                ErrorCode::InvalidData,
                format!("failed to parse border agent port from: {output:?}"),
            )
        })?;

    Ok(port.as_str().parse::<u16>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_border_agent_port() {
        assert_eq!(parse_border_agent_port("49154\r\nDone\r\n").unwrap(), 49154);

        let err = parse_border_agent_port("Done\n").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidData);

        let err = parse_border_agent_port("99999\nDone\n").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidData);
    }

    #[test]
    fn test_join_script() {
        let config = BorderRouterConfig::default();
        let script = config.join_script("0e08");

        assert!(script.starts_with("ot-ctl dataset init tlvs 0e08 && ot-ctl dataset commit active"));
        assert!(script.contains("while ! ot-ctl br state | grep -q running; do sleep 1; done"));
        assert!(script.ends_with("echo TBR ready"));
    }

    #[test]
    fn test_watcher_only_one_expectation() {
        let watcher = LineWatcher::new();

        watcher.arm("a").unwrap();
        assert_eq!(watcher.arm("b").unwrap_err().code(), ErrorCode::InvalidState);

        watcher.feed("xax".to_string());
        watcher.wait(Duration::ZERO).unwrap();

        // Lines seen before arming are not considered
        watcher.arm("xax").unwrap();
        let err = watcher.wait(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert!(err.context().unwrap().contains("xax"));

        watcher.arm("y").unwrap();
        watcher.close();
        let err = watcher.wait(Duration::from_secs(5)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProcessExited);
    }

    #[test]
    fn test_watcher_unbounded_wait() {
        let watcher = Arc::new(LineWatcher::new());

        watcher.arm("ready").unwrap();
        watcher.feed("ready".to_string());
        watcher.wait(Duration::MAX).unwrap();

        watcher.arm("later").unwrap();

        let feeder = {
            let watcher = watcher.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                watcher.feed("later".to_string());
            })
        };

        watcher.wait(Duration::MAX).unwrap();
        feeder.join().unwrap();

        watcher.arm("never").unwrap();
        watcher.close();
        let err = watcher.wait(Duration::MAX).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProcessExited);
    }
}
