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

//! Network namespace and Thread Border Router tasks.

use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;

use log::{info, warn};

use rs_matter_testing::linux::{
    ensure_network_namespace_availability, list_network_namespaces, remove_namespace_resources,
    BorderRouterConfig, Executor, IsolatedNetworkNamespace, LinuxNamespacedExecutor,
    NamespaceConfig, NetnsContext, NetnsNames, SubprocessInfo, SubprocessKind, SystemRunner,
    ThreadBorderRouter,
};

/// The tooling that is checked for presence in the command line
pub const REQUIRED_TOOLING: &[&str] = &["ip", "sh", "grep"];

/// The additional tooling needed by the `tbr` task
pub const TBR_TOOLING: &[&str] = &["otbr-agent", "ot-ctl", "ot-rcp"];

/// The Debian/Ubuntu-specific packages that need to be installed
const REQUIRED_PACKAGES: &[&str] = &["iproute2", "procps"];

pub struct NetnsTasks {
    config: NamespaceConfig,
    print_cmd_output: bool,
}

impl NetnsTasks {
    pub fn new(print_cmd_output: bool) -> Self {
        Self {
            config: NamespaceConfig::default(),
            print_cmd_output,
        }
    }

    pub fn print_tooling(&self) -> anyhow::Result<()> {
        let tooling = REQUIRED_TOOLING
            .iter()
            .chain(TBR_TOOLING)
            .copied()
            .collect::<Vec<_>>()
            .join(" ");

        warn!("Printing required system tools for namespace and border router tasks");
        info!("{tooling}");

        println!("{tooling}");

        Ok(())
    }

    pub fn print_packages(&self) -> anyhow::Result<()> {
        let packages = REQUIRED_PACKAGES.join(" ");

        warn!("Printing required Debian/Ubuntu system packages for namespace tasks");
        info!("{packages}");

        println!("{packages}");

        Ok(())
    }

    pub fn check(&self) -> anyhow::Result<()> {
        ensure_network_namespace_availability()?;

        for tool in REQUIRED_TOOLING {
            if which::which(tool).is_err() {
                anyhow::bail!("Required tool '{tool}' not found in $PATH");
            }
        }

        for tool in TBR_TOOLING {
            if which::which(tool).is_err() {
                warn!("Tool '{tool}' not found in $PATH; the `tbr` task will not work");
            }
        }

        info!("Network namespaces available");

        Ok(())
    }

    /// Create the namespace pair for `index` and leave it in place.
    pub fn up(&self, index: u32, links_down: bool) -> anyhow::Result<()> {
        ensure_network_namespace_availability()?;

        let config = NamespaceConfig {
            setup_app_link_up: !links_down,
            setup_tool_link_up: !links_down,
            ..self.config.clone()
        };

        let ctx = NetnsContext::with_base_index(index);
        let ns = IsolatedNetworkNamespace::create(&ctx, self.runner(), &config)
            .with_context(|| format!("Creating namespaces with index {index} failed"))?;

        let names = ns.persist();

        info!(
            "Namespaces {} and {} are up, bridged over {}",
            names.app_netns, names.tool_netns, names.bridge
        );

        Ok(())
    }

    /// Remove the namespace pair for `index`, whoever created it.
    pub fn down(&self, index: u32) -> anyhow::Result<()> {
        let names = self.names(index)?;
        let failures = remove_namespace_resources(self.runner(), &names);

        if failures > 0 {
            warn!("{failures} resource(s) of namespace index {index} could not be removed (already gone?)");
        } else {
            info!("Namespaces {} and {} removed", names.app_netns, names.tool_netns);
        }

        Ok(())
    }

    pub fn list(&self) -> anyhow::Result<()> {
        for netns in list_network_namespaces(self.runner())? {
            println!("{netns}");
        }

        Ok(())
    }

    /// Run `cmd` inside the app or tool namespace of `index`, with inherited stdio.
    pub fn exec(&self, index: u32, kind: SubprocessKind, cmd: &[String]) -> anyhow::Result<()> {
        let Some((program, args)) = cmd.split_first() else {
            anyhow::bail!("No command to execute");
        };

        let executor = LinuxNamespacedExecutor::from_names(self.names(index)?);
        let subproc = SubprocessInfo::new(kind, program).with_args(args.iter().cloned());

        let status = executor
            .spawn(&subproc, Stdio::inherit(), Stdio::inherit(), Stdio::inherit())?
            .wait()
            .with_context(|| format!("Failed to wait for {program}"))?;

        if !status.success() {
            anyhow::bail!("Command failed with status: {status}");
        }

        Ok(())
    }

    /// Run a Thread Border Router in the app namespace of `index` for `duration`.
    pub fn tbr(
        &self,
        index: u32,
        dataset: &str,
        node_id: u32,
        duration: Duration,
    ) -> anyhow::Result<()> {
        let config = BorderRouterConfig {
            node_id,
            ..Default::default()
        };

        let mut tbr = ThreadBorderRouter::new(dataset, self.names(index)?, self.runner(), config)
            .context("Starting the Thread Border Router failed")?;

        let port = tbr.border_agent_port()?;

        info!("Border Agent at {}:{port}", tbr.border_agent_host());
        println!("{}:{port}", tbr.border_agent_host());

        std::thread::sleep(duration);

        tbr.terminate()?;

        Ok(())
    }

    fn names(&self, index: u32) -> anyhow::Result<NetnsNames> {
        Ok(NetnsNames::new(index, &self.config)?)
    }

    fn runner(&self) -> SystemRunner {
        SystemRunner::new(self.print_cmd_output)
    }
}
