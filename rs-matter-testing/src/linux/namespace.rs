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

//! Isolated network namespaces for running simulated Matter nodes side by side.
//!
//! Each `IsolatedNetworkNamespace` consists of:
//! - two namespaces, `app-<i>` (the DUT side) and `tool-<i>` (the controller side);
//! - a veth pair per namespace (`eth-app-<i>` / `eth-tool-<i>`) whose host-side
//!   peers (`...-sw`) are enslaved to one bridge `br1-<i>`;
//! - fixed IPv4 and ULA IPv6 addresses on both sides.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::error::{Error, ErrorCode};

use super::cmd::{CommandRunner, SystemRunner};
use super::executor::SubprocessKind;

/// The IPv4 address of the app side of every namespace.
pub const APP_IPV4_ADDR: &str = "10.10.10.1";
/// The IPv4 address of the tool side of every namespace.
pub const TOOL_IPV4_ADDR: &str = "10.10.10.2";
pub const APP_IPV6_ADDR: &str = "fd00:0:1:1::3";
pub const TOOL_IPV6_ADDR: &str = "fd00:0:1:1::2";

/// Linux limits interface names to `IFNAMSIZ - 1` bytes.
const MAX_IFNAME_LEN: usize = 15;

const SWITCH_SUFFIX: &str = "-sw";

/// Fail fast if this process cannot create network namespaces.
///
/// Requires kernel support, the `ip` tool from `iproute2`, and an effective
/// user ID of root - either real root, or root mapped inside a user namespace
/// (e.g. when re-executed under `unshare --map-root-user -n -m`).
pub fn ensure_network_namespace_availability() -> Result<(), Error> {
    if !Path::new("/proc/self/ns/net").exists() {
        return Err(Error::new_with_context(
            ErrorCode::NamespaceUnavailable,
            "the kernel does not expose network namespaces (/proc/self/ns/net missing)",
        ));
    }

    if which::which("ip").is_err() {
        return Err(Error::new_with_context(
            ErrorCode::NamespaceUnavailable,
            "required tool `ip` (iproute2) not found in $PATH",
        ));
    }

    if !nix::unistd::geteuid().is_root() {
        return Err(Error::new_with_context(
            ErrorCode::NamespaceUnavailable,
            "creating network namespaces requires root; run as root or under `unshare --map-root-user -n -m`",
        ));
    }

    if nix::unistd::getuid().is_root() {
        warn!("Running as root: network namespaces will be created in the host namespace set");
    }

    Ok(())
}

/// List the names of the network namespaces known to `ip netns`.
pub fn list_network_namespaces<R>(runner: R) -> Result<Vec<String>, Error>
where
    R: CommandRunner,
{
    let output = runner.output(&["ip", "netns", "list"])?;

    Ok(output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(ToString::to_string)
        .collect())
}

/// Allocates namespace indices for all harnesses of one test run.
///
/// Indices are unique among the namespaces alive in this context and are
/// returned to the pool when a namespace is destroyed.
#[derive(Debug, Default)]
pub struct NetnsContext {
    base_index: u32,
    allocated: Mutex<BTreeSet<u32>>,
}

impl NetnsContext {
    pub fn new() -> Arc<Self> {
        Self::with_base_index(0)
    }

    /// Create a context allocating indices from `base_index` upwards, e.g. to keep
    /// apart test processes running in parallel on the same host.
    pub fn with_base_index(base_index: u32) -> Arc<Self> {
        Arc::new(Self {
            base_index,
            allocated: Mutex::new(BTreeSet::new()),
        })
    }

    /// Reserve the lowest free index.
    pub fn allocate(&self) -> Result<u32, Error> {
        let mut allocated = self.allocated.lock()?;

        let index = (self.base_index..=u32::MAX)
            .find(|index| !allocated.contains(index))
            .ok_or_else(|| Error::new_with_context(ErrorCode::InvalidState, "no free index"))?;

        allocated.insert(index);

        Ok(index)
    }

    pub fn release(&self, index: u32) {
        if let Ok(mut allocated) = self.allocated.lock() {
            allocated.remove(&index);
        }
    }

    pub fn allocated(&self) -> Vec<u32> {
        self.allocated
            .lock()
            .map(|allocated| allocated.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Configuration of an `IsolatedNetworkNamespace`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceConfig {
    /// Base name of the app-side link; the index is appended
    pub app_link_name: String,
    /// Base name of the tool-side link; the index is appended
    pub tool_link_name: String,
    /// Bring the app-side link up on creation
    pub setup_app_link_up: bool,
    /// Bring the tool-side link up on creation
    pub setup_tool_link_up: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            app_link_name: "eth-app".to_string(),
            tool_link_name: "eth-tool".to_string(),
            setup_app_link_up: true,
            setup_tool_link_up: true,
        }
    }
}

/// The names derived from a namespace index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetnsNames {
    pub index: u32,
    pub app_netns: String,
    pub tool_netns: String,
    pub app_link: String,
    pub tool_link: String,
    pub bridge: String,
}

impl NetnsNames {
    pub fn new(index: u32, config: &NamespaceConfig) -> Result<Self, Error> {
        let names = Self {
            index,
            app_netns: format!("app-{index}"),
            tool_netns: format!("tool-{index}"),
            app_link: format!("{}-{index}", config.app_link_name),
            tool_link: format!("{}-{index}", config.tool_link_name),
            bridge: format!("br1-{index}"),
        };

        for ifname in [
            names.app_switch_link(),
            names.tool_switch_link(),
            names.bridge.clone(),
        ] {
            if ifname.len() > MAX_IFNAME_LEN {
                return Err(Error::new_with_context(
                    ErrorCode::InvalidArgument,
                    format!("interface name `{ifname}` exceeds {MAX_IFNAME_LEN} characters"),
                ));
            }
        }

        Ok(names)
    }

    /// The host-side peer of the app link
    pub fn app_switch_link(&self) -> String {
        format!("{}{SWITCH_SUFFIX}", self.app_link)
    }

    /// The host-side peer of the tool link
    pub fn tool_switch_link(&self) -> String {
        format!("{}{SWITCH_SUFFIX}", self.tool_link)
    }

    /// The namespace processes of the given kind have to run in.
    pub fn netns_for_subprocess_kind(&self, kind: SubprocessKind) -> &str {
        match kind {
            SubprocessKind::App => &self.app_netns,
            SubprocessKind::Tool => &self.tool_netns,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceState {
    /// Some, but not all resources exist
    Created,
    /// Fully set up
    Active,
    TornDown,
}

/// An OS resource created by the harness which teardown has to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resource {
    Netns(String),
    /// A veth pair, removed through its host-side end
    Veth(String),
    Bridge(String),
}

impl Resource {
    /// All resources of a fully set up namespace pair, in creation order.
    fn all(names: &NetnsNames) -> Vec<Self> {
        vec![
            Self::Netns(names.app_netns.clone()),
            Self::Netns(names.tool_netns.clone()),
            Self::Veth(names.app_switch_link()),
            Self::Veth(names.tool_switch_link()),
            Self::Bridge(names.bridge.clone()),
        ]
    }

    fn remove<R>(&self, runner: &R) -> Result<(), Error>
    where
        R: CommandRunner,
    {
        match self {
            Self::Bridge(bridge) => {
                let _ = runner.run(&["ip", "link", "set", bridge, "down"]);
                runner.run(&["ip", "link", "delete", bridge])
            }
            Self::Veth(switch) => runner.run(&["ip", "link", "delete", switch]),
            Self::Netns(netns) => runner.run(&["ip", "netns", "del", netns]),
        }
    }
}

/// Remove the namespaces and links named by `names`, e.g. after a crashed run
/// or a `persist`ed namespace pair.
///
/// Best effort: returns how many of the resources could not be removed.
pub fn remove_namespace_resources<R>(runner: R, names: &NetnsNames) -> usize
where
    R: CommandRunner,
{
    Resource::all(names)
        .iter()
        .rev()
        .filter(|resource| match resource.remove(&runner) {
            Ok(()) => false,
            Err(e) => {
                debug!("Failed to remove {resource:?}: {e}");
                true
            }
        })
        .count()
}

/// A pair of isolated network namespaces connected over a bridge.
pub struct IsolatedNetworkNamespace<R = SystemRunner>
where
    R: CommandRunner,
{
    ctx: Arc<NetnsContext>,
    runner: R,
    names: NetnsNames,
    state: NamespaceState,
    resources: Vec<Resource>,
}

impl IsolatedNetworkNamespace<SystemRunner> {
    /// Create a namespace pair with the default configuration and real `ip` commands.
    pub fn create_default(ctx: &Arc<NetnsContext>) -> Result<Self, Error> {
        Self::create(ctx, SystemRunner::default(), &NamespaceConfig::default())
    }
}

impl<R> IsolatedNetworkNamespace<R>
where
    R: CommandRunner,
{
    /// Allocate an index from `ctx` and set up the namespaces.
    ///
    /// If any step fails, whatever had been created is torn down again and the
    /// index is released before the error is returned.
    pub fn create(ctx: &Arc<NetnsContext>, runner: R, config: &NamespaceConfig) -> Result<Self, Error> {
        let index = ctx.allocate()?;

        let names = match NetnsNames::new(index, config) {
            Ok(names) => names,
            Err(e) => {
                ctx.release(index);
                return Err(e);
            }
        };

        let mut ns = Self {
            ctx: ctx.clone(),
            runner,
            names,
            state: NamespaceState::Created,
            resources: Vec::new(),
        };

        info!(
            "Creating isolated network namespaces {} and {}",
            ns.names.app_netns, ns.names.tool_netns
        );

        if let Err(e) = ns.setup(config) {
            warn!("Failed to set up namespace index {index}: {e}");

            ns.destroy();

            return Err(e.with_context(format!("creating namespace index {index}")));
        }

        ns.state = NamespaceState::Active;

        Ok(ns)
    }

    fn setup(&mut self, config: &NamespaceConfig) -> Result<(), Error> {
        let n = self.names.clone();
        let app_sw = n.app_switch_link();
        let tool_sw = n.tool_switch_link();

        for netns in [&n.app_netns, &n.tool_netns] {
            self.runner.run(&["ip", "netns", "add", netns])?;
            self.resources.push(Resource::Netns(netns.clone()));
        }

        for (link, switch) in [(&n.app_link, &app_sw), (&n.tool_link, &tool_sw)] {
            self.runner.run(&[
                "ip", "link", "add", link, "type", "veth", "peer", "name", switch,
            ])?;
            self.resources.push(Resource::Veth(switch.clone()));
        }

        self.runner
            .run(&["ip", "link", "set", &n.app_link, "netns", &n.app_netns])?;
        self.runner
            .run(&["ip", "link", "set", &n.tool_link, "netns", &n.tool_netns])?;

        self.runner
            .run(&["ip", "link", "add", &n.bridge, "type", "bridge"])?;
        self.resources.push(Resource::Bridge(n.bridge.clone()));
        self.runner.run(&["ip", "link", "set", &n.bridge, "up"])?;

        for switch in [&app_sw, &tool_sw] {
            self.runner
                .run(&["ip", "link", "set", switch, "master", &n.bridge])?;
            self.runner.run(&["ip", "link", "set", switch, "up"])?;
        }

        let sides = [
            (&n.app_netns, &n.app_link, APP_IPV4_ADDR, APP_IPV6_ADDR, config.setup_app_link_up),
            (&n.tool_netns, &n.tool_link, TOOL_IPV4_ADDR, TOOL_IPV6_ADDR, config.setup_tool_link_up),
        ];

        for (netns, link, ipv4, ipv6, link_up) in sides {
            let ipv4 = format!("{ipv4}/24");
            let ipv6 = format!("{ipv6}/64");

            self.runner.run(&[
                "ip", "netns", "exec", netns, "ip", "addr", "add", &ipv4, "dev", link,
            ])?;
            self.runner.run(&[
                "ip", "netns", "exec", netns, "ip", "-6", "addr", "add", &ipv6, "dev", link,
                "nodad",
            ])?;
            self.runner.run(&[
                "ip", "netns", "exec", netns, "ip", "link", "set", "dev", "lo", "up",
            ])?;

            if link_up {
                self.runner.run(&[
                    "ip", "netns", "exec", netns, "ip", "link", "set", "dev", link, "up",
                ])?;
            }
        }

        Ok(())
    }

    pub fn index(&self) -> u32 {
        self.names.index
    }

    pub fn names(&self) -> &NetnsNames {
        &self.names
    }

    pub fn state(&self) -> NamespaceState {
        self.state
    }

    pub fn app_link_name(&self) -> &str {
        &self.names.app_link
    }

    pub fn tool_link_name(&self) -> &str {
        &self.names.tool_link
    }

    pub fn netns_for_subprocess_kind(&self, kind: SubprocessKind) -> &str {
        self.names.netns_for_subprocess_kind(kind)
    }

    /// Bring the app-side link up, if it was not brought up on creation.
    pub fn app_link_up(&self) -> Result<(), Error> {
        self.link_up(SubprocessKind::App)
    }

    /// Bring the tool-side link up, if it was not brought up on creation.
    pub fn tool_link_up(&self) -> Result<(), Error> {
        self.link_up(SubprocessKind::Tool)
    }

    fn link_up(&self, kind: SubprocessKind) -> Result<(), Error> {
        let link = match kind {
            SubprocessKind::App => &self.names.app_link,
            SubprocessKind::Tool => &self.names.tool_link,
        };

        self.runner.run(&[
            "ip",
            "netns",
            "exec",
            self.names.netns_for_subprocess_kind(kind),
            "ip",
            "link",
            "set",
            "dev",
            link,
            "up",
        ])
    }

    /// Remove everything this instance created.
    ///
    /// Idempotent, and tolerant of partial creation: only the resources which
    /// were actually created are removed, in reverse order. Individual failures
    /// are logged and do not stop the teardown.
    pub fn destroy(&mut self) {
        if self.state == NamespaceState::TornDown {
            debug!("Namespace index {} already torn down", self.names.index);
            return;
        }

        info!(
            "Tearing down isolated network namespaces {} and {}",
            self.names.app_netns, self.names.tool_netns
        );

        while let Some(resource) = self.resources.pop() {
            if let Err(e) = resource.remove(&self.runner) {
                warn!("Failed to remove {resource:?}: {e}");
            }
        }

        self.ctx.release(self.names.index);
        self.state = NamespaceState::TornDown;
    }

    /// Keep the namespaces after this instance is gone and return their names.
    ///
    /// The index is released to `ctx`; removing the namespaces is then up to
    /// `remove_namespace_resources`.
    pub fn persist(mut self) -> NetnsNames {
        self.resources.clear();
        self.ctx.release(self.names.index);
        self.state = NamespaceState::TornDown;

        self.names.clone()
    }
}

impl<R> Drop for IsolatedNetworkNamespace<R>
where
    R: CommandRunner,
{
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        let names = NetnsNames::new(3, &NamespaceConfig::default()).unwrap();

        assert_eq!(names.app_netns, "app-3");
        assert_eq!(names.tool_netns, "tool-3");
        assert_eq!(names.app_link, "eth-app-3");
        assert_eq!(names.tool_switch_link(), "eth-tool-3-sw");
        assert_eq!(names.bridge, "br1-3");
        assert_eq!(names.netns_for_subprocess_kind(SubprocessKind::App), "app-3");
        assert_eq!(names.netns_for_subprocess_kind(SubprocessKind::Tool), "tool-3");
    }

    #[test]
    fn test_names_too_long() {
        let config = NamespaceConfig {
            tool_link_name: "ethernet-tool".to_string(),
            ..Default::default()
        };

        let err = NetnsNames::new(12, &config).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_context_reuses_released_indices() {
        let ctx = NetnsContext::with_base_index(10);

        assert_eq!(ctx.allocate().unwrap(), 10);
        assert_eq!(ctx.allocate().unwrap(), 11);

        ctx.release(10);
        assert_eq!(ctx.allocate().unwrap(), 10);
        assert_eq!(ctx.allocated(), vec![10, 11]);
    }
}
