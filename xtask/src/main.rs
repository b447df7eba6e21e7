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

//! `xtask` - Network namespace, Thread Border Router and mDNS tasks for Matter test runs.

use std::io::Write;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use env_logger::fmt::style;
use log::{Level, LevelFilter};

use rs_matter_testing::linux::SubprocessKind;

use crate::netns::NetnsTasks;

mod mdns;
mod netns;

/// The main command-line interface for `xtask`.
#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Matter test harness tasks")]
struct Cli {
    /// Task verbosity
    #[arg(short = 'v', long, default_value = "normal")]
    verbosity: Verbosity,

    #[command(subcommand)]
    command: Command,
}

/// Available commands for `xtask`.
#[derive(Subcommand)]
enum Command {
    /// Check that isolated network namespaces can be created by this process
    NetnsCheck,
    /// Create the app/tool namespace pair with the given index and leave it up
    NetnsUp {
        /// The namespace index
        #[arg(long, default_value_t = 0)]
        index: u32,
        /// Do not bring the app and tool links up
        #[arg(long)]
        links_down: bool,
    },
    /// Remove the app/tool namespace pair with the given index
    NetnsDown {
        /// The namespace index
        #[arg(long, default_value_t = 0)]
        index: u32,
    },
    /// List the network namespaces on this host
    NetnsList,
    /// Execute a command inside the app or tool namespace
    NetnsExec {
        /// The namespace index
        #[arg(long, default_value_t = 0)]
        index: u32,
        /// The side of the namespace pair to run in
        #[arg(long, default_value = "app")]
        side: Side,
        /// The command line to execute
        #[arg(trailing_var_arg = true, required = true)]
        cmd: Vec<String>,
    },
    /// Print the system tools needed by the namespace and border router tasks
    NetnsTools,
    /// Print the Debian/Ubuntu packages needed by the namespace tasks
    NetnsPackages,
    /// Run a Thread Border Router in the app namespace (created with `netns-up`)
    Tbr {
        /// The namespace index
        #[arg(long, default_value_t = 0)]
        index: u32,
        /// The Thread radio simulation node ID
        #[arg(long, default_value_t = 9)]
        node_id: u32,
        /// How long to keep the border router running, in seconds
        #[arg(long, default_value_t = 60)]
        duration: u64,
        /// The hex-encoded operational dataset to form the network from
        dataset: String,
    },
    /// Print the IPv6 addresses an mDNS browser would bind to
    MdnsAddrs,
}

/// The side of a namespace pair
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Side {
    App,
    Tool,
}

impl From<Side> for SubprocessKind {
    fn from(side: Side) -> Self {
        match side {
            Side::App => SubprocessKind::App,
            Side::Tool => SubprocessKind::Tool,
        }
    }
}

impl Command {
    fn run(&self, print_cmd_output: bool) -> anyhow::Result<()> {
        let tasks = NetnsTasks::new(print_cmd_output);

        match self {
            Command::NetnsCheck => tasks.check(),
            Command::NetnsUp { index, links_down } => tasks.up(*index, *links_down),
            Command::NetnsDown { index } => tasks.down(*index),
            Command::NetnsList => tasks.list(),
            Command::NetnsExec { index, side, cmd } => tasks.exec(*index, (*side).into(), cmd),
            Command::NetnsTools => tasks.print_tooling(),
            Command::NetnsPackages => tasks.print_packages(),
            Command::Tbr {
                index,
                node_id,
                duration,
                dataset,
            } => tasks.tbr(*index, dataset, *node_id, Duration::from_secs(*duration)),
            Command::MdnsAddrs => mdns::print_ipv6_addresses(),
        }
    }
}

/// Verbosity
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Verbosity {
    /// Silent - print only errors
    #[clap(alias = "s")]
    Silent,
    /// Reduced - print only the main tasks
    #[clap(alias = "r")]
    Reduced,
    /// Normal
    #[default]
    #[clap(alias = "n")]
    Normal,
    /// Verbose - print executed commands
    #[clap(alias = "v")]
    Verbose,
    /// Chatty - print the full output of executed commands
    #[clap(alias = "c")]
    Chatty,
}

impl Verbosity {
    fn log_level(&self) -> LevelFilter {
        match self {
            Self::Silent => LevelFilter::Off,
            Self::Reduced => LevelFilter::Warn,
            Self::Normal => LevelFilter::Info,
            Self::Verbose => LevelFilter::Debug,
            Self::Chatty => LevelFilter::Trace,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let print_cmd_output = matches!(cli.verbosity, Verbosity::Chatty);

    env_logger::builder()
        .format(|buf, record| {
            let style = match record.level() {
                Level::Trace => style::AnsiColor::Cyan.on_default(),
                Level::Debug => style::AnsiColor::Blue.on_default(),
                Level::Info => style::AnsiColor::Green.on_default(),
                Level::Warn => style::AnsiColor::Green
                    .on_default()
                    .effects(style::Effects::BOLD),
                Level::Error => style::AnsiColor::Red
                    .on_default()
                    .effects(style::Effects::BOLD),
            };

            let prefix = match record.level() {
                Level::Trace => "      >",
                Level::Debug => "    >",
                Level::Info => "  >",
                Level::Warn => ">",
                Level::Error => "!",
            };

            writeln!(buf, "{prefix} {style}{}{style:#}", record.args())
        })
        .filter_level(cli.verbosity.log_level())
        .init();

    cli.command.run(print_cmd_output)
}
