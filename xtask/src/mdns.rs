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

//! mDNS interface selection task.

use log::info;

use rs_matter_testing::mdns::{host_ipv6_addresses, InterfaceChoice};

/// Print the IPv6 addresses an mDNS browser would bind to on this host.
pub fn print_ipv6_addresses() -> anyhow::Result<()> {
    match host_ipv6_addresses()? {
        InterfaceChoice::All => {
            info!("No usable IPv6 address; mDNS would bind to all interfaces");
            println!("all");
        }
        InterfaceChoice::Addresses(addrs) => {
            for addr in addrs {
                println!("{addr}");
            }
        }
    }

    Ok(())
}
