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

//! mDNS helpers: interface selection for the browser and the TCP support
//! rule of the operational TXT record.

use core::fmt;

use std::collections::HashMap;
use std::net::Ipv6Addr;

use log::info;

use crate::error::Error;

/// The TXT record key advertising TCP support of an operational instance.
pub const TXT_KEY_TCP: &str = "T";

/// The interfaces an mDNS browser should bind to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceChoice {
    /// Let the mDNS library pick its defaults
    All,
    /// Bind to exactly these IPv6 addresses; link-local ones carry a `%<ifname>` scope
    Addresses(Vec<String>),
}

impl fmt::Display for InterfaceChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all interfaces"),
            Self::Addresses(addrs) => write!(f, "{}", addrs.join(", ")),
        }
    }
}

fn is_link_local(addr: &Ipv6Addr) -> bool {
    addr.segments()[0] & 0xffc0 == 0xfe80
}

fn is_unique_local(addr: &Ipv6Addr) -> bool {
    addr.segments()[0] & 0xfe00 == 0xfc00
}

fn is_global_unicast(addr: &Ipv6Addr) -> bool {
    addr.segments()[0] & 0xe000 == 0x2000
}

/// Select the IPv6 addresses usable for mDNS out of `(interface name, address)` pairs.
///
/// Loopback and unusable addresses are skipped. Link-local addresses need a
/// scope and get `%<ifname>` appended; unique local and global ones are kept bare.
/// Returns `InterfaceChoice::All` if nothing is left.
pub fn select_ipv6_addresses<I, S>(addrs: I) -> InterfaceChoice
where
    I: IntoIterator<Item = (S, Ipv6Addr)>,
    S: AsRef<str>,
{
    let selected = addrs
        .into_iter()
        .filter_map(|(ifname, addr)| {
            if addr.is_loopback() || addr.is_unspecified() || addr.is_multicast() {
                None
            } else if is_link_local(&addr) {
                Some(format!("{addr}%{}", ifname.as_ref()))
            } else if is_unique_local(&addr) || is_global_unicast(&addr) {
                Some(addr.to_string())
            } else {
                None
            }
        })
        .collect::<Vec<_>>();

    if selected.is_empty() {
        info!("No usable IPv6 address, using the mDNS interface defaults");
        InterfaceChoice::All
    } else {
        info!("Discovered IPv6 addresses: {selected:?}");
        InterfaceChoice::Addresses(selected)
    }
}

/// Select the IPv6 addresses of this host usable for mDNS.
pub fn host_ipv6_addresses() -> Result<InterfaceChoice, Error> {
    let addrs = nix::ifaddrs::getifaddrs()?
        .filter_map(|ia| {
            ia.address
                .and_then(|addr| addr.as_sockaddr_in6().map(|addr| addr.ip()))
                .map(|ip| (ia.interface_name, ip))
        })
        .collect::<Vec<_>>();

    Ok(select_ipv6_addresses(addrs))
}

/// Whether a `T` TXT value advertises TCP support.
///
/// An absent, blank or `"0"` value means MRP only.
pub fn is_tcp_supported(value: Option<&str>) -> bool {
    value
        .map(str::trim)
        .map(|value| !value.is_empty() && value != "0")
        .unwrap_or(false)
}

/// Resolves the TXT record of an operational service instance.
pub trait TxtRecordResolver {
    fn txt_record(&self, instance_qname: &str) -> Result<HashMap<String, String>, Error>;
}

impl<T> TxtRecordResolver for &T
where
    T: TxtRecordResolver,
{
    fn txt_record(&self, instance_qname: &str) -> Result<HashMap<String, String>, Error> {
        (*self).txt_record(instance_qname)
    }
}

/// Check whether the DUT advertised as `instance_qname` supports TCP.
pub fn is_dut_tcp_supported<R>(resolver: R, instance_qname: &str) -> Result<bool, Error>
where
    R: TxtRecordResolver,
{
    let txt = resolver.txt_record(instance_qname).map_err(|e| {
        e.with_context(format!(
            "unable to determine TCP support for '{instance_qname}': TXT record retrieval failed"
        ))
    })?;

    Ok(is_tcp_supported(txt.get(TXT_KEY_TCP).map(String::as_str)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::ErrorCode;

    struct Txt(Option<HashMap<String, String>>);

    impl TxtRecordResolver for Txt {
        fn txt_record(&self, _instance_qname: &str) -> Result<HashMap<String, String>, Error> {
            self.0
                .clone()
                .ok_or_else(|| Error::new_with_context(ErrorCode::NotFound, "no such instance"))
        }
    }

    fn txt(entries: &[(&str, &str)]) -> Txt {
        Txt(Some(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ))
    }

    #[test]
    fn test_tcp_supported() {
        assert!(!is_tcp_supported(None));
        assert!(!is_tcp_supported(Some("")));
        assert!(!is_tcp_supported(Some("  ")));
        assert!(!is_tcp_supported(Some("0")));
        assert!(!is_tcp_supported(Some(" 0 ")));
        assert!(is_tcp_supported(Some("1")));
        assert!(is_tcp_supported(Some("6")));
    }

    #[test]
    fn test_dut_tcp_supported() {
        let qname = "0000000000000001-0000000000000002._matter._tcp.local.";

        assert!(is_dut_tcp_supported(txt(&[("T", "4"), ("SII", "5000")]), qname).unwrap());
        assert!(!is_dut_tcp_supported(txt(&[("SII", "5000")]), qname).unwrap());
        assert!(!is_dut_tcp_supported(txt(&[("T", "0")]), qname).unwrap());

        let err = is_dut_tcp_supported(Txt(None), qname).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert!(err.context().unwrap().contains(qname));
    }

    #[test]
    fn test_select_ipv6_addresses() {
        let addrs = [
            ("lo", Ipv6Addr::LOCALHOST),
            ("eth0", "fe80::1".parse().unwrap()),
            ("eth0", "fd00:0:1:1::3".parse().unwrap()),
            ("eth0", "2001:db8::1".parse().unwrap()),
            ("eth0", "ff02::fb".parse().unwrap()),
            ("eth0", "::ffff:10.0.0.1".parse().unwrap()),
        ];

        assert_eq!(
            select_ipv6_addresses(addrs),
            InterfaceChoice::Addresses(vec![
                "fe80::1%eth0".to_string(),
                "fd00:0:1:1::3".to_string(),
                "2001:db8::1".to_string(),
            ])
        );

        assert_eq!(
            select_ipv6_addresses([("lo", Ipv6Addr::LOCALHOST)]),
            InterfaceChoice::All
        );
        assert_eq!(
            select_ipv6_addresses(Vec::<(String, Ipv6Addr)>::new()),
            InterfaceChoice::All
        );
    }
}
