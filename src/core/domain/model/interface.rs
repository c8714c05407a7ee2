//! Guest network interfaces, parsed from the JSON output of `ip -j addr`
//! and `ip -j route get` run through the guest agent.

use crate::core::domain::value_object::InterfaceBlacklist;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Address scopes that never leave the guest and are not inventoried.
const LOCAL_SCOPES: &[&str] = &["link", "host", "local"];

/// One link entry of `ip -j addr`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpLink {
    pub ifname: String,
    #[serde(default)]
    pub mtu: Option<u32>,
    /// Hardware address.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub operstate: Option<String>,
    #[serde(default)]
    pub addr_info: Vec<AddrInfo>,
}

/// One address of an [`IpLink`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AddrInfo {
    /// `inet` or `inet6`.
    pub family: String,
    pub local: String,
    pub prefixlen: u8,
    #[serde(default)]
    pub scope: Option<String>,
}

impl AddrInfo {
    fn is_local_scope(&self) -> bool {
        self.scope
            .as_deref()
            .is_some_and(|scope| LOCAL_SCOPES.contains(&scope))
    }

    fn cidr(&self) -> String {
        format!("{}/{}", self.local, self.prefixlen)
    }
}

/// One entry of `ip -j route get <dst>`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteEntry {
    #[serde(default)]
    pub dst: Option<String>,
    #[serde(default)]
    pub dev: Option<String>,
    /// Preferred source address for the route.
    #[serde(default)]
    pub prefsrc: Option<String>,
}

/// A network interface inside a guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PveInterface {
    /// Interface name, the natural key within a VM.
    pub name: String,
    pub mac: Option<String>,
    pub mtu: Option<u32>,
    pub up: bool,
    /// Addresses in CIDR notation.
    pub ipv4_addresses: Vec<String>,
    pub ipv6_addresses: Vec<String>,
}

impl PveInterface {
    /// Builds an interface from an `ip -j addr` link, dropping local-scope addresses.
    pub fn from_link(link: IpLink) -> Self {
        let mut ipv4_addresses = Vec::new();
        let mut ipv6_addresses = Vec::new();
        for addr in link.addr_info.iter().filter(|a| !a.is_local_scope()) {
            match addr.family.as_str() {
                "inet" => ipv4_addresses.push(addr.cidr()),
                "inet6" => ipv6_addresses.push(addr.cidr()),
                _ => {}
            }
        }
        let up = link.flags.iter().any(|flag| flag == "UP")
            || link.operstate.as_deref() == Some("UP");
        Self {
            name: link.ifname,
            mac: link.address.filter(|mac| !mac.is_empty()),
            mtu: link.mtu,
            up,
            ipv4_addresses,
            ipv6_addresses,
        }
    }

    /// All addresses, IPv4 first.
    pub fn addresses(&self) -> impl Iterator<Item = &String> {
        self.ipv4_addresses.iter().chain(self.ipv6_addresses.iter())
    }
}

impl fmt::Display for PveInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "name={};mtu={};ipv4={};ipv6={}",
            self.name,
            self.mtu.map(|mtu| mtu.to_string()).unwrap_or_default(),
            self.ipv4_addresses.join(","),
            self.ipv6_addresses.join(",")
        )
    }
}

/// Parses `ip -j addr` output into the interfaces not excluded by `blacklist`.
pub fn parse_ip_addr(
    output: &str,
    blacklist: &InterfaceBlacklist,
) -> Result<Vec<PveInterface>, serde_json::Error> {
    let links: Vec<IpLink> = serde_json::from_str(output)?;
    Ok(links
        .into_iter()
        .filter(|link| !blacklist.is_blacklisted(&link.ifname))
        .map(PveInterface::from_link)
        .collect())
}

/// Extracts the preferred source address from `ip -j route get` output.
pub fn parse_route_source(output: &str) -> Result<Option<IpAddr>, serde_json::Error> {
    let routes: Vec<RouteEntry> = serde_json::from_str(output)?;
    Ok(routes
        .into_iter()
        .filter_map(|route| route.prefsrc)
        .find_map(|src| src.parse().ok()))
}

/// Strips the prefix length from a CIDR string and parses the host address.
pub fn host_address(cidr: &str) -> Option<IpAddr> {
    cidr.split('/').next()?.parse().ok()
}
