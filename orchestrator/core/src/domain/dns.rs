// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use std::net::IpAddr;

/// One hosts entry: an address and the names resolving to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub ip: IpAddr,
    pub names: Vec<String>,
}

/// Internal DNS registration for add-on containers. Entries are staged with
/// `add_host`/`remove_host` and written out together by `flush`.
#[async_trait]
pub trait DnsHosts: Send + Sync {
    fn add_host(&self, ip: IpAddr, names: Vec<String>);

    fn remove_host(&self, name: &str);

    fn entries(&self) -> Vec<HostEntry>;

    async fn flush(&self) -> std::io::Result<()>;
}

/// Names an add-on container is reachable under.
pub fn addon_hostnames(slug: &str) -> Vec<String> {
    vec![slug.replace('_', "-"), format!("addon_{}", slug)]
}
