//! Cluster topology
//!
//! Lays `hosts × sites_per_host` execution sites out over `partition_count`
//! partitions. Slot `j` of the global site list lives on host `j % hosts` and
//! serves partition `j / (k_factor + 1)`, so the `k_factor + 1` replicas of a
//! partition always land on consecutive, and therefore distinct, hosts.

use std::collections::BTreeSet;

use strata_core::{HostId, PartitionId, SiteId};

use crate::config::SnapshotConfig;

/// One execution site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteInfo {
    /// Cluster-unique site id
    pub site_id: SiteId,
    /// Host the site runs on
    pub host_id: HostId,
    /// Partition the site serves
    pub partition_id: PartitionId,
}

/// Placement of sites and partitions on hosts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    hosts: u32,
    sites_per_host: u32,
    k_factor: u32,
    partition_count: u32,
    sites: Vec<SiteInfo>,
}

impl Topology {
    /// Build the topology described by a validated config
    pub fn from_config(config: &SnapshotConfig) -> Self {
        let hosts = config.hosts.max(1);
        let replicas = config.k_factor + 1;
        let mut sites: Vec<SiteInfo> = (0..config.site_count())
            .map(|slot| {
                let host_id = slot % hosts;
                let local = slot / hosts;
                SiteInfo {
                    site_id: host_id * config.sites_per_host + local,
                    host_id,
                    partition_id: slot / replicas,
                }
            })
            .collect();
        sites.sort_by_key(|s| s.site_id);

        Topology {
            hosts,
            sites_per_host: config.sites_per_host,
            k_factor: config.k_factor,
            partition_count: config.partition_count(),
            sites,
        }
    }

    /// Number of hosts
    pub fn host_count(&self) -> u32 {
        self.hosts
    }

    /// Host ids in order
    pub fn host_ids(&self) -> impl Iterator<Item = HostId> {
        0..self.hosts
    }

    /// Sites per host
    pub fn sites_per_host(&self) -> u32 {
        self.sites_per_host
    }

    /// Extra replicas per partition
    pub fn k_factor(&self) -> u32 {
        self.k_factor
    }

    /// Number of data partitions
    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Every site ordered by site id
    pub fn sites(&self) -> &[SiteInfo] {
        &self.sites
    }

    /// Sites running on `host_id`
    pub fn sites_on_host(&self, host_id: HostId) -> impl Iterator<Item = &SiteInfo> {
        self.sites.iter().filter(move |s| s.host_id == host_id)
    }

    /// Partitions with a replica on `host_id`
    pub fn partitions_on_host(&self, host_id: HostId) -> BTreeSet<PartitionId> {
        self.sites_on_host(host_id).map(|s| s.partition_id).collect()
    }

    /// Sites holding a replica of `partition_id`
    pub fn replicas_of(&self, partition_id: PartitionId) -> impl Iterator<Item = &SiteInfo> {
        self.sites
            .iter()
            .filter(move |s| s.partition_id == partition_id)
    }
}

/// Display name of a host
pub fn hostname(host_id: HostId) -> String {
    format!("host{}", host_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology(hosts: u32, sph: u32, k: u32) -> Topology {
        Topology::from_config(
            &SnapshotConfig::default()
                .with_hosts(hosts)
                .with_sites_per_host(sph)
                .with_k_factor(k),
        )
    }

    #[test]
    fn test_single_host() {
        let t = topology(1, 3, 0);
        assert_eq!(t.partition_count(), 3);
        assert_eq!(t.partitions_on_host(0), BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn test_replicas_on_distinct_hosts() {
        for (hosts, sph, k) in [(3, 2, 1), (2, 3, 1), (3, 3, 2), (4, 2, 1), (5, 4, 4)] {
            let t = topology(hosts, sph, k);
            for pid in 0..t.partition_count() {
                let hosts: BTreeSet<HostId> = t.replicas_of(pid).map(|s| s.host_id).collect();
                assert_eq!(hosts.len() as u32, k + 1, "partition {} in {:?}", pid, t);
            }
        }
    }

    #[test]
    fn test_every_host_has_its_sites() {
        let t = topology(3, 2, 1);
        for host in t.host_ids() {
            assert_eq!(t.sites_on_host(host).count(), 2);
        }
        let ids: BTreeSet<SiteId> = t.sites().iter().map(|s| s.site_id).collect();
        assert_eq!(ids.len(), 6);
    }

    #[test]
    fn test_hostname() {
        assert_eq!(hostname(2), "host2");
    }
}
