// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Configuration snapshots for the arbor controller stack.
//!
//! A [`Config`] is loaded once and shared as an `Arc<Config>`. Call sites
//! take the snapshot at the start of an operation and thread it through the
//! call chain; a reload builds a fresh snapshot and swaps the `Arc` rather
//! than mutating in place.

use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddrV4};
use thiserror::Error;

/// Default timeout applied wherever a caller passes a timeout of zero.
pub const DEFAULT_MSG_TIMEOUT_MS: u64 = 10_000;
/// Default grace period for controller failover, in seconds.
pub const DEFAULT_CONTROLLER_TIMEOUT_SECS: u64 = 120;
/// Default forwarding span width.
pub const DEFAULT_TREE_WIDTH: u16 = 50;
/// Default node-name prefix for the machine.
pub const DEFAULT_NODE_PREFIX: &str = "bgl";
/// Default node count of one base partition.
pub const DEFAULT_BP_NODE_CNT: u32 = 512;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no controller address configured")]
    NoController,
    #[error("controller port must be non-zero")]
    NoControllerPort,
    #[error("tree width must be at least 1")]
    ZeroTreeWidth,
    #[error("machine shape has a zero dimension")]
    ZeroDimension,
    #[error("base partition node count must be non-zero")]
    ZeroBpNodeCnt,
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How blocks may be laid out on the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    /// Only statically configured blocks are used.
    Static,
    /// Statically configured blocks that may overlap.
    Overlap,
    /// Blocks are created and torn down on demand.
    Dynamic,
}

/// One image admission entry: a name (or `"*"`), whether it is a default
/// image, and the group ids allowed to boot it. No groups means everyone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageConf {
    pub name: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub groups: Vec<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Primary controller address.
    pub control_addr: Ipv4Addr,
    /// Primary controller port. Must be non-zero.
    pub control_port: u16,
    /// Backup controller address, if any.
    pub backup_addr: Option<Ipv4Addr>,
    /// Backup controller port. Zero means no backup even if an address is set.
    pub backup_port: u16,
    /// Seconds the primary may stay silent before failover is assumed.
    pub controller_timeout_secs: u64,
    /// Message timeout substituted when a caller passes zero.
    pub msg_timeout_ms: u64,
    /// Fan-out width of the forwarding tree.
    pub tree_width: u16,
    /// Node-name prefix, e.g. `bgl` in `bgl[000x133]`.
    pub node_prefix: String,
    pub layout_mode: LayoutMode,
    /// Machine dimensions in base partitions, X/Y/Z.
    pub machine_shape: [u16; 3],
    /// Nodes per base partition.
    pub bp_node_cnt: u32,
    /// Processors per node.
    pub cpus_per_node: u32,
    pub blrts_images: Vec<ImageConf>,
    pub linux_images: Vec<ImageConf>,
    pub mloader_images: Vec<ImageConf>,
    pub ramdisk_images: Vec<ImageConf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            control_addr: Ipv4Addr::LOCALHOST,
            control_port: 6817,
            backup_addr: None,
            backup_port: 0,
            controller_timeout_secs: DEFAULT_CONTROLLER_TIMEOUT_SECS,
            msg_timeout_ms: DEFAULT_MSG_TIMEOUT_MS,
            tree_width: DEFAULT_TREE_WIDTH,
            node_prefix: DEFAULT_NODE_PREFIX.to_owned(),
            layout_mode: LayoutMode::Static,
            machine_shape: [4, 4, 4],
            bp_node_cnt: DEFAULT_BP_NODE_CNT,
            cpus_per_node: 1,
            blrts_images: vec![],
            linux_images: vec![],
            mloader_images: vec![],
            ramdisk_images: vec![],
        }
    }
}

impl Config {
    /// Validate a deserialized or hand-built configuration.
    pub fn new(config: Config) -> Result<Config, Error> {
        if config.control_port == 0 {
            return Err(Error::NoControllerPort);
        }
        if config.tree_width == 0 {
            return Err(Error::ZeroTreeWidth);
        }
        if config.machine_shape.iter().any(|d| *d == 0) {
            return Err(Error::ZeroDimension);
        }
        if config.bp_node_cnt == 0 {
            return Err(Error::ZeroBpNodeCnt);
        }
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> Result<Config, Error> {
        let config: Config = toml::from_str(text)?;
        Config::new(config)
    }

    /// Address of the primary controller.
    pub fn primary(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.control_addr, self.control_port)
    }

    /// Address of the backup controller, if one is configured.
    pub fn backup(&self) -> Option<SocketAddrV4> {
        if self.backup_port == 0 {
            return None;
        }
        self.backup_addr
            .map(|addr| SocketAddrV4::new(addr, self.backup_port))
    }

    /// Resolve a caller-supplied timeout, substituting the default for zero.
    pub fn resolve_timeout(&self, timeout_ms: u64) -> u64 {
        if timeout_ms == 0 {
            self.msg_timeout_ms
        } else {
            timeout_ms
        }
    }

    /// Processors in one base partition.
    pub fn cpus_per_bp(&self) -> u32 {
        self.bp_node_cnt * self.cpus_per_node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::new(Config::default()).unwrap();
    }

    #[test]
    fn backup_requires_port() {
        let mut config = Config::default();
        config.backup_addr = Some(Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(config.backup(), None);
        config.backup_port = 6818;
        assert_eq!(
            config.backup(),
            Some(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 6818))
        );
    }

    #[test]
    fn zero_timeout_resolves_to_default() {
        let config = Config::default();
        assert_eq!(config.resolve_timeout(0), DEFAULT_MSG_TIMEOUT_MS);
        assert_eq!(config.resolve_timeout(250), 250);
    }

    #[test]
    fn from_toml_rejects_zero_port() {
        let err = Config::from_toml("control_port = 0").unwrap_err();
        assert!(matches!(err, Error::NoControllerPort));
    }

    #[test]
    fn from_toml_reads_images() {
        let config = Config::from_toml(
            r#"
            control_addr = "10.0.0.1"
            layout_mode = "dynamic"
            [[blrts_images]]
            name = "default-blrts"
            default = true
            [[linux_images]]
            name = "compute-linux"
            groups = [500, 501]
            "#,
        )
        .unwrap();
        assert_eq!(config.layout_mode, LayoutMode::Dynamic);
        assert!(config.blrts_images[0].default);
        assert_eq!(config.linux_images[0].groups, vec![500, 501]);
    }
}
