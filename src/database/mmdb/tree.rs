//! Binary search tree of an MMDB file.
//!
//! Nodes live in an arena; node 0 is the root. A network of prefix length `n`
//! owns the record reached after following its first `n` address bits. IPv4
//! networks in an IPv6 tree are stored under `::/96`, which is where readers
//! look IPv4 addresses up.
//!
//! IPv6 trees alias the IPv4-mapped and 6to4 networks to the IPv4 subtree.
//! Aliased networks resolve to IPv4 data and cannot be inserted into.

use super::encoder::DataSection;
use super::value::{MergeStrategy, MmdbValue};
use anyhow::{anyhow, Result};
use ipnet::IpNet;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

/// Networks of an IPv6 tree that resolve through the IPv4 subtree
pub(crate) const IPV4_ALIAS_NETWORKS: [&str; 2] = ["::ffff:0:0/96", "2002::/16"];

#[derive(Debug, Clone)]
pub(crate) enum Record {
    Empty,
    Data(Arc<MmdbValue>),
    Node(usize),
    /// Encoded as the record at `::/96`
    Alias,
}

#[derive(Debug, Clone)]
struct Node {
    children: [Record; 2],
}

impl Node {
    fn with(record: Record) -> Self {
        Node {
            children: [record.clone(), record],
        }
    }
}

#[derive(Debug)]
pub(crate) struct SearchTree {
    nodes: Vec<Node>,
    ip_version: u16,
}

impl SearchTree {
    pub fn new(ip_version: u16) -> Result<Self> {
        if ip_version != 4 && ip_version != 6 {
            return Err(anyhow!("unsupported ip_version {}", ip_version));
        }
        let mut tree = SearchTree {
            nodes: vec![Node::with(Record::Empty)],
            ip_version,
        };
        if ip_version == 6 {
            for alias in IPV4_ALIAS_NETWORKS {
                let network: IpNet = alias.parse()?;
                let (addr, prefix_len) = tree.key(network.network(), network.prefix_len())?;
                let node = tree.descend(addr, prefix_len)?;
                tree.nodes[node].children[bit_at(addr, prefix_len - 1)] = Record::Alias;
            }
        }
        Ok(tree)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Left-aligned 128-bit key and its length in bits for an address in this tree.
    fn key(&self, addr: IpAddr, prefix_len: u8) -> Result<(u128, u8)> {
        match (addr, self.ip_version) {
            (IpAddr::V4(v4), 6) => Ok((u32::from(v4) as u128, 96 + prefix_len)),
            (IpAddr::V4(v4), _) => Ok(((u32::from(v4) as u128) << 96, prefix_len)),
            (IpAddr::V6(v6), 6) => Ok((u128::from(v6), prefix_len)),
            (IpAddr::V6(v6), _) => Err(anyhow!(
                "cannot store IPv6 address {} in an IPv4-only database",
                v6
            )),
        }
    }

    /// Merge `value` into every record covered by `network`.
    ///
    /// Merges are computed for all covered records before any of them is
    /// updated, so a failing merge leaves stored data unchanged.
    pub fn insert(
        &mut self,
        network: IpNet,
        value: &MmdbValue,
        strategy: MergeStrategy,
    ) -> Result<()> {
        let (addr, prefix_len) = self.key(network.network(), network.prefix_len())?;

        let mut slots: Vec<(usize, usize)> = Vec::new();
        if prefix_len == 0 {
            self.collect_slots(0, 0, &mut slots);
            self.collect_slots(0, 1, &mut slots);
        } else {
            let node = self
                .descend(addr, prefix_len)
                .map_err(|e| anyhow!("cannot insert {}: {}", network, e))?;
            let bit = bit_at(addr, prefix_len - 1);
            if matches!(self.nodes[node].children[bit], Record::Alias) {
                return Err(anyhow!(
                    "cannot insert {}: network is aliased to the IPv4 subtree",
                    network
                ));
            }
            self.collect_slots(node, bit, &mut slots);
        }

        // keyed by the existing allocation; the `Arc` clone keeps it alive
        let mut merged: HashMap<*const MmdbValue, (Arc<MmdbValue>, Arc<MmdbValue>)> =
            HashMap::new();
        let mut fresh: Option<Arc<MmdbValue>> = None;
        let mut updates = Vec::with_capacity(slots.len());
        for (node, bit) in slots {
            let new_value = match &self.nodes[node].children[bit] {
                Record::Data(existing) => {
                    let ptr = Arc::as_ptr(existing);
                    match merged.get(&ptr) {
                        Some((_, new_value)) => new_value.clone(),
                        None => {
                            let new_value = Arc::new(strategy.apply(Some(existing), value)?);
                            merged.insert(ptr, (existing.clone(), new_value.clone()));
                            new_value
                        }
                    }
                }
                _ => match &fresh {
                    Some(v) => v.clone(),
                    None => {
                        let v = Arc::new(strategy.apply(None, value)?);
                        fresh = Some(v.clone());
                        v
                    }
                },
            };
            updates.push((node, bit, new_value));
        }

        for (node, bit, new_value) in updates {
            self.nodes[node].children[bit] = Record::Data(new_value);
        }
        Ok(())
    }

    /// Walk to the node holding the record of the `prefix_len` bit network,
    /// splitting leaves on the way.
    fn descend(&mut self, addr: u128, prefix_len: u8) -> Result<usize> {
        let mut node = 0;
        for depth in 0..prefix_len.saturating_sub(1) {
            let bit = bit_at(addr, depth);
            let current = self.nodes[node].children[bit].clone();
            node = match current {
                Record::Node(next) => next,
                Record::Alias => {
                    return Err(anyhow!("network is aliased to the IPv4 subtree"));
                }
                leaf => {
                    let next = self.nodes.len();
                    self.nodes.push(Node::with(leaf));
                    self.nodes[node].children[bit] = Record::Node(next);
                    next
                }
            };
        }
        Ok(node)
    }

    /// Collect all leaf record positions below `nodes[node].children[bit]`.
    /// Aliases are left out.
    fn collect_slots(&self, node: usize, bit: usize, slots: &mut Vec<(usize, usize)>) {
        match &self.nodes[node].children[bit] {
            Record::Node(child) => {
                self.collect_slots(*child, 0, slots);
                self.collect_slots(*child, 1, slots);
            }
            Record::Alias => {}
            _ => slots.push((node, bit)),
        }
    }

    /// Record at `::/96`, the root of the IPv4 subtree.
    fn ipv4_root(&self) -> &Record {
        let mut node = 0;
        for _ in 0..95 {
            match &self.nodes[node].children[0] {
                Record::Node(next) => node = *next,
                other => return other,
            }
        }
        &self.nodes[node].children[0]
    }

    /// Longest-prefix lookup of an address.
    pub fn lookup(&self, addr: IpAddr) -> Option<&MmdbValue> {
        let full_len = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let (key, depth) = self.key(addr, full_len).ok()?;

        let mut node = 0;
        for i in 0..depth {
            match &self.nodes[node].children[bit_at(key, i)] {
                Record::Node(next) => node = *next,
                Record::Data(v) => return Some(v.as_ref()),
                Record::Empty => return None,
                Record::Alias => {
                    // the 32 bits after the aliased prefix are the IPv4 address
                    let shift = 96u32.checked_sub(i as u32 + 1)?;
                    let v4 = ((key >> shift) & 0xFFFF_FFFF) as u32;
                    return self.lookup(IpAddr::V4(v4.into()));
                }
            }
        }
        None
    }

    /// Serialize the tree, adding referenced values to `data`.
    pub fn encode(&self, record_size: u16, data: &mut DataSection) -> Result<Vec<u8>> {
        if !matches!(record_size, 24 | 28 | 32) {
            return Err(anyhow!("unsupported record size {}", record_size));
        }
        let node_count = u32::try_from(self.nodes.len())
            .map_err(|_| anyhow!("too many nodes: {}", self.nodes.len()))?;
        let max_record: u64 = (1u64 << record_size) - 1;

        let ipv4_root = self.ipv4_root();
        let mut offsets: HashMap<*const MmdbValue, u32> = HashMap::new();
        let mut record_value = |record: &Record| -> Result<u32> {
            let record = match record {
                Record::Alias => ipv4_root,
                other => other,
            };
            let value: u64 = match record {
                Record::Empty | Record::Alias => node_count as u64,
                Record::Node(index) => *index as u64,
                Record::Data(v) => {
                    let ptr = Arc::as_ptr(v);
                    let offset = match offsets.get(&ptr) {
                        Some(offset) => *offset,
                        None => {
                            let offset = data.insert(v)?;
                            offsets.insert(ptr, offset);
                            offset
                        }
                    };
                    node_count as u64 + 16 + offset as u64
                }
            };
            if value > max_record {
                return Err(anyhow!(
                    "record value {} does not fit a {}-bit record, use a larger record size",
                    value,
                    record_size
                ));
            }
            Ok(value as u32)
        };

        let node_bytes = record_size as usize / 4;
        let mut out = Vec::with_capacity(self.nodes.len() * node_bytes);
        for node in &self.nodes {
            let left = record_value(&node.children[0])?;
            let right = record_value(&node.children[1])?;
            match record_size {
                24 => {
                    out.extend_from_slice(&left.to_be_bytes()[1..]);
                    out.extend_from_slice(&right.to_be_bytes()[1..]);
                }
                28 => {
                    out.extend_from_slice(&left.to_be_bytes()[1..]);
                    out.push(((((left >> 24) & 0x0F) << 4) | ((right >> 24) & 0x0F)) as u8);
                    out.extend_from_slice(&right.to_be_bytes()[1..]);
                }
                32 => {
                    out.extend_from_slice(&left.to_be_bytes());
                    out.extend_from_slice(&right.to_be_bytes());
                }
                other => return Err(anyhow!("unsupported record size {}", other)),
            }
        }
        Ok(out)
    }
}

fn bit_at(key: u128, depth: u8) -> usize {
    ((key >> (127 - depth as u32)) & 1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> MmdbValue {
        MmdbValue::String(v.to_string())
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut tree = SearchTree::new(6).unwrap();
        tree.insert(
            "1.1.1.0/24".parse().unwrap(),
            &s("one"),
            MergeStrategy::Replace,
        )
        .unwrap();
        tree.insert(
            "2001:db8::/32".parse().unwrap(),
            &s("doc"),
            MergeStrategy::Replace,
        )
        .unwrap();

        assert_eq!(tree.lookup("1.1.1.1".parse().unwrap()), Some(&s("one")));
        assert_eq!(tree.lookup("1.1.1.255".parse().unwrap()), Some(&s("one")));
        assert_eq!(tree.lookup("1.1.2.1".parse().unwrap()), None);
        assert_eq!(
            tree.lookup("2001:db8:1::1".parse().unwrap()),
            Some(&s("doc"))
        );
        assert_eq!(tree.lookup("2001:db9::1".parse().unwrap()), None);
    }

    #[test]
    fn test_more_specific_overrides() {
        let mut tree = SearchTree::new(6).unwrap();
        tree.insert("10.0.0.0/8".parse().unwrap(), &s("wide"), MergeStrategy::Replace)
            .unwrap();
        tree.insert(
            "10.1.0.0/16".parse().unwrap(),
            &s("narrow"),
            MergeStrategy::Replace,
        )
        .unwrap();

        assert_eq!(tree.lookup("10.1.2.3".parse().unwrap()), Some(&s("narrow")));
        assert_eq!(tree.lookup("10.2.0.1".parse().unwrap()), Some(&s("wide")));
    }

    #[test]
    fn test_failed_merge_leaves_data_untouched() {
        let mut tree = SearchTree::new(6).unwrap();
        tree.insert(
            "192.0.2.0/24".parse().unwrap(),
            &s("scalar"),
            MergeStrategy::Replace,
        )
        .unwrap();

        let mut map = crate::database::mmdb::value::MmdbMap::new();
        map.insert("k".to_string(), 1u32.into());
        let result = tree.insert(
            "192.0.0.0/16".parse().unwrap(),
            &MmdbValue::Map(map),
            MergeStrategy::TopLevelMerge,
        );
        assert!(result.is_err());
        assert_eq!(tree.lookup("192.0.2.1".parse().unwrap()), Some(&s("scalar")));
        assert_eq!(tree.lookup("192.0.3.1".parse().unwrap()), None);
    }

    #[test]
    fn test_ipv4_tree_rejects_ipv6() {
        let mut tree = SearchTree::new(4).unwrap();
        tree.insert("8.8.8.0/24".parse().unwrap(), &s("v4"), MergeStrategy::Replace)
            .unwrap();
        assert!(tree
            .insert("2001:db8::/32".parse().unwrap(), &s("v6"), MergeStrategy::Replace)
            .is_err());
        assert_eq!(tree.lookup("8.8.8.8".parse().unwrap()), Some(&s("v4")));
    }

    #[test]
    fn test_alias_lookup() {
        let mut tree = SearchTree::new(6).unwrap();
        tree.insert("1.1.1.0/24".parse().unwrap(), &s("one"), MergeStrategy::Replace)
            .unwrap();
        assert_eq!(tree.lookup("::ffff:1.1.1.9".parse().unwrap()), Some(&s("one")));
        assert_eq!(tree.lookup("2002:101:10a::1".parse().unwrap()), Some(&s("one")));
        assert_eq!(tree.lookup("2002:808:808::".parse().unwrap()), None);
        assert_eq!(SearchTree::new(4).unwrap().node_count(), 1);
    }

    #[test]
    fn test_aliases_survive_covering_insert() {
        let mut tree = SearchTree::new(6).unwrap();
        tree.insert("::/0".parse().unwrap(), &s("default"), MergeStrategy::Replace)
            .unwrap();
        assert!(tree
            .insert("::ffff:0:0/96".parse().unwrap(), &s("mapped"), MergeStrategy::Replace)
            .is_err());
        assert!(tree
            .insert("2002:1::/32".parse().unwrap(), &s("6to4"), MergeStrategy::Replace)
            .is_err());
        tree.insert("1.1.1.0/24".parse().unwrap(), &s("one"), MergeStrategy::Replace)
            .unwrap();

        assert_eq!(tree.lookup("2001:db8::1".parse().unwrap()), Some(&s("default")));
        assert_eq!(tree.lookup("::ffff:1.1.1.1".parse().unwrap()), Some(&s("one")));
        assert_eq!(tree.lookup("2002:808:808::".parse().unwrap()), Some(&s("default")));
    }

    #[test]
    fn test_encode_record_sizes() {
        let mut tree = SearchTree::new(6).unwrap();
        tree.insert("0.0.0.0/0".parse().unwrap(), &s("all"), MergeStrategy::Replace)
            .unwrap();
        // 109 alias nodes, then 15 more to reach ::/96
        let nodes = tree.node_count();
        assert_eq!(nodes, 124);

        for (record_size, node_bytes) in [(24u16, 6usize), (28, 7), (32, 8)] {
            let mut data = DataSection::new();
            let bytes = tree.encode(record_size, &mut data).unwrap();
            assert_eq!(bytes.len(), nodes * node_bytes);
        }

        let mut data = DataSection::new();
        assert!(tree.encode(20, &mut data).is_err());
        assert!(SearchTree::new(5).is_err());
    }
}
