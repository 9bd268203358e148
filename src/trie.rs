//! Grid-of-tries IP filter matcher.
//!
//! Grounded on `tseries/DSTries.c`: a destination-prefix binary trie of
//! depth 32, where every node a filter's destination prefix bottoms out at
//! owns its own source-prefix binary trie. `ancestor` back-pointers on
//! source nodes let a query report every enclosing (less-specific) filter
//! in addition to the most specific match, in `O(32)` regardless of how
//! many filters are loaded.

use std::net::Ipv4Addr;

const TREE_DEPTH: u32 = 32;

/// One loaded filter: a source and destination network/mask pair.
#[derive(Clone, Copy, Debug)]
pub struct Filter {
    pub id: u32,
    pub src_ip: u32,
    pub src_mask: u32,
    pub dst_ip: u32,
    pub dst_mask: u32,
}

impl Filter {
    pub fn new(id: u32, src_ip: Ipv4Addr, src_mask: Ipv4Addr, dst_ip: Ipv4Addr, dst_mask: Ipv4Addr) -> Filter {
        Filter {
            id,
            src_ip: u32::from(src_ip),
            src_mask: u32::from(src_mask),
            dst_ip: u32::from(dst_ip),
            dst_mask: u32::from(dst_mask),
        }
    }
}

/// Bit `i` (0 = most significant) of a 32-bit address in network order.
fn bit_at(value: u32, i: u32) -> usize {
    ((value >> (TREE_DEPTH - 1 - i)) & 1) as usize
}

struct DstNode {
    id: u32,
    child: [Option<usize>; 2],
    src_root: Option<usize>,
}

struct SrcNode {
    dst_id: u32,
    child: [Option<usize>; 2],
    filter_id: Option<u32>,
    ancestor: Option<usize>,
}

/// The dual binary trie. Built once from a filter list (`build`), then
/// queried read-only (`lookup`).
pub struct GridOfTries {
    dst_nodes: Vec<DstNode>,
    src_nodes: Vec<SrcNode>,
    next_dst_id: u32,
}

impl GridOfTries {
    fn new() -> GridOfTries {
        GridOfTries {
            dst_nodes: vec![DstNode {
                id: 0,
                child: [None, None],
                src_root: None,
            }],
            src_nodes: Vec::new(),
            next_dst_id: 1,
        }
    }

    /// Builds a trie from `filters`, sorted by decreasing destination-mask
    /// length first (`DSTries_sort_filterList`) so that more specific
    /// destination prefixes are always inserted, and thus linked, after
    /// their enclosing ones.
    pub fn build(mut filters: Vec<Filter>) -> GridOfTries {
        filters.sort_by_key(|f| std::cmp::Reverse(f.dst_mask.count_ones()));
        let mut trie = GridOfTries::new();
        for filter in filters {
            trie.insert(filter);
        }
        trie
    }

    fn insert(&mut self, filter: Filter) {
        let dst_len = filter.dst_mask.count_ones();
        let mut cur_dst = 0usize;
        for i in 0..dst_len {
            let bit = bit_at(filter.dst_ip, i);
            if self.dst_nodes[cur_dst].child[bit].is_none() {
                let id = self.next_dst_id;
                self.next_dst_id += 1;
                self.dst_nodes.push(DstNode {
                    id,
                    child: [None, None],
                    src_root: None,
                });
                let new_idx = self.dst_nodes.len() - 1;
                self.dst_nodes[cur_dst].child[bit] = Some(new_idx);
            }
            cur_dst = self.dst_nodes[cur_dst].child[bit].unwrap();
        }

        if self.dst_nodes[cur_dst].src_root.is_none() {
            let dst_id = self.dst_nodes[cur_dst].id;
            self.src_nodes.push(SrcNode {
                dst_id,
                child: [None, None],
                filter_id: None,
                ancestor: None,
            });
            self.dst_nodes[cur_dst].src_root = Some(self.src_nodes.len() - 1);
        }
        let src_root = self.dst_nodes[cur_dst].src_root.unwrap();

        let src_len = filter.src_mask.count_ones();
        let mut cur_src = src_root;
        for i in 0..src_len {
            let bit = bit_at(filter.src_ip, i);
            if self.src_nodes[cur_src].child[bit].is_none() {
                let dst_id = self.src_nodes[src_root].dst_id;
                self.src_nodes.push(SrcNode {
                    dst_id,
                    child: [None, None],
                    filter_id: None,
                    ancestor: None,
                });
                let new_idx = self.src_nodes.len() - 1;
                self.src_nodes[cur_src].child[bit] = Some(new_idx);
            }
            cur_src = self.src_nodes[cur_src].child[bit].unwrap();
        }

        if self.src_nodes[cur_src].filter_id.is_none() {
            self.src_nodes[cur_src].filter_id = Some(filter.id);
            self.link_children(cur_dst, src_root, &filter);
        }
    }

    /// Propagates the newly-inserted filter's source subtree down into
    /// every already-built, more-specific destination subtree that doesn't
    /// already override it, setting `ancestor` back-pointers where it does.
    /// Mirrors `DSTries_link_childs`.
    fn link_children(&mut self, cur_dst: usize, ancestor_src_root: usize, filter: &Filter) {
        for bit in 0..2 {
            let child_dst = match self.dst_nodes[cur_dst].child[bit] {
                Some(idx) => idx,
                None => continue,
            };

            match self.dst_nodes[child_dst].src_root {
                Some(mut cur_src) => {
                    let mut cur_anc_src = ancestor_src_root;
                    let mut j = 0u32;
                    while j < TREE_DEPTH
                        && bit_at(filter.src_mask, j) == 1
                        && self.src_nodes[cur_src].dst_id != self.src_nodes[cur_anc_src].dst_id
                    {
                        if self.src_nodes[cur_src].ancestor.is_none() {
                            self.src_nodes[cur_src].ancestor = Some(cur_anc_src);
                        }
                        let src_bit = bit_at(filter.src_ip, j);
                        if self.src_nodes[cur_src].child[src_bit].is_none() {
                            self.src_nodes[cur_src].child[src_bit] =
                                self.src_nodes[cur_anc_src].child[src_bit];
                            break;
                        }
                        cur_src = self.src_nodes[cur_src].child[src_bit].unwrap();
                        cur_anc_src = self.src_nodes[cur_anc_src].child[src_bit].unwrap();
                        j += 1;
                    }
                    if self.src_nodes[cur_src].dst_id != self.src_nodes[cur_anc_src].dst_id
                        && self.src_nodes[cur_src].ancestor.is_none()
                    {
                        self.src_nodes[cur_src].ancestor = Some(cur_anc_src);
                    }
                }
                None => {
                    self.dst_nodes[child_dst].src_root = Some(ancestor_src_root);
                }
            }

            self.link_children(child_dst, ancestor_src_root, filter);
        }
    }

    /// Reports every filter matching `(src_ip, dst_ip)`: the deepest
    /// destination/source match plus every enclosing filter along the
    /// `ancestor` chain at each visited source node. `O(32)` per call.
    /// Mirrors `DSTries_filter`.
    pub fn lookup(&self, src_ip: u32, dst_ip: u32, mut callback: impl FnMut(u32)) {
        let mut cur_dst = 0usize;
        for i in 0..TREE_DEPTH {
            let bit = bit_at(dst_ip, i);
            match self.dst_nodes[cur_dst].child[bit] {
                Some(next) => cur_dst = next,
                None => break,
            }
        }

        let mut cur_src = match self.dst_nodes[cur_dst].src_root {
            Some(s) => s,
            None => return,
        };
        for i in 0..=TREE_DEPTH {
            if let Some(fid) = self.src_nodes[cur_src].filter_id {
                callback(fid);
            }
            let mut ancestor = self.src_nodes[cur_src].ancestor;
            while let Some(a) = ancestor {
                if let Some(fid) = self.src_nodes[a].filter_id {
                    callback(fid);
                }
                ancestor = self.src_nodes[a].ancestor;
            }
            if i == TREE_DEPTH {
                break;
            }
            let bit = bit_at(src_ip, i);
            match self.src_nodes[cur_src].child[bit] {
                Some(next) => cur_src = next,
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn filter(id: u32, src: &str, src_mask: &str, dst: &str, dst_mask: &str) -> Filter {
        Filter::new(id, addr(src), addr(src_mask), addr(dst), addr(dst_mask))
    }

    #[test]
    fn exact_match_reports_single_filter() {
        let trie = GridOfTries::build(vec![filter(
            1,
            "10.0.0.1",
            "255.255.255.255",
            "192.168.0.1",
            "255.255.255.255",
        )]);
        let mut hits = Vec::new();
        trie.lookup(u32::from(addr("10.0.0.1")), u32::from(addr("192.168.0.1")), |id| {
            hits.push(id)
        });
        assert_eq!(hits, vec![1]);

        hits.clear();
        trie.lookup(u32::from(addr("10.0.0.2")), u32::from(addr("192.168.0.1")), |id| {
            hits.push(id)
        });
        assert!(hits.is_empty());
    }

    #[test]
    fn nested_prefixes_all_report_via_ancestor_chain() {
        let trie = GridOfTries::build(vec![
            filter(1, "10.0.0.0", "255.0.0.0", "0.0.0.0", "0.0.0.0"),
            filter(2, "10.1.0.0", "255.255.0.0", "0.0.0.0", "0.0.0.0"),
            filter(3, "10.1.2.0", "255.255.255.0", "0.0.0.0", "0.0.0.0"),
        ]);
        let mut hits = Vec::new();
        trie.lookup(u32::from(addr("10.1.2.3")), u32::from(addr("8.8.8.8")), |id| {
            hits.push(id)
        });
        hits.sort();
        assert_eq!(hits, vec![1, 2, 3]);

        hits.clear();
        trie.lookup(u32::from(addr("10.1.9.9")), u32::from(addr("8.8.8.8")), |id| {
            hits.push(id)
        });
        hits.sort();
        assert_eq!(hits, vec![1, 2]);

        hits.clear();
        trie.lookup(u32::from(addr("10.9.9.9")), u32::from(addr("8.8.8.8")), |id| {
            hits.push(id)
        });
        assert_eq!(hits, vec![1]);
    }

    #[test]
    fn destination_prefix_scopes_the_source_match() {
        let trie = GridOfTries::build(vec![
            filter(1, "0.0.0.0", "0.0.0.0", "192.168.1.0", "255.255.255.0"),
            filter(2, "10.0.0.0", "255.0.0.0", "192.168.0.0", "255.255.0.0"),
        ]);
        let mut hits = Vec::new();
        trie.lookup(
            u32::from(addr("10.1.2.3")),
            u32::from(addr("192.168.1.5")),
            |id| hits.push(id),
        );
        hits.sort();
        assert_eq!(hits, vec![1, 2]);

        hits.clear();
        trie.lookup(
            u32::from(addr("10.1.2.3")),
            u32::from(addr("192.168.2.5")),
            |id| hits.push(id),
        );
        assert_eq!(hits, vec![2]);
    }
}
