//! [`MemDevice`]: an in-memory test double implementing [`Device`], used by
//! this crate's own tests and available to downstream crates (`ns-cli`)
//! that want a namespace to play with without a real backing store.
//!
//! This is deliberately not a production device: no permissions, no
//! concurrency tuning beyond correctness, one flat tree. Devices proper are
//! external collaborators (spec §1 non-goals); this module exists purely
//! to make the resolver's own logic testable in isolation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::channel::{Channel, ChannelInner, ChannelPool};
use crate::device::{Device, OpenMode, Walkqid, DMDIR};
use crate::error::{NsError, NsErrorKind, NsResult};
use crate::path::Path;
use crate::qid::{Qid, QidType};

struct Node {
    qid: Qid,
    children: HashMap<String, u64>,
    data: Vec<u8>,
}

struct Tree {
    nodes: HashMap<u64, Node>,
    next_path: AtomicU64,
}

impl Tree {
    fn alloc_path(&self) -> u64 {
        self.next_path.fetch_add(1, Ordering::SeqCst)
    }
}

const MEM_DEVICE_TYPE: u16 = 1;

/// A single-tenant in-memory filesystem, standing in for a real device in
/// tests. Always reached through [`Arc<dyn Device>`]; construct with
/// [`MemDevice::arc`], not a bare `new`, since devices hand out channels
/// that carry a clone of their own `Arc<dyn Device>`.
pub struct MemDevice {
    self_handle: Weak<dyn Device>,
    pool: Arc<ChannelPool>,
    tree: Mutex<Tree>,
}

impl MemDevice {
    pub fn arc() -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<MemDevice>| {
            let self_handle: Weak<dyn Device> = weak.clone();
            let mut nodes = HashMap::new();
            nodes.insert(
                0,
                Node {
                    qid: Qid::new(0, 0, QidType::DIR),
                    children: HashMap::new(),
                    data: Vec::new(),
                },
            );
            Self {
                self_handle,
                pool: ChannelPool::new(),
                tree: Mutex::new(Tree {
                    nodes,
                    next_path: AtomicU64::new(1),
                }),
            }
        })
    }

    fn device_handle(&self) -> Arc<dyn Device> {
        self.self_handle
            .upgrade()
            .expect("MemDevice outlived by a channel it issued")
    }

    pub fn pool(&self) -> Arc<ChannelPool> {
        Arc::clone(&self.pool)
    }

    /// Test helper: creates a directory at `parent_path`/`name`, returning
    /// its qid path.
    pub fn mkdir(&self, parent_path: u64, name: &str) -> u64 {
        let mut tree = self.tree.lock();
        let new_path = tree.alloc_path();
        tree.nodes.insert(
            new_path,
            Node {
                qid: Qid::new(new_path, 0, QidType::DIR),
                children: HashMap::new(),
                data: Vec::new(),
            },
        );
        tree.nodes
            .get_mut(&parent_path)
            .expect("parent must exist")
            .children
            .insert(name.to_string(), new_path);
        new_path
    }

    /// Test helper: creates a file at `parent_path`/`name` with `data`.
    pub fn touch(&self, parent_path: u64, name: &str, data: &[u8]) -> u64 {
        let mut tree = self.tree.lock();
        let new_path = tree.alloc_path();
        tree.nodes.insert(
            new_path,
            Node {
                qid: Qid::new(new_path, 0, QidType::FILE),
                children: HashMap::new(),
                data: data.to_vec(),
            },
        );
        tree.nodes
            .get_mut(&parent_path)
            .expect("parent must exist")
            .children
            .insert(name.to_string(), new_path);
        new_path
    }
}

impl Device for MemDevice {
    fn type_id(&self) -> u16 {
        MEM_DEVICE_TYPE
    }

    fn attach(&self, _spec: &str) -> NsResult<Channel> {
        let tree = self.tree.lock();
        let qid = tree.nodes[&0].qid;
        drop(tree);
        Ok(Channel::new(
            Arc::clone(&self.pool),
            self.device_handle(),
            MEM_DEVICE_TYPE,
            0,
            qid,
            Path::root(),
        ))
    }

    fn walk(&self, c: &Channel, names: &[&str]) -> NsResult<Walkqid> {
        let tree = self.tree.lock();
        let mut cur = c.qid().path;
        let mut qids = Vec::with_capacity(names.len());
        for name in names {
            let node = tree
                .nodes
                .get(&cur)
                .ok_or_else(|| NsError::bare(NsErrorKind::DoesNotExist))?;
            let next = match node.children.get(*name) {
                Some(p) => *p,
                None => break,
            };
            cur = next;
            qids.push(tree.nodes[&cur].qid);
        }
        if qids.len() < names.len() {
            return Ok(Walkqid { clone: None, qids });
        }
        let final_qid = tree.nodes[&cur].qid;
        drop(tree);
        let clone = Channel::new(
            Arc::clone(&self.pool),
            self.device_handle(),
            MEM_DEVICE_TYPE,
            0,
            final_qid,
            c.path(),
        );
        Ok(Walkqid {
            clone: Some(clone),
            qids,
        })
    }

    fn open(&self, c: Channel, _mode: OpenMode) -> NsResult<Channel> {
        Ok(c)
    }

    fn create(&self, c: Channel, name: &str, _mode: OpenMode, perm: u32) -> NsResult<Channel> {
        let is_dir = perm & DMDIR != 0;
        let parent_path = c.qid().path;
        let mut tree = self.tree.lock();
        if tree.nodes[&parent_path].children.contains_key(name) {
            drop(tree);
            c.close();
            return Err(NsError::bare(NsErrorKind::Exists));
        }
        let new_path = tree.alloc_path();
        let kind = if is_dir { QidType::DIR } else { QidType::FILE };
        let qid = Qid::new(new_path, 0, kind);
        tree.nodes.insert(
            new_path,
            Node {
                qid,
                children: HashMap::new(),
                data: Vec::new(),
            },
        );
        tree.nodes
            .get_mut(&parent_path)
            .unwrap()
            .children
            .insert(name.to_string(), new_path);
        drop(tree);
        let mut path = c.path();
        path.add_elem(name, None);
        c.close();
        Ok(Channel::new(
            Arc::clone(&self.pool),
            self.device_handle(),
            MEM_DEVICE_TYPE,
            0,
            qid,
            path,
        ))
    }

    fn close(&self, _c: &ChannelInner) {}

    fn stat(&self, c: &Channel, buf: &mut [u8]) -> NsResult<usize> {
        let tree = self.tree.lock();
        let node = tree
            .nodes
            .get(&c.qid().path)
            .ok_or_else(|| NsError::bare(NsErrorKind::DoesNotExist))?;
        let n = node.data.len().min(buf.len());
        buf[..n].copy_from_slice(&node.data[..n]);
        Ok(n)
    }

    fn remove(&self, c: Channel) -> NsResult<()> {
        let mut tree = self.tree.lock();
        let path = c.qid().path;
        if tree.nodes.get(&path).map(|n| !n.children.is_empty()) == Some(true) {
            drop(tree);
            c.close();
            return Err(NsError::bare(NsErrorKind::NotDirectory));
        }
        tree.nodes.remove(&path);
        drop(tree);
        c.close();
        Ok(())
    }
}
