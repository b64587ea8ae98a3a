//! Per-process namespace: the mount-point hash and the mount/unmount entry
//! points (spec §3 "Pgrp"/§4.4, grounded on `pgrp->ns`, `cmount`, `cunmount`,
//! `findmount`, `domount`, `undomount` in the original `chan.c`).
//!
//! Lock ordering: [`Pgrp`]'s namespace hash (`ns`) is always acquired
//! *before* any individual [`MountHeadRef`]'s internal union-list lock.
//! Nothing in this module ever holds a mount head's lock while trying to
//! acquire `ns`, which is the one invariant the original's comments call
//! out explicitly ("drop pgrp->ns before you look at a mount head").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::channel::Channel;
use crate::error::{NsError, NsErrorKind, NsResult};
use crate::mount::{Mount, MountFlags, MountHeadRef};
use crate::path::Path;

type NsKey = (u16, u32, u64);

fn key_of(c: &Channel) -> NsKey {
    (c.type_id(), c.dev_id(), c.qid().path)
}

/// Device letters permitted when a `Pgrp`'s `noattach` flag is set (spec
/// §4.7): pipes, environment, exported/captured fds, the process
/// filesystem — enough to run a sandboxed program without giving it
/// `#s`/`#S`-style access to raw storage or network devices.
pub const NOATTACH_WHITELIST: &[char] = &['|', 'd', 'e', 'c', 'p'];

/// A process group's private namespace: which channels have something
/// mounted or bound over them, and in what order the union resolves.
pub struct Pgrp {
    ns: RwLock<HashMap<NsKey, MountHeadRef>>,
    next_mount_id: AtomicU64,
    noattach: AtomicBool,
}

impl Default for Pgrp {
    fn default() -> Self {
        Self::new()
    }
}

impl Pgrp {
    pub fn new() -> Self {
        Self {
            ns: RwLock::new(HashMap::new()),
            next_mount_id: AtomicU64::new(0),
            noattach: AtomicBool::new(false),
        }
    }

    /// Sandboxes this namespace: subsequent `#`-device attaches are
    /// restricted to [`NOATTACH_WHITELIST`].
    pub fn set_noattach(&self, value: bool) {
        self.noattach.store(value, Ordering::SeqCst);
    }

    pub fn noattach(&self) -> bool {
        self.noattach.load(Ordering::SeqCst)
    }

    /// Looks up the mount head standing over `c`, if any (`findmount`).
    pub fn findmount(&self, c: &Channel) -> Option<MountHeadRef> {
        self.ns.read().get(&key_of(c)).cloned()
    }

    /// Binds or mounts `new` over `old` (`cmount`). Returns the mount id
    /// assigned to the new union member, used by callers that need to
    /// later identify exactly this binding among several unioned at the
    /// same point.
    pub fn cmount(&self, new: &Channel, old: &Channel, flag: MountFlags) -> NsResult<u64> {
        if !old.is_dir() && !flag.contains(MountFlags::MREPL) {
            return Err(NsError::bare(NsErrorKind::MountConflict));
        }
        if old.is_dir() != new.is_dir() {
            return Err(NsError::bare(NsErrorKind::MountConflict));
        }

        let key = key_of(old);
        let mut ns = self.ns.write();

        // Validate before taking any reference on `new` (or its inherited
        // union members): an early return here must leave both channels'
        // reference counts untouched.
        if !flag.contains(MountFlags::MREPL) {
            if let Some(head) = ns.get(&key) {
                if flag.contains(MountFlags::MCREATE) && head.len() > 1 && !head.has_mcreate() {
                    return Err(NsError::bare(NsErrorKind::MountConflict));
                }
            }
        }

        let mount_id = self.next_mount_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut chain = vec![Mount {
            to: new.clone_ref(),
            flag,
            mount_id,
        }];

        // Step 4: if `new` carries an inherited union head, replicate its
        // members beyond the first into the chain following `nm`. A caller
        // asking for `MREPL` only wants the *primary* entry to replace;
        // the replicated tail uses `MAFTER` so it doesn't itself replace.
        if let Some(inherited) = new.umh() {
            let extra_flag = if flag.contains(MountFlags::MREPL) {
                MountFlags::MAFTER
            } else {
                flag
            };
            for extra in inherited.union_targets().into_iter().skip(1) {
                let extra_id = self.next_mount_id.fetch_add(1, Ordering::SeqCst) + 1;
                chain.push(Mount {
                    to: extra,
                    flag: extra_flag,
                    mount_id: extra_id,
                });
            }
        }

        match ns.get(&key) {
            Some(head) => {
                if flag.contains(MountFlags::MREPL) {
                    let displaced = head.replace_many(chain);
                    drop(ns);
                    for m in displaced {
                        m.to.close();
                    }
                } else {
                    for m in chain {
                        head.insert(m);
                    }
                }
            }
            None => {
                let head = MountHeadRef::new(old.clone_ref());
                // A fresh, non-replacing mount point must still let the
                // original directory be seen via the union (seed it back
                // in before the caller's new entries).
                if !flag.contains(MountFlags::MREPL) {
                    let seed_id = self.next_mount_id.fetch_add(1, Ordering::SeqCst) + 1;
                    head.insert(Mount {
                        to: old.clone_ref(),
                        flag: MountFlags::empty(),
                        mount_id: seed_id,
                    });
                }
                for m in chain {
                    head.insert(m);
                }
                ns.insert(key, head);
            }
        }
        old.set_mount_point(true);
        tracing::debug!(mount_id, flag = ?flag, "mounted");
        Ok(mount_id)
    }

    /// Removes `target`'s binding over `mnt`, or every binding over `mnt`
    /// if `target` is `None` (`cunmount`). Once the union list at `mnt`
    /// empties, the mount head is unlinked from the namespace hash and
    /// released.
    pub fn cunmount(&self, mnt: &Channel, target: Option<&Channel>) -> NsResult<()> {
        let key = key_of(mnt);
        let removed;
        let should_unlink;
        {
            let ns = self.ns.read();
            let head = ns
                .get(&key)
                .ok_or_else(|| NsError::bare(NsErrorKind::UnmountNotFound))?
                .clone();
            removed = match target {
                Some(target) => head
                    .remove_matching(target)
                    .map(|m| vec![m])
                    .ok_or_else(|| NsError::bare(NsErrorKind::UnmountNotFound))?,
                None => head.remove_all(),
            };
            should_unlink = head.is_empty();
            head.release();
        }
        if should_unlink {
            let mut ns = self.ns.write();
            if let Some(head) = ns.remove(&key) {
                if head.is_empty() {
                    mnt.set_mount_point(false);
                    head.release();
                } else {
                    // Raced with a concurrent mount; put it back.
                    ns.insert(key, head);
                }
            }
        }
        tracing::debug!(count = removed.len(), "unmounted");
        for m in removed {
            m.to.close();
        }
        Ok(())
    }

    /// Crosses a mount point forward: if `c` has something mounted over
    /// it, returns the union's head and records the crossing at the path's
    /// current last element so a later `..` can undo it (`domount`, folded
    /// into the walker's per-element loop in the original). Callers must
    /// have already pushed the element name onto `path` via
    /// [`Path::add_elem`] before crossing.
    pub fn domount(&self, c: &Channel, path: &mut Path) -> Option<MountHeadRef> {
        let head = self.findmount(c)?;
        path.set_last_crossed(c.clone_ref());
        Some(head)
    }

    /// Reverses [`Pgrp::domount`] when `..` walks back across a mount
    /// boundary, handing back the channel that was mounted over
    /// (`undomount`/`fixdotdotname`).
    pub fn undomount(&self, path: &mut Path) -> Option<Channel> {
        path.pop_elem()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelPool;
    use crate::qid::{Qid, QidType};
    use crate::device::Device as _;
    use crate::testutil::MemDevice;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn chan(pool: &Arc<ChannelPool>, device: &Arc<MemDevice>, path_num: u64, dir: bool) -> Channel {
        let kind = if dir { QidType::DIR } else { QidType::FILE };
        Channel::new(
            Arc::clone(pool),
            Arc::clone(device) as Arc<dyn crate::device::Device>,
            device.type_id(),
            0,
            Qid::new(path_num, 0, kind),
            Path::root(),
        )
    }

    #[test]
    fn mount_then_find_then_unmount() {
        let pool = ChannelPool::new();
        let device = MemDevice::arc();
        let pgrp = Pgrp::new();

        let old = chan(&pool, &device, 1, true);
        let new = chan(&pool, &device, 2, true);
        let new_dup = new.clone_ref();

        pgrp.cmount(&new, &old, MountFlags::MAFTER).unwrap();
        let head = pgrp.findmount(&old).unwrap();
        // MAFTER on a fresh mount point seeds the original directory back
        // into the union, so a lookup that misses in `new` still finds
        // whatever `old` already had.
        assert_eq!(head.len(), 2);
        assert!(old.is_mount_point());

        pgrp.cunmount(&old, Some(&new_dup)).unwrap();
        // The seeded entry is still there: one real binding was removed,
        // not the whole union.
        assert!(pgrp.findmount(&old).is_some());
        assert!(old.is_mount_point());

        pgrp.cunmount(&old, None).unwrap();
        assert!(pgrp.findmount(&old).is_none());
        assert!(!old.is_mount_point());

        new_dup.close();
        new.close();
        old.close();
    }

    #[test]
    fn mcreate_refused_atop_existing_union_without_mcreate() {
        let pool = ChannelPool::new();
        let device = MemDevice::arc();
        let pgrp = Pgrp::new();

        let old = chan(&pool, &device, 1, true);
        let a = chan(&pool, &device, 2, true);
        let b = chan(&pool, &device, 3, true);

        pgrp.cmount(&a, &old, MountFlags::MAFTER).unwrap();
        // union is now [seed(old), a] — two members, neither MCREATE.
        let b_refs_before = b.ref_count();
        let err = pgrp
            .cmount(&b, &old, MountFlags::MAFTER | MountFlags::MCREATE)
            .unwrap_err();
        assert_eq!(err.kind, NsErrorKind::MountConflict);
        // A rejected mount must not have taken a reference on `b`.
        assert_eq!(b.ref_count(), b_refs_before);

        pgrp.cunmount(&old, None).unwrap();
        a.close();
        b.close();
        old.close();
    }

    #[test]
    fn dir_bit_mismatch_is_rejected() {
        let pool = ChannelPool::new();
        let device = MemDevice::arc();
        let pgrp = Pgrp::new();

        let old = chan(&pool, &device, 1, true);
        let new = chan(&pool, &device, 2, false);
        let err = pgrp.cmount(&new, &old, MountFlags::MAFTER).unwrap_err();
        assert_eq!(err.kind, NsErrorKind::MountConflict);

        new.close();
        old.close();
    }

    #[test]
    fn unmount_without_matching_binding_errors() {
        let pool = ChannelPool::new();
        let device = MemDevice::arc();
        let pgrp = Pgrp::new();
        let old = chan(&pool, &device, 1, true);
        let err = pgrp.cunmount(&old, None).unwrap_err();
        assert_eq!(err.kind, NsErrorKind::UnmountNotFound);
        old.close();
    }
}
