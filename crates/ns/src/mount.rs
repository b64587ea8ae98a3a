//! Mount table entries (spec §3/§4.4, grounded on `Mount`/`Mhead` and
//! `cmount`/`cunmount` in the original `chan.c`).
//!
//! A [`MountHead`] owns the ordered union list standing in for one entry of
//! the per-process namespace hash, keyed by the identity of the channel it
//! replaces (`from`). [`MountHeadRef`] is the shared handle processes and
//! channels hold; like [`crate::channel::Channel`] it tracks an explicit
//! [`RefCount`] in lockstep with its `Arc`, because `Pgrp::cunmount`'s
//! "unlink from the namespace hash only once the last user lets go" needs
//! the precise post-decrement count, not merely eventual `Drop`.

use std::sync::Arc;

use parking_lot::RwLock;

use ns_util::RefCount;

use crate::channel::Channel;

bitflags::bitflags! {
    /// Mount/bind option flags (spec §3, `Mount.mflag`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MountFlags: u32 {
        /// New elements created in the union are created here.
        const MCREATE = 0b0001;
        /// Caching is permitted (vs. `MCACHE`-less pass-through).
        const MCACHE  = 0b0010;
        /// Replace, rather than union with, the prior binding.
        const MREPL   = 0b0100;
        /// Insert before the existing union members.
        const MBEFORE = 0b1000;
        /// Insert after the existing union members (the default).
        const MAFTER  = 0b0001_0000;
    }
}

/// One member of a union mount.
pub struct Mount {
    pub to: Channel,
    pub flag: MountFlags,
    pub mount_id: u64,
}

struct MountHeadInner {
    from: Option<Channel>,
    mounts: RwLock<Vec<Mount>>,
    refs: RefCount,
}

impl Drop for MountHeadInner {
    fn drop(&mut self) {
        if self.refs.get() > 0 {
            tracing::error!(
                "mount head dropped with outstanding logical references (missing release())"
            );
        }
        if !self.mounts.read().is_empty() {
            tracing::error!("mount head dropped while still holding union members");
        }
        // Destruction releases `from` (spec §3), mirroring `PathInner`'s
        // release of its trail entries.
        if let Some(from) = self.from.take() {
            from.close();
        }
    }
}

/// A shared handle to one namespace-hash entry.
pub struct MountHeadRef(Arc<MountHeadInner>);

impl Clone for MountHeadRef {
    fn clone(&self) -> Self {
        self.0.refs.incref();
        MountHeadRef(Arc::clone(&self.0))
    }
}

impl MountHeadRef {
    /// Creates a fresh, empty mount head over `from` (`newmhead`).
    pub fn new(from: Channel) -> Self {
        Self(Arc::new(MountHeadInner {
            from: Some(from),
            mounts: RwLock::new(Vec::new()),
            refs: RefCount::new(),
        }))
    }

    pub fn from_channel(&self) -> &Channel {
        self.0
            .from
            .as_ref()
            .expect("from is only taken by MountHeadInner::drop")
    }

    pub fn is_empty(&self) -> bool {
        self.0.mounts.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.mounts.read().len()
    }

    /// Inserts `mount` at the front or back of the union list, per
    /// `MBEFORE`/`MAFTER` (`cmount`'s insertion step).
    pub fn insert(&self, mount: Mount) {
        let mut mounts = self.0.mounts.write();
        if mount.flag.contains(MountFlags::MBEFORE) {
            mounts.insert(0, mount);
        } else {
            mounts.push(mount);
        }
    }

    /// Replaces the whole union (`MREPL`), returning the displaced members
    /// so the caller can release them.
    pub fn replace(&self, mount: Mount) -> Vec<Mount> {
        self.replace_many(vec![mount])
    }

    /// As [`MountHeadRef::replace`], but installs a whole chain at once (the
    /// replicated-union case in `cmount` step 4, when `new` itself carried
    /// an inherited union head).
    pub fn replace_many(&self, chain: Vec<Mount>) -> Vec<Mount> {
        let mut mounts = self.0.mounts.write();
        std::mem::replace(&mut *mounts, chain)
    }

    /// True if any current union member already carries `MCREATE`
    /// (`cmount`'s "don't add `MCREATE` atop an existing union unless it
    /// already has one" rule).
    pub fn has_mcreate(&self) -> bool {
        self.0
            .mounts
            .read()
            .iter()
            .any(|m| m.flag.contains(MountFlags::MCREATE))
    }

    /// First union member whose `to` matches `target` by identity, or whose
    /// `to.mchan` does (the mount-source indirection `cunmount` also
    /// accepts), used to find the entry being unmounted.
    pub fn remove_matching(&self, target: &Channel) -> Option<Mount> {
        let mut mounts = self.0.mounts.write();
        let pos = mounts
            .iter()
            .position(|m| m.to.identity_eq(target) || m.to.mchan_identity_eq(target))?;
        Some(mounts.remove(pos))
    }

    /// Removes every union member (a bare `unmount` of everything bound at
    /// this point, as `cunmount` performs when no specific target is
    /// given).
    pub fn remove_all(&self) -> Vec<Mount> {
        std::mem::take(&mut *self.0.mounts.write())
    }

    /// Snapshot of the union members' target channels, in order, for the
    /// walker's union fallback.
    pub fn union_targets(&self) -> Vec<Channel> {
        self.0
            .mounts
            .read()
            .iter()
            .map(|m| m.to.clone_ref())
            .collect()
    }

    /// The first union member's target, cloned — where a forward mount
    /// crossing lands (`domount`'s "take one reference on its first
    /// `Mount.to`").
    pub fn first_target(&self) -> Option<Channel> {
        self.0.mounts.read().first().map(|m| m.to.clone_ref())
    }

    /// The first union member flagged `MCREATE`, cloned — where `namec`'s
    /// `Acreate` sends a new file when the parent directory is itself a
    /// union (`createdir`).
    pub fn first_mcreate_target(&self) -> Option<Channel> {
        self.0
            .mounts
            .read()
            .iter()
            .find(|m| m.flag.contains(MountFlags::MCREATE))
            .map(|m| m.to.clone_ref())
    }

    /// Releases one logical reference. Callers must drop every clone
    /// through this rather than simply letting the value go out of scope,
    /// mirroring `putmhead`.
    pub fn release(self) {
        self.0.refs.decref();
    }
}
