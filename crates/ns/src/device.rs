//! The device table contract (spec §6). Devices are external collaborators:
//! this crate only consumes the trait below. `crate::testutil::MemDevice` is
//! a concrete test double, not a production device.

use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;

use crate::channel::{Channel, ChannelInner};
use crate::error::{NsError, NsErrorKind, NsResult};
use crate::qid::Qid;

/// The directory bit of a `perm` argument to `create` (Plan 9's `DMDIR`).
/// Lives here, rather than in `namec`, because devices need to agree on the
/// same bit when deciding what kind of node they just made.
pub const DMDIR: u32 = 0o40000;

bitflags! {
    /// Open-mode bits, independent of the access-mode enum (`Amode`) that
    /// drives `namec`'s dispatch. Mirrors the low bits of Plan 9's `omode`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenMode: u32 {
        const READ    = 0b0000_0001;
        const WRITE   = 0b0000_0010;
        const EXEC    = 0b0000_0100;
        const TRUNC   = 0b0000_1000;
        const EXCL    = 0b0001_0000;
        /// Close-on-exec.
        const CEXEC   = 0b0010_0000;
        /// Remove-on-close.
        const RCLOSE  = 0b0100_0000;
    }
}

/// The result of a device walk: either a short/failed walk (fewer qids than
/// requested, `clone` absent) or a full walk, optionally producing a fresh
/// channel (`clone`) standing at the final element.
#[derive(Debug)]
pub struct Walkqid {
    pub clone: Option<Channel>,
    pub qids: Vec<Qid>,
}

impl Walkqid {
    pub fn empty() -> Self {
        Self {
            clone: None,
            qids: Vec::new(),
        }
    }
}

/// The contract a device (a directory subtree backed by some storage or
/// service) must satisfy. Devices are looked up and invoked by the walker
/// and dispatcher; how a device implements its own tree is entirely its own
/// business.
pub trait Device: Send + Sync {
    /// The device-table index this device occupies; used for
    /// `(type, dev)`-based channel identity comparisons.
    fn type_id(&self) -> u16;

    fn reset(&self) {}
    fn init(&self) {}
    fn shutdown(&self) {}

    /// Attach to (the root of) a device instance named by `spec`.
    fn attach(&self, spec: &str) -> NsResult<Channel>;

    /// Walk `names` from `c`. A short walk (fewer qids than `names.len()`
    /// with no `clone`) signals partial failure; see the walker (§4.6) for
    /// how that's interpreted.
    fn walk(&self, c: &Channel, names: &[&str]) -> NsResult<Walkqid>;

    fn open(&self, c: Channel, mode: OpenMode) -> NsResult<Channel>;

    fn create(&self, c: Channel, name: &str, mode: OpenMode, perm: u32) -> NsResult<Channel>;

    /// Called exactly once, when the channel's last reference is dropped.
    /// Device errors here are logged, never propagated (spec §4.2). Takes
    /// the raw channel state rather than a `Channel` handle because by the
    /// time this runs no live handle exists any more.
    fn close(&self, c: &ChannelInner);

    fn stat(&self, c: &Channel, buf: &mut [u8]) -> NsResult<usize>;

    fn remove(&self, c: Channel) -> NsResult<()>;
}

/// The device table `namec` consults when a name begins with `#<letter>`
/// (spec §4.7/§6): a registry from device letter to the device instance
/// that letter attaches to. The letter `/` is reserved for the root
/// filesystem device by convention, mirroring the original kernel's
/// `devno('/', ...)`.
#[derive(Default)]
pub struct DeviceTable {
    by_letter: HashMap<char, Arc<dyn Device>>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self {
            by_letter: HashMap::new(),
        }
    }

    /// Registers `device` under `letter`. A later call with the same
    /// letter replaces the earlier registration.
    pub fn register(&mut self, letter: char, device: Arc<dyn Device>) {
        self.by_letter.insert(letter, device);
    }

    /// Looks up the device attached to `letter`, failing `BadSharp` on a
    /// miss (`devno`'s failure mode).
    pub fn lookup(&self, letter: char) -> NsResult<Arc<dyn Device>> {
        self.by_letter
            .get(&letter)
            .cloned()
            .ok_or_else(|| NsError::bare(NsErrorKind::BadSharp(letter)))
    }
}
