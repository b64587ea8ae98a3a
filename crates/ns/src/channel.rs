//! Channel: an opaque, reference-counted handle to an open file in a
//! device's tree (spec §3/§4.2).
//!
//! Ownership model: [`Channel`] wraps `Arc<ChannelInner>`, but — unlike a
//! plain `Arc` — it is not `Clone`. The only way to obtain a second handle
//! is [`Channel::clone_ref`], which bumps an explicit [`RefCount`] in
//! lockstep with the `Arc`'s own strong count. The explicit count is the
//! source of truth for the close protocol (call the device's `close` and
//! return the fid to the pool exactly when it reaches zero); the `Arc` is
//! only the memory-safety backstop. Keeping the two in lockstep lets every
//! duplication and release go through one audited path, matching the
//! spec's "strict ordering to avoid leaks and use-after-free" requirement,
//! while `ChannelInner::drop` logs loudly if the two ever disagree (a
//! missing `close()` call somewhere).

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use ns_util::RefCount;

use crate::device::Device;
use crate::mount::MountHeadRef;
use crate::path::Path;
use crate::qid::Qid;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChanFlags: u8 {
        /// Close-on-exec.
        const CCEXEC = 0b01;
        /// Remove-on-close.
        const RCLOSE = 0b10;
    }
}

/// A process-wide allocator of channel fids. Fids are permanent for the
/// lifetime of a channel and recycled (not the backing memory, just the
/// numeric id) once a channel fully closes, mirroring the spec's freelist
/// without requiring unsafe tricks to literally reuse a Rust allocation.
pub struct ChannelPool {
    next_fid: AtomicU64,
    free: Mutex<Vec<u64>>,
}

impl ChannelPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_fid: AtomicU64::new(0),
            free: Mutex::new(Vec::new()),
        })
    }

    fn alloc(&self) -> u64 {
        if let Some(fid) = self.free.lock().pop() {
            return fid;
        }
        self.next_fid.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn release(&self, fid: u64) {
        self.free.lock().push(fid);
    }

    /// Number of fids currently idle, for tests and diagnostics.
    pub fn idle_count(&self) -> usize {
        self.free.lock().len()
    }
}

pub struct ChannelInner {
    fid: u64,
    type_id: u16,
    dev_id: u32,
    device: Arc<dyn Device>,
    pool: Arc<ChannelPool>,
    refs: RefCount,

    pub(crate) qid: Mutex<Qid>,
    pub(crate) offset: AtomicU64,
    pub(crate) devoffset: AtomicU64,
    pub(crate) iounit: AtomicU32,
    pub(crate) flags: Mutex<ChanFlags>,
    pub(crate) path: Mutex<Path>,
    pub(crate) umh: Mutex<Option<MountHeadRef>>,
    pub(crate) umc: Mutex<Option<Channel>>,
    pub(crate) uri: AtomicUsize,
    pub(crate) dri: AtomicUsize,
    /// Directory-read rewind buffer. Populated and consumed by union
    /// directory listing, which is outside this core's scope (directory
    /// wire encoding is a non-goal) — kept only so the data model matches
    /// the spec; never read by resolver logic itself.
    pub(crate) dirrock: Mutex<Vec<u8>>,
    pub(crate) ismtpt: std::sync::atomic::AtomicBool,
    pub(crate) aux: Mutex<Option<Box<dyn Any + Send + Sync>>>,
    pub(crate) mchan: Mutex<Option<Channel>>,
    pub(crate) mqid: Mutex<Option<Qid>>,
}

impl ChannelInner {
    pub fn type_id(&self) -> u16 {
        self.type_id
    }

    pub fn dev_id(&self) -> u32 {
        self.dev_id
    }

    pub fn fid(&self) -> u64 {
        self.fid
    }

    pub fn qid(&self) -> Qid {
        *self.qid.lock()
    }

    pub fn is_mount_point(&self) -> bool {
        self.ismtpt.load(Ordering::SeqCst)
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        if self.refs.get() > 0 {
            tracing::error!(
                fid = self.fid,
                refs = self.refs.get(),
                "channel dropped without a matching close(); device.close() was never invoked"
            );
        }
    }
}

/// A handle to an open file. See the module documentation for the
/// ownership discipline.
pub struct Channel(Arc<ChannelInner>);

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Channel(fid={}, path={})",
            self.0.fid,
            self.0.path.lock().as_str()
        )
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.path.lock().as_str())
    }
}

impl Channel {
    /// Allocates a fresh channel. Called by devices from `attach`/`walk`/
    /// `create` when they need to hand back a new handle.
    pub fn new(
        pool: Arc<ChannelPool>,
        device: Arc<dyn Device>,
        type_id: u16,
        dev_id: u32,
        qid: Qid,
        path: Path,
    ) -> Self {
        let fid = pool.alloc();
        Self(Arc::new(ChannelInner {
            fid,
            type_id,
            dev_id,
            device,
            pool,
            refs: RefCount::new(),
            qid: Mutex::new(qid),
            offset: AtomicU64::new(0),
            devoffset: AtomicU64::new(0),
            iounit: AtomicU32::new(0),
            flags: Mutex::new(ChanFlags::empty()),
            path: Mutex::new(path),
            umh: Mutex::new(None),
            umc: Mutex::new(None),
            uri: AtomicUsize::new(0),
            dri: AtomicUsize::new(0),
            dirrock: Mutex::new(Vec::new()),
            ismtpt: std::sync::atomic::AtomicBool::new(false),
            aux: Mutex::new(None),
            mchan: Mutex::new(None),
            mqid: Mutex::new(None),
        }))
    }

    pub fn device(&self) -> Arc<dyn Device> {
        Arc::clone(&self.0.device)
    }

    pub fn inner(&self) -> &ChannelInner {
        &self.0
    }

    pub fn type_id(&self) -> u16 {
        self.0.type_id
    }

    pub fn dev_id(&self) -> u32 {
        self.0.dev_id
    }

    pub fn qid(&self) -> Qid {
        *self.0.qid.lock()
    }

    pub fn set_qid(&self, qid: Qid) {
        *self.0.qid.lock() = qid;
    }

    pub fn is_dir(&self) -> bool {
        self.qid().is_dir()
    }

    pub fn require_dir(&self) -> crate::error::NsResult<()> {
        if self.is_dir() {
            Ok(())
        } else {
            Err(crate::error::NsError::bare(
                crate::error::NsErrorKind::NotDirectory,
            ))
        }
    }

    pub fn path(&self) -> Path {
        self.0.path.lock().clone()
    }

    pub fn set_path(&self, path: Path) {
        *self.0.path.lock() = path;
    }

    pub fn flags(&self) -> ChanFlags {
        *self.0.flags.lock()
    }

    pub fn insert_flags(&self, flags: ChanFlags) {
        self.0.flags.lock().insert(flags);
    }

    pub fn is_mount_point(&self) -> bool {
        self.0.is_mount_point()
    }

    pub fn set_mount_point(&self, value: bool) {
        self.0.ismtpt.store(value, Ordering::SeqCst);
    }

    pub fn umh(&self) -> Option<MountHeadRef> {
        self.0.umh.lock().clone()
    }

    pub fn set_umh(&self, mh: Option<MountHeadRef>) {
        *self.0.umh.lock() = mh;
    }

    pub fn take_umh(&self) -> Option<MountHeadRef> {
        self.0.umh.lock().take()
    }

    pub fn set_mchan(&self, chan: Option<Channel>, qid: Option<Qid>) {
        *self.0.mchan.lock() = chan;
        *self.0.mqid.lock() = qid;
    }

    pub fn mchan_identity_eq(&self, other: &Channel) -> bool {
        self.0
            .mchan
            .lock()
            .as_ref()
            .map(|c| c.identity_eq(other))
            .unwrap_or(false)
    }

    /// Same-file identity used throughout the mount table: equal `(type,
    /// dev, qid.path)`, ignoring qid version (mirrors `eqchan(a, b, 1)`).
    pub fn identity_eq(&self, other: &Channel) -> bool {
        self.0.type_id == other.0.type_id
            && self.0.dev_id == other.0.dev_id
            && self.0.qid.lock().path == other.0.qid.lock().path
    }

    /// Matches a `(type, dev, qid)` triple the way `eqchantdqid` does,
    /// ignoring qid version.
    pub fn identity_eq_tdq(&self, type_id: u16, dev_id: u32, qid: Qid) -> bool {
        self.0.type_id == type_id && self.0.dev_id == dev_id && self.0.qid.lock().path == qid.path
    }

    /// Current reference count, for the spec's testable invariants. Always
    /// >= 1 for a value you can observe.
    pub fn ref_count(&self) -> isize {
        self.0.refs.get()
    }

    /// Duplicates the handle, the only sanctioned way to get a second
    /// reference to the same channel.
    pub fn clone_ref(&self) -> Channel {
        self.0.refs.incref();
        Channel(Arc::clone(&self.0))
    }

    /// Consumes one reference. Device `close` runs, and the fid returns to
    /// the pool, only when this was the last reference.
    pub fn close(self) {
        let remaining = self.0.refs.decref();
        if remaining == 0 {
            self.0.device.close(&self.0);
            self.0.pool.release(self.0.fid);
        }
        // The Arc drops here regardless; ChannelInner::drop checks that
        // `refs` reached zero in lockstep.
    }

    /// Reads this channel's directory-entry encoding into a freshly sized
    /// buffer, growing and retrying once if the first attempt exactly
    /// filled the buffer (a sign the encoding may have been truncated),
    /// mirroring `dirchanstat`'s grow-and-retry loop around a device's
    /// `stat`. `hint` is the caller's best guess at a sufficient size.
    pub fn stat_into(&self, hint: usize) -> crate::error::NsResult<Vec<u8>> {
        let mut size = hint.max(64);
        loop {
            let mut buf = vec![0u8; size];
            let n = self.device().stat(self, &mut buf)?;
            if n < size {
                buf.truncate(n);
                return Ok(buf);
            }
            if size >= hint.max(64) * 2 {
                buf.truncate(n);
                return Ok(buf);
            }
            size *= 2;
        }
    }

    /// Clones the channel at the device level (an empty walk), used by
    /// `cclone`-style duplication when a device needs to hand back an
    /// independent handle at the same position (e.g. `..` results).
    pub fn device_clone(&self) -> crate::error::NsResult<Channel> {
        let wq = self.device().walk(self, &[])?;
        let mut nc = wq
            .clone
            .ok_or_else(|| crate::error::NsError::bare(crate::error::NsErrorKind::CloneFailed))?;
        nc.set_path(self.path());
        Ok(nc)
    }
}

#[cfg(test)]
mod tests {
    use crate::device::Device as _;
    use crate::testutil::MemDevice;
    use pretty_assertions::assert_eq;

    #[test]
    fn stat_into_reads_small_data_in_one_pass() {
        let device = MemDevice::arc();
        let path = device.touch(0, "motd", b"hello");
        let root = device.attach("").unwrap();
        let wq = device.walk(&root, &["motd"]).unwrap();
        let chan = wq.clone.unwrap();

        let data = chan.stat_into(64).unwrap();
        assert_eq!(data, b"hello");

        let _ = path;
        chan.close();
        root.close();
    }

    #[test]
    fn stat_into_grows_past_an_exactly_sized_hint() {
        // A first-pass buffer that comes back completely full is
        // ambiguous (did it fit exactly, or was it truncated?); stat_into
        // always grows and retries once before trusting the result.
        let device = MemDevice::arc();
        let big = vec![b'x'; 300];
        device.touch(0, "big", &big);
        let root = device.attach("").unwrap();
        let wq = device.walk(&root, &["big"]).unwrap();
        let chan = wq.clone.unwrap();

        let data = chan.stat_into(300).unwrap();
        assert_eq!(data, big);

        chan.close();
        root.close();
    }
}
