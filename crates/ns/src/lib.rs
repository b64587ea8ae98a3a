//! A per-process hierarchical name-resolution and mount subsystem, modeled
//! on the Plan 9 kernel's channel/path/mount-table design (`chan.c`).
//!
//! The pieces: [`qid`] and [`channel`] give every open file a stable
//! identity and a reference-counted handle; [`path`] tracks a channel's
//! textual position and the mounts it has crossed to get there; [`mount`]
//! and [`pgrp`] make up the per-process namespace, recording what's bound
//! or mounted where; [`name`] validates and parses the names callers pass
//! in; [`walk`] resolves a parsed name one element at a time, crossing
//! mounts and unions as needed; [`namec`] ties all of the above together
//! behind the handful of access modes (open, create, remove, bind, mount,
//! stat, todir) a caller might be resolving a name for.
//!
//! Devices — the things that actually back a subtree of the namespace —
//! are external collaborators, consumed here only through the [`device`]
//! module's `Device` trait. [`testutil`] provides an in-memory device for
//! exercising the resolver without a real one.

pub mod channel;
pub mod device;
pub mod error;
pub mod mount;
pub mod name;
pub mod namec;
pub mod path;
pub mod pgrp;
pub mod qid;
pub mod testutil;
pub mod walk;

pub use channel::{ChanFlags, Channel, ChannelPool};
pub use device::{Device, DeviceTable, OpenMode, Walkqid, DMDIR};
pub use error::{NsError, NsErrorKind, NsResult};
pub use mount::{Mount, MountFlags, MountHeadRef};
pub use namec::{namec, Amode, NamecOutcome};
pub use path::Path;
pub use pgrp::Pgrp;
pub use qid::{Qid, QidType};
