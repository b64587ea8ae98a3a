//! The name-resolution dispatcher (spec §4.7, grounded on `namec()` in the
//! original `chan.c`), tying the parser, walker, and mount table together
//! behind the access modes a caller might resolve a name for.
//!
//! This intentionally stops short of being a syscall layer (that outer
//! surface is a non-goal): callers already hold the process's root and
//! working-directory channels and pass them in explicitly, and bind/mount
//! themselves (actually installing a binding into the namespace) are a
//! separate call to [`crate::pgrp::Pgrp::cmount`] once both channels this
//! dispatcher resolves are in hand — exactly how the original splits
//! `namec(..., Amount, ...)` resolution from the `mount()` syscall that
//! consumes it.

use crate::channel::{ChanFlags, Channel};
use crate::device::{DeviceTable, OpenMode, DMDIR};
use crate::error::{NsError, NsErrorKind, NsResult};
use crate::mount::MountHeadRef;
use crate::name::{parse_sharp, parsename, validnamedup, Elemlist};
use crate::pgrp::{Pgrp, NOATTACH_WHITELIST};
use crate::walk::walk_opt;

/// The access mode a name is being resolved for, mirroring the original's
/// `Aopen`/`Aaccess`/`Abind`/`Aremove`/`Atodir`/`Amount`/`Acreate` dispatch.
pub enum Amode {
    /// Resolve and open for I/O.
    Aopen(OpenMode),
    /// Resolve only; the caller just needs the channel to exist.
    Aaccess,
    /// Resolve and require the result to be a directory.
    Atodir,
    /// Resolve the channel a bind's `new` argument names.
    Abind,
    /// Resolve the channel a mount's `old` argument names.
    Amount,
    /// Resolve the parent and create (or race-detect) the leaf element.
    Acreate { mode: OpenMode, perm: u32 },
    /// Resolve and remove.
    Aremove,
}

/// What a dispatched name resolution produced.
pub enum NamecOutcome {
    Channel(Channel),
    Removed,
}

/// Resolves `name` against `root` (rooted names, and `#/...`), a device
/// attach (`#<letter>...`), or `dot` (the working directory, everything
/// else), then performs the `amode`-specific action.
pub fn namec(
    pgrp: &Pgrp,
    devices: &DeviceTable,
    root: &Channel,
    dot: &Channel,
    name: &str,
    amode: Amode,
) -> NsResult<NamecOutcome> {
    if name.is_empty() {
        return Err(NsError::bare(NsErrorKind::Empty));
    }

    let (start, remainder, nomount) = pick_start(pgrp, devices, root, dot, name)?;

    let validated = match validnamedup(remainder, true) {
        Ok(v) => v,
        Err(e) => {
            start.close();
            return Err(e.quote_name(name, name.len()));
        }
    };
    let parsed = parsename(&validated);

    match amode {
        Amode::Acreate { mode, perm } => create(pgrp, start, &parsed, name, mode, perm, nomount),
        Amode::Aremove => {
            let elems: Vec<&str> = parsed.elems.iter().map(|e| e.text).collect();
            let resolved = match walk_opt(pgrp, &start, &elems, nomount) {
                Ok((resolved, _)) => {
                    start.close();
                    resolved
                }
                Err(e) => {
                    start.close();
                    return Err(e.quote_name(name, name.len()));
                }
            };
            if let Err(e) = require_mustbedir(&resolved, parsed.mustbedir) {
                resolved.close();
                return Err(e.quote_name(name, name.len()));
            }
            let (target, head) = cross_final_mount(pgrp, resolved);
            release_head(head);
            target
                .device()
                .remove(target)
                .map(|()| NamecOutcome::Removed)
                .map_err(|e| e.quote_name(name, name.len()))
        }
        other => {
            let elems: Vec<&str> = parsed.elems.iter().map(|e| e.text).collect();
            let resolved = match walk_opt(pgrp, &start, &elems, nomount) {
                Ok((resolved, _)) => {
                    start.close();
                    resolved
                }
                Err(e) => {
                    start.close();
                    return Err(e.quote_name(name, name.len()));
                }
            };
            if let Err(e) = require_mustbedir(&resolved, parsed.mustbedir) {
                resolved.close();
                return Err(e.quote_name(name, name.len()));
            }

            match other {
                Amode::Aopen(mode) => open(pgrp, resolved, mode, name),
                Amode::Atodir => {
                    // Deliberately does not cross a final mount point, so
                    // binding or mounting onto `/` or `.` still sees the
                    // un-crossed original.
                    if let Err(e) = resolved.require_dir() {
                        resolved.close();
                        return Err(e.quote_name(name, name.len()));
                    }
                    Ok(NamecOutcome::Channel(resolved))
                }
                Amode::Amount => Ok(NamecOutcome::Channel(resolved)),
                Amode::Aaccess => {
                    let (target, head) = cross_final_mount(pgrp, resolved);
                    release_head(head);
                    Ok(NamecOutcome::Channel(target))
                }
                Amode::Abind => {
                    let (target, head) = cross_final_mount(pgrp, resolved);
                    release_head(head);
                    // If the bound-elsewhere channel is itself a mount
                    // point, park the union here so `Pgrp::cmount` can
                    // replicate the whole chain onto wherever it's bound.
                    if let Some(self_head) = pgrp.findmount(&target) {
                        target.set_umh(Some(self_head));
                    }
                    Ok(NamecOutcome::Channel(target))
                }
                Amode::Acreate { .. } | Amode::Aremove => unreachable!("handled above"),
            }
        }
    }
}

/// Picks the channel resolution starts from and the slice of `name` left to
/// walk: `/`-rooted names start at `root`, `#`-prefixed names attach to a
/// device (or, for the reserved letter `/`, alias straight to `root`), and
/// everything else is relative to `dot`. `#`-started resolutions suppress
/// mount crossing for the rest of the call (`nomount`), matching the
/// original's "attaching directly to a device bypasses the namespace"
/// behavior.
fn pick_start<'a>(
    pgrp: &Pgrp,
    devices: &DeviceTable,
    root: &Channel,
    dot: &Channel,
    name: &'a str,
) -> NsResult<(Channel, &'a str, bool)> {
    if name.starts_with('#') {
        let sharp = parse_sharp(name)?;
        if sharp.letter == '/' {
            return Ok((root.clone_ref(), sharp.rest, true));
        }
        if pgrp.noattach() && !NOATTACH_WHITELIST.contains(&sharp.letter) {
            return Err(NsError::bare(NsErrorKind::NoAttach));
        }
        let device = devices.lookup(sharp.letter)?;
        let attached = device.attach(sharp.instance)?;
        Ok((attached, sharp.rest, true))
    } else if name.starts_with('/') {
        Ok((root.clone_ref(), name, false))
    } else {
        Ok((dot.clone_ref(), name, false))
    }
}

/// Crosses a mount point standing over `c`, if any, replacing it with the
/// first union member's channel (`domount`'s forward crossing, performed
/// here at the *end* of a resolution for access modes that want the
/// crossed view). Returns the possibly-crossed channel and, if a crossing
/// happened, the mount head — the caller either retains it (`Aopen` on a
/// union directory) or releases it via [`release_head`].
fn cross_final_mount(pgrp: &Pgrp, c: Channel) -> (Channel, Option<MountHeadRef>) {
    match pgrp.findmount(&c) {
        Some(head) => match head.first_target() {
            Some(target) => {
                target.set_path(c.path());
                target.set_mount_point(true);
                c.close();
                (target, Some(head))
            }
            None => (c, Some(head)),
        },
        None => (c, None),
    }
}

fn release_head(head: Option<MountHeadRef>) {
    if let Some(h) = head {
        h.release();
    }
}

/// The generic post-walk directory check `namec()` runs for every access
/// mode once `e.mustbedir` is known (chan.c:1281-1282): a name that parsed
/// with a trailing slash, `/.`, or similar must resolve to a directory
/// regardless of what it's being resolved *for*. `Atodir` additionally
/// requires this unconditionally (not just when `mustbedir`), which is its
/// own, separate check.
fn require_mustbedir(c: &Channel, mustbedir: bool) -> NsResult<()> {
    if mustbedir && !c.is_dir() {
        return Err(NsError::bare(NsErrorKind::NotDirectory));
    }
    Ok(())
}

fn open(pgrp: &Pgrp, resolved: Channel, mode: OpenMode, name: &str) -> NsResult<NamecOutcome> {
    let (target, head) = cross_final_mount(pgrp, resolved);

    if mode.contains(OpenMode::EXEC) && target.is_dir() {
        target.close();
        release_head(head);
        return Err(NsError::bare(NsErrorKind::NotDirectory).quote_name(name, name.len()));
    }

    match head {
        Some(h) => {
            // Union directories need the head retained for later directory
            // reads; a single-entry "union" (the common case) doesn't.
            if h.len() > 1 {
                target.set_umh(Some(h));
            } else {
                h.release();
            }
        }
        None => {}
    }

    let opened = target
        .device()
        .open(target, mode & !OpenMode::CEXEC)
        .map_err(|e| e.quote_name(name, name.len()))?;
    if mode.contains(OpenMode::CEXEC) {
        opened.insert_flags(ChanFlags::CCEXEC);
    }
    if mode.contains(OpenMode::RCLOSE) {
        opened.insert_flags(ChanFlags::RCLOSE);
    }
    Ok(NamecOutcome::Channel(opened))
}

/// Picks where a new file is actually created: the first `MCREATE` union
/// member if the parent directory is itself a mount point, otherwise the
/// parent itself (`createdir`). `nomount` gates the mount lookup exactly as
/// `chan.c:1440` does (`if(!nomount && findmount(...))`): a `#`-sigil
/// attach create must always land directly on the attached channel, never
/// redirect through a namespace mount that happens to share its identity.
fn createdir(pgrp: &Pgrp, parent: &Channel, nomount: bool) -> NsResult<Channel> {
    if nomount {
        return Ok(parent.clone_ref());
    }
    match pgrp.findmount(parent) {
        Some(head) => {
            let target = head.first_mcreate_target();
            head.release();
            target.ok_or_else(|| NsError::bare(NsErrorKind::NoCreatePermission))
        }
        None => Ok(parent.clone_ref()),
    }
}

fn create(
    pgrp: &Pgrp,
    start: Channel,
    parsed: &Elemlist<'_>,
    name: &str,
    mode: OpenMode,
    perm: u32,
    nomount: bool,
) -> NsResult<NamecOutcome> {
    let elems: Vec<&str> = parsed.elems.iter().map(|e| e.text).collect();
    // chan.c:1262-1270 checks `mustbedir` vs. `DMDIR` before it ever looks at
    // `nelems`: for a name with no elements (`"/"`, `"."`, `""`) that also
    // lacks `DMDIR`, the directory-required error fires first. Only once
    // that passes does an empty element list mean "the name already names
    // something" — i.e. `Exists`, not an empty-name error (the name itself,
    // e.g. `"/"`, is not empty).
    if parsed.mustbedir && perm & DMDIR == 0 {
        start.close();
        return Err(NsError::bare(NsErrorKind::NotDirectory).quote_name(name, name.len()));
    }
    if elems.is_empty() {
        start.close();
        return Err(NsError::bare(NsErrorKind::Exists).quote_name(name, name.len()));
    }

    let (parent_elems, leaf_slice) = elems.split_at(elems.len() - 1);
    let leaf = leaf_slice[0];

    let parent = match walk_opt(pgrp, &start, parent_elems, nomount) {
        Ok((parent, _)) => {
            start.close();
            parent
        }
        Err(e) => {
            start.close();
            return Err(e.quote_name(name, name.len()));
        }
    };

    // Check whether the leaf already exists before attempting creation:
    // mirrors the original's "try the last element" pre-check. Any walk
    // failure here (not only a clean "does not exist") is treated as "go
    // ahead and try to create it" — this core's walker, unlike the
    // original, doesn't distinguish every short-walk failure mode.
    if let Ok((existing, _)) = walk_opt(pgrp, &parent, &[leaf], nomount) {
        if mode.contains(OpenMode::EXCL) {
            existing.close();
            parent.close();
            return Err(NsError::bare(NsErrorKind::Exists).quote_name(name, name.len()));
        }
        parent.close();
        let opened = existing
            .device()
            .open(existing, mode | OpenMode::TRUNC)
            .map_err(|e| e.quote_name(name, name.len()))?;
        return Ok(NamecOutcome::Channel(opened));
    }

    let target = match createdir(pgrp, &parent, nomount) {
        Ok(t) => t,
        Err(e) => {
            parent.close();
            return Err(e.quote_name(name, name.len()));
        }
    };
    target.set_path(parent.path());

    let create_mode = mode & !(OpenMode::EXCL | OpenMode::CEXEC);
    match target.device().create(target, leaf, create_mode, perm) {
        Ok(created) => {
            parent.close();
            Ok(NamecOutcome::Channel(created))
        }
        Err(e) => {
            if !mode.contains(OpenMode::EXCL) {
                // Create/create race: someone else made it first. Walk to
                // the now-existing leaf and open-with-truncate instead of
                // failing.
                if let Ok((existing, _)) = walk_opt(pgrp, &parent, &[leaf], nomount) {
                    parent.close();
                    let opened = existing
                        .device()
                        .open(existing, mode | OpenMode::TRUNC)
                        .map_err(|e2| e2.quote_name(name, name.len()))?;
                    return Ok(NamecOutcome::Channel(opened));
                }
            }
            parent.close();
            Err(e.quote_name(name, name.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device as _;
    use crate::mount::MountFlags;
    use crate::testutil::MemDevice;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn open_resolves_rooted_name() {
        let device = MemDevice::arc();
        let usr = device.mkdir(0, "usr");
        device.touch(usr, "motd", b"hello");
        let pgrp = Pgrp::new();
        let devices = DeviceTable::new();
        let root = device.attach("").unwrap();
        let dot = root.clone_ref();

        let outcome = namec(
            &pgrp,
            &devices,
            &root,
            &dot,
            "/usr/motd",
            Amode::Aopen(OpenMode::READ),
        )
        .unwrap();
        match outcome {
            NamecOutcome::Channel(c) => {
                assert_eq!(c.path().as_str(), "/usr/motd");
                c.close();
            }
            NamecOutcome::Removed => panic!("expected a channel"),
        }
        root.close();
        dot.close();
    }

    #[test]
    fn create_then_remove_round_trips() {
        let device = MemDevice::arc();
        let pgrp = Pgrp::new();
        let devices = DeviceTable::new();
        let root = device.attach("").unwrap();
        let dot = root.clone_ref();

        let outcome = namec(
            &pgrp,
            &devices,
            &root,
            &dot,
            "/newfile",
            Amode::Acreate {
                mode: OpenMode::WRITE,
                perm: 0o644,
            },
        )
        .unwrap();
        let created = match outcome {
            NamecOutcome::Channel(c) => c,
            NamecOutcome::Removed => panic!("expected a channel"),
        };
        assert_eq!(created.path().as_str(), "/newfile");
        created.close();

        let outcome = namec(&pgrp, &devices, &root, &dot, "/newfile", Amode::Aremove).unwrap();
        assert!(matches!(outcome, NamecOutcome::Removed));

        let err = namec(&pgrp, &devices, &root, &dot, "/newfile", Amode::Aaccess).unwrap_err();
        assert_eq!(err.kind, NsErrorKind::DoesNotExist);

        root.close();
        dot.close();
    }

    #[test]
    fn create_without_excl_truncates_an_existing_file() {
        let device = MemDevice::arc();
        let pgrp = Pgrp::new();
        let devices = DeviceTable::new();
        let root = device.attach("").unwrap();
        let dot = root.clone_ref();

        for _ in 0..2 {
            let outcome = namec(
                &pgrp,
                &devices,
                &root,
                &dot,
                "/f",
                Amode::Acreate {
                    mode: OpenMode::WRITE,
                    perm: 0o644,
                },
            )
            .unwrap();
            match outcome {
                NamecOutcome::Channel(c) => c.close(),
                NamecOutcome::Removed => panic!("expected a channel"),
            }
        }

        root.close();
        dot.close();
    }

    #[test]
    fn create_excl_on_existing_file_fails() {
        let device = MemDevice::arc();
        let pgrp = Pgrp::new();
        let devices = DeviceTable::new();
        let root = device.attach("").unwrap();
        let dot = root.clone_ref();

        let make = |pgrp: &Pgrp| {
            namec(
                pgrp,
                &devices,
                &root,
                &dot,
                "/f",
                Amode::Acreate {
                    mode: OpenMode::WRITE | OpenMode::EXCL,
                    perm: 0o644,
                },
            )
        };
        match make(&pgrp).unwrap() {
            NamecOutcome::Channel(c) => c.close(),
            NamecOutcome::Removed => panic!("expected a channel"),
        }
        let err = make(&pgrp).unwrap_err();
        assert_eq!(err.kind, NsErrorKind::Exists);

        root.close();
        dot.close();
    }

    #[test]
    fn create_requires_dmdir_when_mustbedir() {
        let device = MemDevice::arc();
        let pgrp = Pgrp::new();
        let devices = DeviceTable::new();
        let root = device.attach("").unwrap();
        let dot = root.clone_ref();

        let err = namec(
            &pgrp,
            &devices,
            &root,
            &dot,
            "/f/",
            Amode::Acreate {
                mode: OpenMode::WRITE,
                perm: 0o644,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, NsErrorKind::NotDirectory);

        root.close();
        dot.close();
    }

    #[test]
    fn trailing_slash_on_a_file_fails_not_directory_for_open() {
        let device = MemDevice::arc();
        device.touch(0, "motd", b"hello");
        let pgrp = Pgrp::new();
        let devices = DeviceTable::new();
        let root = device.attach("").unwrap();
        let dot = root.clone_ref();

        let err = namec(
            &pgrp,
            &devices,
            &root,
            &dot,
            "/motd/",
            Amode::Aopen(OpenMode::READ),
        )
        .unwrap_err();
        assert_eq!(err.kind, NsErrorKind::NotDirectory);

        root.close();
        dot.close();
    }

    #[test]
    fn create_root_without_dmdir_fails_before_exists_check() {
        let device = MemDevice::arc();
        let pgrp = Pgrp::new();
        let devices = DeviceTable::new();
        let root = device.attach("").unwrap();
        let dot = root.clone_ref();

        let err = namec(
            &pgrp,
            &devices,
            &root,
            &dot,
            "/",
            Amode::Acreate {
                mode: OpenMode::WRITE,
                perm: 0o644,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, NsErrorKind::NotDirectory);

        root.close();
        dot.close();
    }

    #[test]
    fn create_root_with_dmdir_fails_exists_not_empty() {
        let device = MemDevice::arc();
        let pgrp = Pgrp::new();
        let devices = DeviceTable::new();
        let root = device.attach("").unwrap();
        let dot = root.clone_ref();

        let err = namec(
            &pgrp,
            &devices,
            &root,
            &dot,
            "/",
            Amode::Acreate {
                mode: OpenMode::WRITE,
                perm: 0o644 | DMDIR,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, NsErrorKind::Exists);

        root.close();
        dot.close();
    }

    #[test]
    fn amount_resolution_does_not_install_a_binding() {
        let device = MemDevice::arc();
        let mnt = device.mkdir(0, "mnt");
        let target = device.mkdir(0, "target");
        let pgrp = Pgrp::new();
        let devices = DeviceTable::new();
        let root = device.attach("").unwrap();
        let dot = root.clone_ref();

        let old = match namec(&pgrp, &devices, &root, &dot, "/mnt", Amode::Amount).unwrap() {
            NamecOutcome::Channel(c) => c,
            _ => unreachable!(),
        };
        let new = match namec(
            &pgrp,
            &devices,
            &root,
            &dot,
            "/target",
            Amode::Aopen(OpenMode::READ),
        )
        .unwrap()
        {
            NamecOutcome::Channel(c) => c,
            _ => unreachable!(),
        };
        assert!(pgrp.findmount(&old).is_none());
        pgrp.cmount(&new, &old, MountFlags::MAFTER).unwrap();
        assert!(pgrp.findmount(&old).is_some());

        pgrp.cunmount(&old, None).unwrap();
        let _ = mnt;
        let _ = target;
        new.close();
        old.close();
        root.close();
        dot.close();
    }

    #[test]
    fn sharp_slash_aliases_to_root() {
        let device = MemDevice::arc();
        device.mkdir(0, "usr");
        let pgrp = Pgrp::new();
        let devices = DeviceTable::new();
        let root = device.attach("").unwrap();
        let dot = root.clone_ref();

        let outcome = namec(&pgrp, &devices, &root, &dot, "#/usr", Amode::Atodir).unwrap();
        match outcome {
            NamecOutcome::Channel(c) => {
                assert_eq!(c.path().as_str(), "/usr");
                c.close();
            }
            NamecOutcome::Removed => panic!("expected a channel"),
        }
        root.close();
        dot.close();
    }

    #[test]
    fn sharp_attach_reaches_a_registered_device() {
        let fs_device = MemDevice::arc();
        let other_device = MemDevice::arc();
        other_device.mkdir(0, "inner");

        let mut devices = DeviceTable::new();
        devices.register('z', other_device);

        let pgrp = Pgrp::new();
        let root = fs_device.attach("").unwrap();
        let dot = root.clone_ref();

        let outcome = namec(&pgrp, &devices, &root, &dot, "#z/inner", Amode::Atodir).unwrap();
        match outcome {
            NamecOutcome::Channel(c) => {
                assert_eq!(c.path().as_str(), "/inner");
                c.close();
            }
            NamecOutcome::Removed => panic!("expected a channel"),
        }
        root.close();
        dot.close();
    }

    #[test]
    fn sharp_attach_create_ignores_a_mount_over_the_attached_channel() {
        let fs_device = MemDevice::arc();
        let other_device = MemDevice::arc();

        let mut devices = DeviceTable::new();
        devices.register('z', Arc::clone(&other_device));

        let pgrp = Pgrp::new();
        let root = fs_device.attach("").unwrap();
        let dot = root.clone_ref();

        // Mount something over the identity of `#z`'s own root, so a
        // namespace-aware `createdir` would (wrongly) redirect a create
        // through it.
        let attached_for_mount = other_device.attach("").unwrap();
        let elsewhere = fs_device.mkdir(0, "elsewhere");
        let elsewhere_chan = namec(&pgrp, &devices, &root, &dot, "/elsewhere", Amode::Amount)
            .map(|o| match o {
                NamecOutcome::Channel(c) => c,
                _ => unreachable!(),
            })
            .unwrap();
        pgrp.cmount(&elsewhere_chan, &attached_for_mount, MountFlags::MREPL)
            .unwrap();

        let outcome = namec(
            &pgrp,
            &devices,
            &root,
            &dot,
            "#z/newfile",
            Amode::Acreate {
                mode: OpenMode::WRITE,
                perm: 0o644,
            },
        )
        .unwrap();
        match outcome {
            NamecOutcome::Channel(c) => {
                // Created directly on the attached device, not redirected
                // through the mount standing over its identity.
                assert_eq!(c.type_id(), other_device.type_id());
                c.close();
            }
            NamecOutcome::Removed => panic!("expected a channel"),
        }

        pgrp.cunmount(&attached_for_mount, None).unwrap();
        attached_for_mount.close();
        elsewhere_chan.close();
        let _ = elsewhere;
        root.close();
        dot.close();
    }

    #[test]
    fn noattach_blocks_non_whitelisted_device_letters() {
        let fs_device = MemDevice::arc();
        let other_device = MemDevice::arc();
        let mut devices = DeviceTable::new();
        devices.register('z', other_device);

        let pgrp = Pgrp::new();
        pgrp.set_noattach(true);
        let root = fs_device.attach("").unwrap();
        let dot = root.clone_ref();

        let err = namec(&pgrp, &devices, &root, &dot, "#z", Amode::Atodir).unwrap_err();
        assert_eq!(err.kind, NsErrorKind::NoAttach);

        root.close();
        dot.close();
    }
}
