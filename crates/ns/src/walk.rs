//! The stepwise walker (spec §4.6, grounded on `walk()` in the original
//! `chan.c`): resolves a sequence of path elements from a starting
//! channel, crossing mount points and unions as it goes, and undoing those
//! crossings again on `..`.

use crate::channel::Channel;
use crate::error::{NsError, NsErrorKind, NsResult};
use crate::name::validname0;
use crate::path::Path;
use crate::pgrp::Pgrp;
use crate::qid::Qid;

/// Resolves `elems` one at a time from `start`, returning the channel at
/// the final position plus the qid observed at each step (for callers that
/// need the intermediate qids, e.g. 9P-style wire replies).
///
/// `start` is never consumed or mutated: the walk operates on a cloned
/// handle and the caller's original reference remains exactly as valid
/// (and exactly as it was) after this returns, matching `cclone`'s
/// contract in the original.
pub fn walk(pgrp: &Pgrp, start: &Channel, elems: &[&str]) -> NsResult<(Channel, Vec<Qid>)> {
    walk_opt(pgrp, start, elems, false)
}

/// As [`walk`], but with mount crossing suppressed when `nomount` is set —
/// used for resolutions that started by attaching directly to a device via
/// a `#` specifier, where the original kernel sets `nomount=1` for the rest
/// of that `namec` call.
pub fn walk_opt(
    pgrp: &Pgrp,
    start: &Channel,
    elems: &[&str],
    nomount: bool,
) -> NsResult<(Channel, Vec<Qid>)> {
    let mut cur = start.clone_ref();
    let mut path = start.path();
    let mut qids = Vec::with_capacity(elems.len());

    // `cur` is this function's own working clone (never the caller's
    // `start`), so every early-return path below must close it itself —
    // there is no `Drop` impl that does it for us (spec §4.2's leak/
    // use-after-free discipline applies to intermediate walk state too,
    // not only to handles a caller can observe).
    for (i, &elem) in elems.iter().enumerate() {
        if elem == ".." {
            if let Err(e) = step_dotdot(pgrp, &mut cur, &mut path) {
                cur.close();
                return Err(e);
            }
            qids.push(cur.qid());
            continue;
        }

        if let Err(e) = validname0(elem) {
            cur.close();
            return Err(e.quote_name(elem, elem.len()));
        }

        if !cur.is_dir() {
            cur.close();
            return Err(NsError::bare(NsErrorKind::NotDirectory));
        }

        let candidates = if nomount {
            vec![cur.clone_ref()]
        } else {
            union_candidates(pgrp, &cur)
        };
        let stepped = match step_union(&candidates, elem, i == elems.len() - 1) {
            Ok(c) => c,
            Err(e) => {
                for c in candidates {
                    c.close();
                }
                cur.close();
                return Err(e);
            }
        };
        for c in candidates {
            c.close();
        }

        cur.close();
        cur = stepped;
        path.add_elem(elem, None);
        if !nomount {
            pgrp.domount(&cur, &mut path);
        }

        qids.push(cur.qid());
    }

    cur.set_path(path);
    Ok((cur, qids))
}

/// The ordered set of channels a single-element step should be tried
/// against: the union bound over `cur`, if any, followed by `cur` itself.
fn union_candidates(pgrp: &Pgrp, cur: &Channel) -> Vec<Channel> {
    match pgrp.findmount(cur) {
        Some(head) => {
            let mut v = head.union_targets();
            v.push(cur.clone_ref());
            v
        }
        None => vec![cur.clone_ref()],
    }
}

fn step_union(candidates: &[Channel], elem: &str, _is_last: bool) -> NsResult<Channel> {
    let mut last_err = NsError::bare(NsErrorKind::DoesNotExist);
    for candidate in candidates {
        tracing::trace!(elem, fid = candidate.inner().fid(), "device walk dispatch");
        match candidate.device().walk(candidate, &[elem]) {
            Ok(wq) => {
                if let Some(clone) = wq.clone {
                    return Ok(clone);
                }
            }
            Err(e) => last_err = e,
        }
    }
    Err(last_err.quote_name(elem, elem.len()))
}

fn step_dotdot(pgrp: &Pgrp, cur: &mut Channel, path: &mut Path) -> NsResult<()> {
    if !path.has_parent() {
        return Ok(());
    }
    match pgrp.undomount(path) {
        Some(crossed) => {
            let old = std::mem::replace(cur, crossed);
            old.close();
        }
        None => {
            let wq = cur.device().walk(cur, &[".."])?;
            let next = wq
                .clone
                .ok_or_else(|| NsError::bare(NsErrorKind::DoesNotExist))?;
            let old = std::mem::replace(cur, next);
            old.close();
        }
    }
    Ok(())
}
