//! Path: a channel's textual position plus the "mount trail" needed to walk
//! back out of mounts on `..` (spec §3/§4.3, grounded on `newpath`,
//! `copypath`, `addelem`, `fixdotdotname` in the original `chan.c`).
//!
//! `Path` is a cheap `Clone` (`Arc<PathInner>`); mutation goes through
//! [`Path::add_elem`] and [`Path::append`], which clone-on-write via
//! `Arc::make_mut` exactly when another handle is sharing the backing data,
//! mirroring `uniquepath`'s "refcount > 1 → copy" check without a manual
//! refcount of its own (`Arc::make_mut` already does that check).

use std::sync::Arc;

use crate::channel::Channel;

#[derive(Clone)]
struct PathInner {
    text: String,
    /// Parallel to the elements of `text`: one entry per path element
    /// recording the channel that was mounted over, if that element is
    /// where a mount was crossed. Popped on `..` to restore the
    /// pre-mount channel (`fixdotdotname`'s job in the original).
    trail: Vec<Option<Channel>>,
}

/// A channel's textual path, copy-on-write, with a mount-crossing trail.
#[derive(Clone)]
pub struct Path(Arc<PathInner>);

impl Path {
    pub fn root() -> Self {
        Self(Arc::new(PathInner {
            text: "/".to_string(),
            trail: vec![None],
        }))
    }

    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let depth = text.split('/').filter(|s| !s.is_empty()).count() + 1;
        Self(Arc::new(PathInner {
            text,
            trail: vec![None; depth],
        }))
    }

    pub fn as_str(&self) -> &str {
        &self.0.text
    }

    pub fn is_root(&self) -> bool {
        self.0.text == "/"
    }

    /// Appends `name` as a new path element, recording `crossed` (the
    /// channel being mounted over, if this append is happening because a
    /// mount was just crossed) in the trail.
    pub fn add_elem(&mut self, name: &str, crossed: Option<Channel>) {
        let inner = Arc::make_mut(&mut self.0);
        if inner.text == "/" {
            inner.text = format!("/{name}");
        } else {
            inner.text = format!("{}/{name}", inner.text);
        }
        inner.trail.push(crossed);
    }

    /// Records `crossed` as the channel mounted over at the current last
    /// element, so a later `..` can restore it. Called once a freshly
    /// added element turns out to be a mount point.
    pub fn set_last_crossed(&mut self, crossed: Channel) {
        let inner = Arc::make_mut(&mut self.0);
        if let Some(slot) = inner.trail.last_mut() {
            *slot = Some(crossed);
        }
    }

    /// Pops the last path element, returning the channel recorded in the
    /// trail at that position (the channel to restore after walking `..`
    /// back out across a mount), if any.
    ///
    /// A `#`-sigil path (`fixdotdotname`, chan.c:294-313) canonicalizes only
    /// the tail after its first `/`, and that tail bottoms out at `#x/`
    /// rather than `#x`: the sigil element is never left dangling without
    /// its trailing slash, since `#x` alone does not name the same thing a
    /// `#`-rooted walk started from.
    pub fn pop_elem(&mut self) -> Option<Channel> {
        let inner = Arc::make_mut(&mut self.0);
        if inner.trail.len() <= 1 {
            tracing::warn!(path = %inner.text, "pop_elem called with no element left to pop");
        }
        let crossed = inner.trail.pop().flatten();
        if inner.text.starts_with('#') {
            if let Some(first_slash) = inner.text.find('/') {
                if let Some(rel_idx) = inner.text[first_slash..].rfind('/') {
                    if rel_idx == 0 {
                        inner.text.truncate(first_slash + 1);
                    } else {
                        inner.text.truncate(first_slash + rel_idx);
                    }
                }
            }
        } else if let Some(idx) = inner.text.rfind('/') {
            if idx == 0 {
                inner.text.truncate(1);
            } else {
                inner.text.truncate(idx);
            }
        }
        crossed
    }

    /// True if there is more than one path element below root, i.e. `..`
    /// has somewhere to go.
    pub fn has_parent(&self) -> bool {
        self.0.text != "/"
    }
}

impl std::fmt::Debug for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Path({})", self.0.text)
    }
}

impl Drop for PathInner {
    fn drop(&mut self) {
        for crossed in self.trail.drain(..).flatten() {
            crossed.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn root_path_has_no_parent() {
        let p = Path::root();
        assert_eq!(p.as_str(), "/");
        assert!(!p.has_parent());
    }

    #[test]
    fn add_and_pop_round_trip_text() {
        let mut p = Path::root();
        p.add_elem("usr", None);
        p.add_elem("glenda", None);
        assert_eq!(p.as_str(), "/usr/glenda");
        p.pop_elem();
        assert_eq!(p.as_str(), "/usr");
        p.pop_elem();
        assert_eq!(p.as_str(), "/");
    }

    #[test]
    fn sharp_path_pop_stops_at_sigil_slash_not_bare_sigil() {
        let mut p = Path::new("#c/0/1");
        p.pop_elem();
        assert_eq!(p.as_str(), "#c/0");
        p.pop_elem();
        // Popping the last element under a device sigil leaves "#c/", never
        // truncates away the slash to bare "#c".
        assert_eq!(p.as_str(), "#c/");
        p.pop_elem();
        assert_eq!(p.as_str(), "#c/");
    }

    #[test]
    fn cloning_shares_storage_until_mutated() {
        let mut a = Path::root();
        a.add_elem("usr", None);
        let b = a.clone();
        a.add_elem("glenda", None);
        assert_eq!(b.as_str(), "/usr");
        assert_eq!(a.as_str(), "/usr/glenda");
    }
}
