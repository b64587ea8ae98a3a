//! Name validation and parsing (spec §4.5/§6, grounded on `isfrog`,
//! `validname0`, `validname`, `validnamedup`, `growparse`, `parsename` in
//! the original `chan.c`).

use crate::error::{NsError, NsErrorKind, NsResult};

/// Bytes that may never appear in a path element, mirroring the original's
/// `isfrog` lookup table: control characters, DEL, and the path separator.
/// Continuation bytes of a multi-byte UTF-8 sequence are always >= 0x80 and
/// so never match here.
fn is_frog(b: u8) -> bool {
    b < b' ' || b == 0x7f || b == b'/'
}

/// One `/`-delimited element of a parsed name, with the byte offsets into
/// the original string it spans (used for error-message quoting).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Elem<'a> {
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
}

/// A parsed name: whether it was rooted at `/`, its elements in order, and
/// whether a trailing slash (or slash-dot run) requires the result to be a
/// directory (`Elemlist`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Elemlist<'a> {
    pub rooted: bool,
    pub elems: Vec<Elem<'a>>,
    pub mustbedir: bool,
}

/// Validates a single path element: non-empty, no control bytes, no
/// embedded `/`, and rejects the `.` element (callers collapse `.` before
/// calling this; seeing one here is always a bug upstream) — mirrors
/// `validname0`.
pub fn validname0(s: &str) -> NsResult<()> {
    if s.is_empty() {
        return Err(NsError::bare(NsErrorKind::Empty));
    }
    if s.as_bytes().iter().any(|&b| is_frog(b)) {
        return Err(NsError::bare(NsErrorKind::BadCharacter));
    }
    Ok(())
}

/// Validates a full slash-separated name, optionally permitting `..`
/// elements (`slashok` in the original — set for names passed to `namec`,
/// cleared for names a device hands back that must already be canonical).
pub fn validname(s: &str, dotdot_ok: bool) -> NsResult<()> {
    for elem in s.split('/') {
        if elem.is_empty() || elem == "." {
            continue;
        }
        if elem == ".." && !dotdot_ok {
            return Err(NsError::bare(NsErrorKind::BadCharacter));
        }
        validname0(elem)?;
    }
    Ok(())
}

/// Validates a name that may be concurrently mutated by another thread
/// (e.g. a user-supplied buffer), by taking an owned copy before
/// inspecting it (`validnamedup`'s defeat of a racing writer).
pub fn validnamedup(s: &str, dotdot_ok: bool) -> NsResult<String> {
    let copy = s.to_string();
    validname(&copy, dotdot_ok)?;
    Ok(copy)
}

/// Splits `name` into its elements, recording whether it was absolute
/// (`parsename`/`growparse`). Skips empty elements produced by repeated or
/// trailing slashes, and elides `.` elements; `..` elements are kept as-is
/// for the walker to interpret.
pub fn parsename(name: &str) -> Elemlist<'_> {
    let rooted = name.starts_with('/');
    let mut elems = Vec::new();
    let mut offset = 0usize;
    for part in name.split('/') {
        let start = offset;
        let end = start + part.len();
        offset = end + 1;
        if part.is_empty() || part == "." {
            continue;
        }
        elems.push(Elem {
            text: part,
            start,
            end,
        });
    }
    // A name ending in `/`, `/.`, or any run of those implies mustbedir; an
    // empty name is vacuously "must be a directory" too (it resolves to the
    // starting channel itself).
    let mustbedir = name.is_empty() || trailing_dir_run(name);
    Elemlist {
        rooted,
        elems,
        mustbedir,
    }
}

/// True if `name` ends in a run of `/`, `/.`, `/./`, etc.
fn trailing_dir_run(name: &str) -> bool {
    let mut rest = name;
    loop {
        if let Some(stripped) = rest.strip_suffix('/') {
            rest = stripped;
            if rest.is_empty() {
                return true;
            }
            continue;
        }
        if rest == "." {
            return true;
        }
        if let Some(stripped) = rest.strip_suffix("/.") {
            rest = stripped;
            continue;
        }
        return rest != name;
    }
}

/// Skips any leading run of `/` characters, mirroring `skipslash`.
pub fn skip_slash(name: &str) -> &str {
    name.trim_start_matches('/')
}

/// Maximum length of the single-element scratch buffer [`last_element`]
/// hands back, mirroring the destination size of the original's
/// `kstrcpy(up->genbuf, ...)` handoff.
pub const ELEM_MAX: usize = 256;

/// Returns the last element of `name`, or `.` for an empty name or one
/// that resolves to a directory itself (a trailing slash, `.`, or the
/// bare root) — the "last path element" scratch value `namec` leaves
/// behind for callers like `exec` that want just the program name, not
/// the whole path.
pub fn last_element(name: &str) -> NsResult<String> {
    let elems = parsename(name);
    let last = elems.elems.last().map(|e| e.text).unwrap_or(".");
    if last.len() > ELEM_MAX {
        return Err(NsError::bare(NsErrorKind::NameTooLong));
    }
    Ok(last.to_string())
}

/// A parsed `#<letter>[<instance>][/<rest>]` device specifier (spec §4.7/
/// §6). `name` must start with `#`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sharp<'a> {
    pub letter: char,
    pub instance: &'a str,
    pub rest: &'a str,
}

/// Splits a `#`-prefixed name into its device letter, optional numeric
/// instance, and the remainder to walk from the attached root
/// (`namec`'s sigil-reading scratch-buffer loop).
pub fn parse_sharp(name: &str) -> NsResult<Sharp<'_>> {
    debug_assert!(name.starts_with('#'));
    let after_hash = &name[1..];
    let mut chars = after_hash.char_indices();
    let (_, letter) = chars
        .next()
        .ok_or_else(|| NsError::bare(NsErrorKind::BadSharp(' ')))?;
    let after_letter = &after_hash[letter.len_utf8()..];
    let digit_end = after_letter
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(after_letter.len());
    let instance = &after_letter[..digit_end];
    let rest = &after_letter[digit_end..];
    Ok(Sharp {
        letter,
        instance,
        rest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn rejects_control_bytes() {
        assert!(validname0("a\nb").is_err());
        assert!(validname0("").is_err());
        assert!(validname0("ok").is_ok());
    }

    #[rstest]
    #[case::nul("a\0b")]
    #[case::tab("a\tb")]
    #[case::esc("a\x1bb")]
    #[case::del("a\x7fb")]
    #[case::slash("a/b")]
    fn rejects_every_frog_byte(#[case] name: &str) {
        assert!(validname0(name).is_err());
    }

    #[rstest]
    #[case::high_byte("caf\u{e9}")]
    #[case::emoji("\u{1f600}")]
    fn accepts_utf8_continuation_bytes(#[case] name: &str) {
        assert!(validname0(name).is_ok());
    }

    #[test]
    fn dotdot_rejected_unless_permitted() {
        assert!(validname("../etc", false).is_err());
        assert!(validname("../etc", true).is_ok());
    }

    #[test]
    fn parsename_collapses_slashes_and_dot() {
        let parsed = parsename("/usr//glenda/./bin/");
        let names: Vec<&str> = parsed.elems.iter().map(|e| e.text).collect();
        assert_eq!(names, vec!["usr", "glenda", "bin"]);
        assert!(parsed.rooted);
    }

    #[test]
    fn parsename_keeps_dotdot() {
        let parsed = parsename("a/../b");
        let names: Vec<&str> = parsed.elems.iter().map(|e| e.text).collect();
        assert_eq!(names, vec!["a", "..", "b"]);
    }

    #[test]
    fn parsename_sets_mustbedir_on_trailing_slash_or_dot() {
        assert!(!parsename("a/b").mustbedir);
        assert!(parsename("a/b/").mustbedir);
        assert!(parsename("a/b/.").mustbedir);
        assert!(parsename("").mustbedir);
        assert!(parsename(".").mustbedir);
    }

    #[test]
    fn parse_sharp_splits_letter_instance_and_rest() {
        let s = parse_sharp("#c0/foo/bar").unwrap();
        assert_eq!(s.letter, 'c');
        assert_eq!(s.instance, "0");
        assert_eq!(s.rest, "/foo/bar");
    }

    #[test]
    fn parse_sharp_with_no_instance_or_rest() {
        let s = parse_sharp("#e").unwrap();
        assert_eq!(s.letter, 'e');
        assert_eq!(s.instance, "");
        assert_eq!(s.rest, "");
    }

    #[test]
    fn last_element_picks_the_final_component() {
        assert_eq!(last_element("/usr/glenda/motd").unwrap(), "motd");
        assert_eq!(last_element("a/b/").unwrap(), "b");
    }

    #[test]
    fn last_element_falls_back_to_dot() {
        assert_eq!(last_element("/").unwrap(), ".");
        assert_eq!(last_element("").unwrap(), ".");
    }

    #[test]
    fn last_element_rejects_an_oversized_component() {
        let long = "a".repeat(ELEM_MAX + 1);
        assert!(last_element(&long).is_err());
    }
}
