//! Error kinds surfaced to callers (spec §7), plus the quoted-name wrapping
//! that `namec`'s outer handler performs the way the original's
//! `namelenerror`/`nameerror` did.

use thiserror::Error;

/// Maximum length of a quoted name fragment in an error message, mirroring
/// the original kernel's `ERRMAX`.
pub const ERRMAX: usize = 128;

/// The bare error kind, with no name context attached yet.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NsErrorKind {
    #[error("not a directory")]
    NotDirectory,
    #[error("does not exist")]
    DoesNotExist,
    #[error("file exists")]
    Exists,
    #[error("mount conflict")]
    MountConflict,
    #[error("not mounted")]
    UnmountNotFound,
    #[error("not in union")]
    UnionMismatch,
    #[error("no permission for create")]
    NoCreatePermission,
    #[error("attach prohibited by sandboxing")]
    NoAttach,
    #[error("unknown device letter '{0}'")]
    BadSharp(char),
    #[error("name too long")]
    NameTooLong,
    #[error("bad character in name")]
    BadCharacter,
    #[error("short stat")]
    ShortStat,
    #[error("clone failed")]
    CloneFailed,
    #[error("empty file name")]
    Empty,
    /// A device returned an error of its own; passed through verbatim.
    #[error("{0}")]
    Device(String),
}

/// An error surfaced by the resolver, optionally carrying the quoted name
/// fragment the caller was resolving when the error occurred.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{}", format_message(.kind, .quoted))]
pub struct NsError {
    pub kind: NsErrorKind,
    pub quoted: Option<String>,
}

fn format_message(kind: &NsErrorKind, quoted: &Option<String>) -> String {
    match quoted {
        Some(q) => format!("'{q}' {kind}"),
        None => kind.to_string(),
    }
}

impl NsError {
    pub fn bare(kind: NsErrorKind) -> Self {
        Self { kind, quoted: None }
    }

    pub fn device(message: impl Into<String>) -> Self {
        Self::bare(NsErrorKind::Device(message.into()))
    }

    /// Attaches a quoted fragment of `full_name`, truncated the way
    /// `namelenerror` truncates: if the fragment is short enough, quote it
    /// whole; otherwise quote a `...`-prefixed suffix so the message stays
    /// under [`ERRMAX`].
    pub fn quote_name(mut self, full_name: &str, prefix_len: usize) -> Self {
        let err_len = self.kind.to_string().len();
        let prefix_len = prefix_len.min(full_name.len());
        let slice = &full_name[..prefix_len];

        let quoted = if prefix_len < ERRMAX / 3 || prefix_len + err_len < 2 * ERRMAX / 3 {
            slice.to_string()
        } else {
            // Keep a suffix that, combined with the error text, still fits,
            // walking backwards to a '/' boundary when possible.
            let mut start = 0usize;
            let mut cursor = prefix_len;
            loop {
                let candidate_len = prefix_len - start;
                if candidate_len < ERRMAX / 3 || candidate_len + err_len < 2 * ERRMAX / 3 {
                    break;
                }
                if cursor == 0 {
                    break;
                }
                cursor -= 1;
                while cursor > 0 && !full_name.is_char_boundary(cursor) {
                    cursor -= 1;
                }
                if slice.as_bytes().get(cursor) == Some(&b'/') {
                    start = cursor + 1;
                }
                if cursor == 0 {
                    start = 0;
                    break;
                }
            }
            if start == 0 {
                // Ridiculously long with no helpful '/': hard-truncate.
                let cut = prefix_len.saturating_sub(ERRMAX / 4);
                let mut cut = cut.min(slice.len());
                while cut > 0 && !slice.is_char_boundary(cut) {
                    cut -= 1;
                }
                format!("...{}", &slice[cut..])
            } else {
                format!("...{}", &slice[start..])
            }
        };

        self.quoted = Some(quoted);
        self
    }
}

pub type NsResult<T> = Result<T, NsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn short_name_quoted_whole() {
        let err = NsError::bare(NsErrorKind::DoesNotExist).quote_name("/a/b/c", 6);
        assert_eq!(err.quoted.as_deref(), Some("/a/b/c"));
        assert_eq!(err.to_string(), "'/a/b/c' does not exist");
    }

    #[test]
    fn device_error_passed_through_verbatim() {
        let err = NsError::device("9p: no route to host");
        assert_eq!(err.to_string(), "9p: no route to host");
    }
}
