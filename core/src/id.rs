use std::{borrow::Cow, fmt, ops::Deref};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

const UNDERSCORE_RUN: &str = "__";
const UNDERSCORE_TOKEN: &str = "__underscore";
const DOT_TOKEN: &str = "__dot";
const PERCENT_TOKEN: &str = "__percent";

/// Escape a wire identifier into a key that contains no dots or percent
/// signs.
///
/// Runs of two underscores become `__underscore`, `.` becomes `__dot` and
/// `%` becomes `__percent`. The input is scanned once, left to right, so an
/// escape token produced for one character is never re-read as part of
/// another.
pub fn escape(id: &str) -> Cow<'_, str> {
    if !id.contains(['.', '%']) && !id.contains(UNDERSCORE_RUN) {
        return Cow::Borrowed(id);
    }

    let mut out = String::with_capacity(id.len() + 16);
    let mut rest = id;
    while let Some(c) = rest.chars().next() {
        if let Some(tail) = rest.strip_prefix(UNDERSCORE_RUN) {
            out.push_str(UNDERSCORE_TOKEN);
            rest = tail;
            continue;
        }

        match c {
            '.' => out.push_str(DOT_TOKEN),
            '%' => out.push_str(PERCENT_TOKEN),
            c => out.push(c),
        }
        rest = &rest[c.len_utf8()..];
    }

    Cow::Owned(out)
}

/// Reverse of [`escape`].
pub fn unescape(key: &str) -> Cow<'_, str> {
    if !key.contains(UNDERSCORE_RUN) {
        return Cow::Borrowed(key);
    }

    let mut out = String::with_capacity(key.len());
    let mut rest = key;
    while let Some(c) = rest.chars().next() {
        if let Some(tail) = rest.strip_prefix(UNDERSCORE_TOKEN) {
            out.push_str(UNDERSCORE_RUN);
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix(DOT_TOKEN) {
            out.push('.');
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix(PERCENT_TOKEN) {
            out.push('%');
            rest = tail;
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }

    Cow::Owned(out)
}

macro_rules! escaped_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Serialize,
            Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(CompactString);

        impl $name {
            /// Build an id from the form used on the wire.
            pub fn from_wire(id: &str) -> Self {
                Self(escape(id).as_ref().into())
            }

            /// Build an id from an already escaped key.
            pub fn from_key(key: &str) -> Self {
                Self(key.into())
            }

            /// The escaped key used locally.
            pub fn as_key(&self) -> &str {
                &self.0
            }

            /// The identifier as the server knows it.
            pub fn to_wire(&self) -> Cow<'_, str> {
                unescape(&self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.to_wire())
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }
    };
}

escaped_id!(
    /// Server-defined source identifier (`sid`), held in escaped form.
    SourceId
);

escaped_id!(
    /// Server-defined content identifier (`cid`), held in escaped form.
    ContentId
);
