//! Newtype wrappers for package pin components.
//!
//! Both serialize/deserialize as plain strings so manifests stay readable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Distribution name as written in the manifest (e.g. `Pillow`).
    PackageName
);

string_newtype!(
    /// Exact version string passed verbatim to the package client.
    PinnedVersion
);

impl PackageName {
    /// PEP 503 normalized form: lowercase, runs of `-`, `_`, `.` collapsed to `-`.
    ///
    /// Two names that normalize equally refer to the same distribution.
    pub fn normalized(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        let mut in_separator = false;
        for c in self.0.trim().chars() {
            if matches!(c, '-' | '_' | '.') {
                if !in_separator {
                    out.push('-');
                }
                in_separator = true;
            } else {
                out.extend(c.to_lowercase());
                in_separator = false;
            }
        }
        out
    }
}

impl PinnedVersion {
    /// True when the string names one exact version rather than a range.
    pub fn is_exact(&self) -> bool {
        let v = self.0.as_str();
        !v.is_empty()
            && !v
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '<' | '>' | '=' | '!' | '~' | '^' | '*' | ','))
    }
}
