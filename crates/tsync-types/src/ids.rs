//! Opaque identifiers and validated tags.
//!
//! Entity identifiers are minted by an external service and are never
//! generated inside the core; these types only validate and carry them.
//! Validation is applied on construction *and* on deserialization.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

const MAX_ID_LEN: usize = 256;

fn validate(kind: &'static str, value: &str) -> Result<(), TypeError> {
    if value.is_empty() {
        return Err(TypeError::InvalidId {
            kind,
            reason: "must not be empty".into(),
        });
    }
    if value.len() > MAX_ID_LEN {
        return Err(TypeError::InvalidId {
            kind,
            reason: format!("longer than {MAX_ID_LEN} bytes"),
        });
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(TypeError::InvalidId {
            kind,
            reason: "must not contain whitespace or control characters".into(),
        });
    }
    Ok(())
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap a raw identifier.
            pub fn new(value: impl Into<String>) -> Result<Self, TypeError> {
                let value = value.into();
                validate($kind, &value)?;
                Ok(Self(value))
            }

            /// The raw identifier string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Short form for log output (first 12 characters).
            pub fn short(&self) -> &str {
                match self.0.char_indices().nth(12) {
                    Some((idx, _)) => &self.0[..idx],
                    None => &self.0,
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = TypeError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(
    /// Identifier of a [`Task`](crate::Task). Immutable once minted.
    TaskId,
    "task id"
);
opaque_id!(
    /// Identifier of a contributor [`Session`](crate::Session).
    SessionId,
    "session id"
);
opaque_id!(
    /// Identifier of a [`Project`](crate::Project).
    ProjectId,
    "project id"
);
opaque_id!(
    /// Identifier of a commit-log branch.
    BranchId,
    "branch id"
);
opaque_id!(
    /// Identifier of an immutable commit snapshot.
    CommitId,
    "commit id"
);
opaque_id!(
    /// Identifier of a recorded merge conflict.
    ConflictId,
    "conflict id"
);
opaque_id!(
    /// Contributor or platform tag (e.g. `claude`, `cursor`). Used as the
    /// vector-clock key for that contributor's edits.
    Contributor,
    "contributor tag"
);
opaque_id!(
    /// Cross-project topic bucket assigned by keyword classification.
    TopicId,
    "topic id"
);
