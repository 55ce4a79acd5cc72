//! String-backed identities for graph elements.
//!
//! Identities are unique across graphs: fresh ids are minted from a
//! process-wide counter, and a cloned graph receives freshly minted vertex
//! ids rather than reusing its source's. Ordering on ids is textual, which
//! is the tie-break used wherever a deterministic order is required.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_derive::{Deserialize, Serialize};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

fn mint(prefix: &str) -> String {
    let n = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}{n}")
}

macro_rules! string_id {
    ($(#[$attr:meta])* $name:ident, $prefix:literal) => {
        $(#[$attr])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn fresh() -> Self {
                Self(mint($prefix))
            }

            pub fn as_str(&self) -> &str {
                &self.0
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

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(VertexId, "v");
string_id!(EdgeId, "e");
string_id!(GraphId, "g");
string_id!(RegionId, "r");
string_id!(BlockId, "b");
string_id!(AllocId, "a");
string_id!(BorrowId, "bw");
string_id!(TransferId, "t");
string_id!(DeviceId, "d");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_unique() {
        let a = VertexId::fresh();
        let b = VertexId::fresh();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_round_trip_through_strings() {
        let v: VertexId = "v42".into();
        assert_eq!(v.as_str(), "v42");
        assert_eq!(v.to_string(), "v42");
    }
}
