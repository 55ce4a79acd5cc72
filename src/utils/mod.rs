// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

pub mod data_structures;
pub mod display;
pub mod ids;
pub mod validity;

use lazy_static::lazy_static;

pub use ids::*;

lazy_static! {
    pub static ref VALIDITY_CHECKS: bool =
        env_feature_enabled("SIRC_VALIDITY_CHECKS").unwrap_or(cfg!(debug_assertions));
    pub static ref VALIDITY_CHECKS_WARN_ONLY: bool =
        env_feature_enabled("SIRC_VALIDITY_CHECKS_WARN_ONLY").unwrap_or(false);
    pub static ref PANIC_ON_ERROR: bool =
        env_feature_enabled("SIRC_PANIC_ON_ERROR").unwrap_or(false);
}

fn env_feature_enabled(feature: &'static str) -> Option<bool> {
    match std::env::var(feature) {
        Ok(val) => {
            if val.is_empty() {
                None
            } else {
                match val.as_str() {
                    "true" | "1" => Some(true),
                    "false" | "0" => Some(false),
                    other => panic!(
                        "Environment variable {feature} has unexpected value: '{other}'. Expected one of: true, false, 1, 0, or empty string"
                    ),
                }
            }
        }
        Err(_) => None,
    }
}

pub(crate) fn validity_checks_enabled() -> bool {
    *VALIDITY_CHECKS
}

pub(crate) fn validity_checks_warn_only() -> bool {
    *VALIDITY_CHECKS_WARN_ONLY
}

macro_rules! sir_validity_assert {
    ($cond:expr) => {
        sir_validity_assert!($cond, "Validity assertion failed: {}", stringify!($cond))
    };
    ($cond:expr, $($arg:tt)*) => {
        if $crate::utils::validity_checks_enabled() {
            #[allow(clippy::neg_cmp_op_on_partial_ord)]
            if !$cond {
                tracing::error!($($arg)*);
                if !$crate::utils::validity_checks_warn_only() {
                    assert!($cond, $($arg)*);
                }
            }
        }
    };
}

pub(crate) use sir_validity_assert;
