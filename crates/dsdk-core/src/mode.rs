// SPDX-License-Identifier: MIT OR Apache-2.0
//! [`Mode`]: which environment a client is configured to talk to (spec §3, §4.6).

use serde::{Deserialize, Serialize};

/// Operating mode: controls base URLs and whether a missing signing key is
/// fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode {
    /// `true` when pointed at a local dev server rather than the hosted API.
    pub is_dev: bool,
    /// `true` when dev mode was set explicitly (client option or
    /// `INNGEST_DEV`), as opposed to inferred from absent credentials.
    pub is_explicit: bool,
    /// The dev server URL, if one was explicitly configured.
    pub explicit_dev_url: Option<String>,
}

impl Mode {
    /// The default cloud mode: not dev, not explicit.
    #[must_use]
    pub fn cloud() -> Self {
        Self {
            is_dev: false,
            is_explicit: false,
            explicit_dev_url: None,
        }
    }

    /// Dev mode, explicitly requested, optionally pointed at a custom URL.
    #[must_use]
    pub fn dev(explicit_dev_url: Option<String>) -> Self {
        Self {
            is_dev: true,
            is_explicit: true,
            explicit_dev_url,
        }
    }

    /// Dev mode inferred from the absence of credentials (not explicit).
    #[must_use]
    pub fn inferred_dev() -> Self {
        Self {
            is_dev: true,
            is_explicit: false,
            explicit_dev_url: None,
        }
    }
}
