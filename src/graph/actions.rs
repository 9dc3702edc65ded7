//! Custom actions: timing buckets and install-sequence placement.
//!
//! Timing is parsed into [`ActionTiming`] exactly once, during item
//! processing; everything downstream (including sequence emission) is
//! total over the enum, so an unrecognized timing string can only fail in
//! one place.

use anyhow::{bail, Result};
use std::fmt;

/// The five points a custom action may run at.
///
/// Variant order is emission order for the install-sequence fragment;
/// within one bucket, actions keep their declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ActionTiming {
    /// Before files are laid down, on first install.
    BeforeInstall,
    /// After files are laid down, on first install.
    AfterInstall,
    /// After files are laid down, when replacing an older version.
    AfterUpgrade,
    /// Before files are removed, on uninstall.
    BeforeUninstall,
    /// After files are removed, on uninstall.
    AfterUninstall,
}

impl ActionTiming {
    pub const ALL: [ActionTiming; 5] = [
        ActionTiming::BeforeInstall,
        ActionTiming::AfterInstall,
        ActionTiming::AfterUpgrade,
        ActionTiming::BeforeUninstall,
        ActionTiming::AfterUninstall,
    ];

    /// Parse a declared timing value. Unrecognized values are a hard
    /// error at item-processing time.
    pub fn parse(value: &str) -> Result<ActionTiming> {
        match value.trim().to_ascii_lowercase().as_str() {
            "before-install" => Ok(ActionTiming::BeforeInstall),
            "after-install" => Ok(ActionTiming::AfterInstall),
            "after-upgrade" => Ok(ActionTiming::AfterUpgrade),
            "before-uninstall" => Ok(ActionTiming::BeforeUninstall),
            "after-uninstall" => Ok(ActionTiming::AfterUninstall),
            other => bail!(
                "unrecognized custom action timing '{}' (expected one of: \
                 before-install, after-install, after-upgrade, \
                 before-uninstall, after-uninstall)",
                other
            ),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionTiming::BeforeInstall => "before-install",
            ActionTiming::AfterInstall => "after-install",
            ActionTiming::AfterUpgrade => "after-upgrade",
            ActionTiming::BeforeUninstall => "before-uninstall",
            ActionTiming::AfterUninstall => "after-uninstall",
        }
    }

    /// Fixed placement template for the bucket.
    ///
    /// `before-install` runs synchronously and unprivileged; every other
    /// bucket runs deferred inside the elevated install transaction.
    pub fn schedule(&self) -> Schedule {
        match self {
            ActionTiming::BeforeInstall => Schedule {
                anchor: "InstallFiles",
                before_anchor: true,
                condition: Some("NOT Installed"),
                deferred: false,
            },
            ActionTiming::AfterInstall => Schedule {
                anchor: "InstallFiles",
                before_anchor: false,
                condition: Some("NOT Installed"),
                deferred: true,
            },
            ActionTiming::AfterUpgrade => Schedule {
                anchor: "InstallFiles",
                before_anchor: false,
                condition: Some("UPGRADINGPRODUCTCODE"),
                deferred: true,
            },
            ActionTiming::BeforeUninstall => Schedule {
                anchor: "RemoveFiles",
                before_anchor: true,
                condition: Some("(REMOVE=\"ALL\") AND NOT UPGRADINGPRODUCTCODE"),
                deferred: true,
            },
            ActionTiming::AfterUninstall => Schedule {
                anchor: "RemoveFiles",
                before_anchor: false,
                condition: Some("(REMOVE=\"ALL\") AND NOT UPGRADINGPRODUCTCODE"),
                deferred: true,
            },
        }
    }
}

impl fmt::Display for ActionTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how a bucket's actions sit in the install sequence.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    /// Standard action the entry is placed relative to.
    pub anchor: &'static str,
    pub before_anchor: bool,
    /// Install condition gating execution on the target machine.
    pub condition: Option<&'static str>,
    /// Deferred actions run elevated without impersonation; immediate
    /// ones run as the installing user.
    pub deferred: bool,
}

/// A custom action materialized from the description.
#[derive(Debug, Clone)]
pub struct CustomAction {
    pub id: String,
    pub command: String,
    /// Identifier of the directory the command runs in.
    pub working_dir_id: String,
    pub timing: ActionTiming,
}
