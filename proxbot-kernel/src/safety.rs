//! Denylist screening of shell commands typed into chat.
//!
//! This is a speed bump against accidents, NOT a security boundary. It
//! matches literal patterns and is bypassed by anything equivalent that is
//! not on the list: different spacing or flag order, aliases, variables,
//! `sh -c "$(echo ...)"`, scripts, and so on. Anyone on the whitelist
//! effectively has a root shell on the host and its guests.

use regex::{RegexSet, RegexSetBuilder};
use std::sync::OnceLock;

/// Blocked command shapes, matched case-insensitively against the trimmed input.
const DENYLIST: &[(&str, &str)] = &[
    ("recursive removal of /", r"\brm\s+-[a-z]*(rf|fr)[a-z]*\s+/\*?(\s|;|&|\||$)"),
    ("filesystem formatting", r"\bmkfs"),
    ("raw device write", r"\bdd\b.*\bof=/dev/"),
    ("device (un)mount", r"\bu?mount\b.*\s/dev/"),
    ("partition table editor", r"\b(fdisk|sfdisk|cfdisk|gdisk|parted)\b"),
    ("disk wipe", r"\bwipefs\b"),
    ("host power control", r"\b(shutdown|halt|poweroff|reboot)\b"),
    ("fork bomb", r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("command rejected by safety filter ({reason})")]
pub struct UnsafeCommand {
    pub reason: &'static str,
}

fn denylist() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSetBuilder::new(DENYLIST.iter().map(|(_, pattern)| *pattern))
            .case_insensitive(true)
            .build()
            .expect("denylist patterns are valid")
    })
}

/// `Ok(())` when no pattern matches; the first matching rule otherwise.
pub fn screen(command: &str) -> Result<(), UnsafeCommand> {
    match denylist().matches(command.trim()).iter().next() {
        Some(idx) => Err(UnsafeCommand {
            reason: DENYLIST[idx].0,
        }),
        None => Ok(()),
    }
}
