//! Lenient semantic version parsing for versions reported by hosts

use semver::Version;

use crate::error::{Error, Result};

/// Parse a version as reported by package managers and `--version` output
///
/// Accepts surrounding whitespace, a leading `v`, zero-padded components
/// (`19.03.8`) and missing minor/patch components (`1.18` becomes `1.18.0`).
pub fn parse_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    let normalized = normalize(stripped);

    Version::parse(&normalized).map_err(|source| Error::VersionParseError {
        raw: raw.to_string(),
        source,
    })
}

/// Version assigned to components that are not managed independently of the OS
pub fn unmanaged_version() -> Version {
    Version::new(0, 0, 0)
}

fn normalize(version: &str) -> String {
    // Pre-release and build metadata are left untouched
    let core_end = version.find(['-', '+']).unwrap_or(version.len());
    let (core, rest) = version.split_at(core_end);

    let mut parts: Vec<&str> = core
        .split('.')
        .map(|part| match part.trim_start_matches('0') {
            "" if !part.is_empty() => "0",
            trimmed => trimmed,
        })
        .collect();

    if !core.is_empty() {
        while parts.len() < 3 {
            parts.push("0");
        }
    }

    format!("{}{rest}", parts.join("."))
}
