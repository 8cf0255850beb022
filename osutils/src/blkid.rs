use std::path::Path;

use anyhow::{Context, Error};
use regex::RegexBuilder;

use crate::dependencies::Dependency;

/// Matches the value of the first non-empty `UUID="..."` tag, including
/// `PARTUUID`, which shares the suffix.
const UUID_TAG_PATTERN: &str = r#"UUID="([^"]+)""#;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum BlkidParseError {
    #[error("No UUID found in blkid output for '{device}'")]
    NoUuid { device: String },
}

/// Extracts the first UUID-tagged value from the output of `blkid <device>`.
///
/// The filesystem `UUID` is printed before `PARTUUID`, so a formatted
/// partition yields its filesystem UUID. A partition without a filesystem
/// yields its partition UUID. Empty tags are skipped; output without any
/// UUID value, including empty output, is an error.
pub fn parse_uuid(device: &Path, output: &str) -> Result<String, Error> {
    let re = RegexBuilder::new(UUID_TAG_PATTERN)
        .case_insensitive(true)
        .build()?;

    re.captures(output)
        .and_then(|captures| captures.get(1))
        .map(|uuid| uuid.as_str().to_owned())
        .ok_or_else(|| {
            BlkidParseError::NoUuid {
                device: device.display().to_string(),
            }
            .into()
        })
}

/// Runs `blkid` against `device_path` and returns the first UUID it reports.
///
/// blkid's exit status is not checked: it exits with status 2 when it has
/// nothing to report, which surfaces here as a parse error.
pub fn get_uuid(device_path: impl AsRef<Path>) -> Result<String, Error> {
    let output = Dependency::Blkid
        .cmd()
        .arg(device_path.as_ref())
        .output()
        .context("Failed to execute blkid")?;

    parse_uuid(device_path.as_ref(), &output.output()).with_context(|| {
        format!(
            "Failed to get UUID for '{}' ({})",
            device_path.as_ref().display(),
            output.explain_exit()
        )
    })
}
