//! Package version normalisation.
//!
//! Storage keys use the lower-cased normalised form so that every spelling of
//! a version (`1.0`, `1.00.0.0`, `1.0.0+sha`) lands on the same row.

use crate::error::{ModelError, Result};

/// Normalise a package version: strip leading zeros, pad to three numeric
/// parts, keep a fourth part only when it is non-zero, keep prerelease labels
/// and drop build metadata.
pub fn normalize_version(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let without_metadata = match trimmed.split_once('+') {
        Some((release, _metadata)) => release,
        None => trimmed,
    };
    let (numbers, prerelease) = match without_metadata.split_once('-') {
        Some((numbers, prerelease)) => (numbers, Some(prerelease)),
        None => (without_metadata, None),
    };

    let invalid = || ModelError::InvalidVersion(raw.to_string());

    let parts: Vec<&str> = numbers.split('.').collect();
    if parts.is_empty() || parts.len() > 4 {
        return Err(invalid());
    }

    let mut parsed = [0u64; 4];
    for (slot, part) in parsed.iter_mut().zip(&parts) {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        *slot = part.parse().map_err(|_| invalid())?;
    }

    let mut normalized = format!("{}.{}.{}", parsed[0], parsed[1], parsed[2]);
    if parsed[3] != 0 {
        normalized.push_str(&format!(".{}", parsed[3]));
    }

    if let Some(prerelease) = prerelease {
        if prerelease.is_empty()
            || prerelease.split('.').any(|label| {
                label.is_empty()
                    || !label
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || b == b'-')
            })
        {
            return Err(invalid());
        }
        normalized.push('-');
        normalized.push_str(prerelease);
    }

    Ok(normalized)
}

pub fn lower_normalized_version(raw: &str) -> Result<String> {
    normalize_version(raw).map(|version| version.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_and_trims_numeric_parts() {
        assert_eq!(normalize_version("1").unwrap(), "1.0.0");
        assert_eq!(normalize_version("01.02").unwrap(), "1.2.0");
        assert_eq!(normalize_version("1.0.0.0").unwrap(), "1.0.0");
        assert_eq!(normalize_version("1.2.3.4").unwrap(), "1.2.3.4");
    }

    #[test]
    fn keeps_prerelease_and_drops_metadata() {
        assert_eq!(
            normalize_version("1.0.0-Beta.1+git.abc").unwrap(),
            "1.0.0-Beta.1"
        );
        assert_eq!(
            lower_normalized_version("2.0-RC-2").unwrap(),
            "2.0.0-rc-2"
        );
    }

    #[test]
    fn rejects_garbage() {
        for raw in ["", "a.b", "1..2", "1.2.3.4.5", "1.0.0-", "1.0.0-a..b"] {
            assert!(normalize_version(raw).is_err(), "{raw} should fail");
        }
    }
}
