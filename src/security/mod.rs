//! Validation of untrusted feature names.
//!
//! A feature name is derived from caller input (usually a file name) and later
//! becomes a path segment for manifests and logs. Validation is fail-fast and
//! never repairs input: the first failing check produces a distinct
//! [`ValidationError`].
//!
//! Checks, in order:
//! 1. path traversal (`..`) anywhere in the raw input
//! 2. strip one leading marker prefix (start only, at most once)
//! 3. whitelist `^[A-Za-z0-9_-]+$`
//! 4. length bound ([`MAX_FEATURE_NAME_LEN`])
//! 5. explicit dangerous-character scan
//! 6. redundant storage prefix (e.g. `prp_feature` → use `feature`)
//! 7. reserved names (`.`, `..`, platform device names)

use crate::errors::ValidationError;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

/// Maximum accepted length of a feature name, after prefix stripping.
pub const MAX_FEATURE_NAME_LEN: usize = 50;

/// Marker prefix stripped from raw names by default (`INITIAL_auth` → `auth`).
pub const DEFAULT_STRIP_PREFIX: &str = "INITIAL_";

/// Prefix that duplicates the storage location's meaning (`prp_auth` → `auth`).
pub const DEFAULT_REDUNDANT_PREFIX: &str = "prp_";

/// Characters rejected explicitly, even though the whitelist already excludes them.
pub const DANGEROUS_CHARS: &[char] = &['$', '`', ';', '&', '|', '>', '<', '\n', '\r'];

const RESERVED_NAMES: &[&str] = &[
    ".", "..", "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6",
    "COM7", "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8",
    "LPT9",
];

static WHITELIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+$").expect("whitelist pattern is a valid static regex")
});

/// A feature name that passed validation. Safe to use as one path segment.
///
/// The only way to obtain one is through [`Validator::validate`] (or the
/// [`validate`] shorthand), so any API taking `&FeatureName` cannot be handed
/// raw input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct FeatureName(String);

impl FeatureName {
    /// Validate `raw` with the default options.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        validate(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FeatureName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Feature-name validator with its prefix options.
#[derive(Debug, Clone)]
pub struct Validator {
    strip_prefix: String,
    redundant_prefix: Option<String>,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            strip_prefix: DEFAULT_STRIP_PREFIX.to_string(),
            redundant_prefix: Some(DEFAULT_REDUNDANT_PREFIX.to_string()),
        }
    }
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the marker prefix stripped from the start of raw names. Empty disables stripping.
    pub fn with_strip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.strip_prefix = prefix.into();
        self
    }

    /// Enable or disable the redundant-prefix check.
    pub fn with_redundant_prefix(mut self, prefix: Option<String>) -> Self {
        self.redundant_prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    /// Validate and normalize a raw feature name.
    pub fn validate(&self, raw: &str) -> Result<FeatureName, ValidationError> {
        if raw.is_empty() {
            return Err(ValidationError::Empty);
        }

        if raw.contains("..") {
            return Err(ValidationError::PathTraversal {
                raw: raw.to_string(),
            });
        }

        let name = self.strip_marker(raw)?;

        if !WHITELIST.is_match(name) {
            let offending = name
                .chars()
                .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
                .unwrap_or('\u{0}');
            return Err(ValidationError::InvalidCharacters {
                name: name.to_string(),
                offending,
            });
        }

        let len = name.chars().count();
        if len > MAX_FEATURE_NAME_LEN {
            return Err(ValidationError::TooLong {
                len,
                max: MAX_FEATURE_NAME_LEN,
            });
        }

        check_dangerous(name)?;
        self.check_redundant_prefix(name)?;
        check_reserved(name)?;

        Ok(FeatureName(name.to_string()))
    }

    /// Remove at most one leading occurrence of the marker prefix.
    fn strip_marker<'a>(&self, raw: &'a str) -> Result<&'a str, ValidationError> {
        if self.strip_prefix.is_empty() {
            return Ok(raw);
        }
        match raw.strip_prefix(self.strip_prefix.as_str()) {
            Some("") => Err(ValidationError::EmptyAfterPrefix {
                raw: raw.to_string(),
                prefix: self.strip_prefix.clone(),
            }),
            Some(rest) => Ok(rest),
            None => Ok(raw),
        }
    }

    fn check_redundant_prefix(&self, name: &str) -> Result<(), ValidationError> {
        let Some(prefix) = self.redundant_prefix.as_deref() else {
            return Ok(());
        };
        // Whitelisted names are ASCII, so byte slicing at prefix.len() is safe.
        if name.len() >= prefix.len() && name[..prefix.len()].eq_ignore_ascii_case(prefix) {
            let suggested = &name[prefix.len()..];
            if suggested.is_empty() {
                return Err(ValidationError::EmptyAfterPrefix {
                    raw: name.to_string(),
                    prefix: prefix.to_string(),
                });
            }
            return Err(ValidationError::RedundantPrefix {
                name: name.to_string(),
                prefix: prefix.to_string(),
                suggested: suggested.to_string(),
            });
        }
        Ok(())
    }
}

fn check_dangerous(name: &str) -> Result<(), ValidationError> {
    match name.chars().find(|c| DANGEROUS_CHARS.contains(c)) {
        Some(ch) => Err(ValidationError::DangerousCharacter {
            name: name.to_string(),
            ch,
        }),
        None => Ok(()),
    }
}

fn check_reserved(name: &str) -> Result<(), ValidationError> {
    if RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
    {
        return Err(ValidationError::ReservedName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Validate a raw feature name with the default options.
pub fn validate(raw: &str) -> Result<FeatureName, ValidationError> {
    Validator::default().validate(raw)
}

/// Derive a feature name from a file path's stem (`INITIAL_auth.md` → `auth`).
pub fn feature_name_from_path(
    validator: &Validator,
    path: &Path,
) -> Result<FeatureName, ValidationError> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    validator.validate(&stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_accepts_simple_name() {
        let name = validate("user-auth_v2").unwrap();
        assert_eq!(name.as_str(), "user-auth_v2");
    }

    #[test]
    fn test_strips_marker_prefix_once() {
        let validator = Validator::new().with_strip_prefix("MARKER_");
        let name = validator.validate("MARKER_MARKER_x").unwrap();
        assert_eq!(name.as_str(), "MARKER_x");
    }

    #[test]
    fn test_strips_prefix_only_at_start() {
        let name = validate("auth_INITIAL_flow").unwrap();
        assert_eq!(name.as_str(), "auth_INITIAL_flow");
        assert_eq!(validate("INITIAL_auth").unwrap().as_str(), "auth");
    }

    #[test]
    fn test_rejects_empty_after_strip() {
        assert!(matches!(
            validate("INITIAL_"),
            Err(ValidationError::EmptyAfterPrefix { .. })
        ));
    }

    #[test]
    fn test_rejects_empty_input() {
        assert_eq!(validate(""), Err(ValidationError::Empty));
    }

    #[test]
    fn test_rejects_path_traversal() {
        let err = validate("../../etc/passwd").unwrap_err();
        assert!(matches!(err, ValidationError::PathTraversal { .. }));
        assert!(err.to_string().contains("path traversal"));
    }

    #[test]
    fn test_traversal_checked_before_stripping() {
        assert!(matches!(
            validate("INITIAL_..x"),
            Err(ValidationError::PathTraversal { .. })
        ));
    }

    #[test]
    fn test_rejects_separators_and_metacharacters() {
        for raw in ["a/b", "a\\b", "a b", "a;rm", "a$b", "a`b", "a\nb", "a\tb", "ü"] {
            assert!(
                matches!(
                    validate(raw),
                    Err(ValidationError::InvalidCharacters { .. })
                ),
                "expected whitelist rejection for {raw:?}"
            );
        }
    }

    #[test]
    fn test_invalid_characters_reports_offender() {
        match validate("feat ure") {
            Err(ValidationError::InvalidCharacters { offending, .. }) => {
                assert_eq!(offending, ' ')
            }
            other => panic!("Expected InvalidCharacters, got {other:?}"),
        }
    }

    #[test]
    fn test_length_bound() {
        let ok = "a".repeat(MAX_FEATURE_NAME_LEN);
        assert!(validate(&ok).is_ok());

        let long = "a".repeat(MAX_FEATURE_NAME_LEN + 1);
        assert_eq!(
            validate(&long),
            Err(ValidationError::TooLong { len: 51, max: 50 })
        );
    }

    #[test]
    fn test_length_measured_after_strip() {
        let raw = format!("INITIAL_{}", "a".repeat(MAX_FEATURE_NAME_LEN));
        assert!(validate(&raw).is_ok());
    }

    #[test]
    fn test_dangerous_scan_rejects_each_character() {
        for ch in DANGEROUS_CHARS {
            let name = format!("x{ch}y");
            assert!(matches!(
                check_dangerous(&name),
                Err(ValidationError::DangerousCharacter { .. })
            ));
        }
        assert!(check_dangerous("safe_name").is_ok());
    }

    #[test]
    fn test_redundant_prefix_names_corrected_form() {
        match validate("prp_feature") {
            Err(ValidationError::RedundantPrefix { suggested, .. }) => {
                assert_eq!(suggested, "feature")
            }
            other => panic!("Expected RedundantPrefix, got {other:?}"),
        }
        assert!(matches!(
            validate("PRP_feature"),
            Err(ValidationError::RedundantPrefix { .. })
        ));
    }

    #[test]
    fn test_redundant_prefix_check_can_be_disabled() {
        let validator = Validator::new().with_redundant_prefix(None);
        assert_eq!(
            validator.validate("prp_feature").unwrap().as_str(),
            "prp_feature"
        );
    }

    #[test]
    fn test_rejects_reserved_device_names() {
        for raw in ["CON", "nul", "Com1", "LPT9", "aux"] {
            assert!(
                matches!(validate(raw), Err(ValidationError::ReservedName { .. })),
                "expected reserved rejection for {raw}"
            );
        }
        assert!(validate("CONSOLE").is_ok());
    }

    #[test]
    fn test_feature_name_from_path() {
        let validator = Validator::new();
        let name = feature_name_from_path(&validator, Path::new("/tmp/INITIAL_auth.md")).unwrap();
        assert_eq!(name.as_str(), "auth");
        assert!(feature_name_from_path(&validator, Path::new("/tmp/..")).is_err());
    }

    proptest! {
        #[test]
        fn prop_accepted_names_are_safe_segments(raw in "\\PC{0,60}") {
            if let Ok(name) = validate(&raw) {
                let s = name.as_str();
                prop_assert!(!s.is_empty() && s.len() <= MAX_FEATURE_NAME_LEN);
                prop_assert!(s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
                prop_assert!(!s.contains(".."));
                prop_assert!(!s.contains('/'));
                prop_assert!(!s.chars().any(|c| DANGEROUS_CHARS.contains(&c)));
            }
        }

        #[test]
        fn prop_traversal_always_rejected(prefix in "\\PC{0,20}", suffix in "\\PC{0,20}") {
            let raw = format!("{prefix}..{suffix}");
            prop_assert!(
                matches!(validate(&raw), Err(ValidationError::PathTraversal { .. })),
                "path traversal must be rejected"
            );
        }

        #[test]
        fn prop_whitelisted_names_accepted(raw in "[a-z][A-Za-z0-9_-]{0,40}") {
            prop_assume!(!raw.to_ascii_lowercase().starts_with("prp_"));
            prop_assume!(!RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(&raw)));
            let validated = validate(&raw).unwrap();
            prop_assert_eq!(validated.as_str(), raw.as_str());
        }
    }
}
