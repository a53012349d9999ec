//! Tag validation
//!
//! Tags are dotted identifiers such as `thing` or `bob.charles`: each
//! dot-separated part starts with a letter and continues with letters or digits.

use crate::error::{BunkrError, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Pattern every tag must match
pub const TAG_PATTERN: &str = r"^[a-zA-Z][a-zA-Z0-9]*(\.[a-zA-Z][a-zA-Z0-9]*)*$";

/// Minimum tag length in characters
pub const MIN_TAG_LENGTH: usize = 2;

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(TAG_PATTERN).expect("tag pattern is a valid regex"))
}

pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.len() < MIN_TAG_LENGTH {
        return Err(BunkrError::invalid_tag(
            tag,
            format!("tag length must be at least {} characters", MIN_TAG_LENGTH),
        ));
    }
    if !tag_regex().is_match(tag) {
        return Err(BunkrError::invalid_tag(
            tag,
            format!("does not match required pattern {}", TAG_PATTERN),
        ));
    }
    Ok(())
}

/// Add `tag` to `tags`. Returns whether the set changed.
pub fn add_tag(tags: &mut BTreeSet<String>, tag: &str) -> Result<bool> {
    validate_tag(tag)?;
    Ok(tags.insert(tag.to_string()))
}

/// Remove `tag` from `tags`. Returns whether the set changed.
pub fn remove_tag(tags: &mut BTreeSet<String>, tag: &str) -> bool {
    tags.remove(tag)
}

/// Replace `tags` wholesale. Nothing changes unless every new tag is valid.
pub fn replace_tags<I, S>(tags: &mut BTreeSet<String>, new_tags: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut checked = BTreeSet::new();
    for tag in new_tags {
        let tag = tag.as_ref();
        validate_tag(tag)?;
        checked.insert(tag.to_string());
    }
    *tags = checked;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_tags() {
        for bad in ["", "a", "bad alphabet", "0aaaaa", "aaaaaa.", ".lead", "a..b", "b.9x"] {
            assert!(validate_tag(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_accepted_tags() {
        for good in ["thing", "bob.charles", "ab", "Mixed.Case9", "a1.b2.c3"] {
            assert!(validate_tag(good).is_ok(), "{:?} should be accepted", good);
        }
    }

    #[test]
    fn test_add_and_remove_report_change() {
        let mut tags = BTreeSet::new();
        assert!(add_tag(&mut tags, "thing").unwrap());
        assert!(!add_tag(&mut tags, "thing").unwrap());
        assert!(add_tag(&mut tags, "0bad").is_err());
        assert_eq!(tags.len(), 1);

        assert!(!remove_tag(&mut tags, "absent"));
        assert!(remove_tag(&mut tags, "thing"));
        assert!(tags.is_empty());
    }

    #[test]
    fn test_replace_is_all_or_nothing() {
        let mut tags = BTreeSet::new();
        add_tag(&mut tags, "keep").unwrap();
        assert!(replace_tags(&mut tags, ["good", "bad tag"]).is_err());
        assert!(tags.contains("keep"));

        replace_tags(&mut tags, ["one", "two"]).unwrap();
        assert_eq!(tags.len(), 2);
        assert!(!tags.contains("keep"));
    }
}
