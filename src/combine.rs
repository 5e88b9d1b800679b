//! Grouping several sources into one artifact.

use crate::asset_paths::combined_name;
use crate::error::Result;
use crate::models::ResolvedSource;

/// Name and freshness of a combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedUnit {
    /// Logical name the combination is fingerprinted under, without any timestamp.
    pub logical_name: String,
    /// Newest modification time among the members.
    pub modification_time: u64,
}

/// Validate the logical names of a combination before anything is resolved.
///
/// Fails with [`crate::PipelineError::ExtensionMismatch`] when the members disagree on
/// their extension. Returns the combined logical name.
pub fn check_members<S: AsRef<str>>(references: &[S], max_name_length: usize) -> Result<String> {
    combined_name(references, max_name_length)
}

/// Combine resolved `sources`, in order.
///
/// A single member yields its own reference and modification time.
pub fn combine(sources: &[ResolvedSource], max_name_length: usize) -> Result<CombinedUnit> {
    let references: Vec<&str> = sources
        .iter()
        .map(|source| source.reference.as_str())
        .collect();

    let logical_name = match references.as_slice() {
        [single] => single.to_string(),
        many => combined_name(many, max_name_length)?,
    };
    let modification_time = sources
        .iter()
        .map(|source| source.modification_time)
        .max()
        .unwrap_or_default();

    Ok(CombinedUnit {
        logical_name,
        modification_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::path::PathBuf;

    fn member(reference: &str, modification_time: u64) -> ResolvedSource {
        ResolvedSource {
            reference: reference.to_string(),
            absolute_path: PathBuf::from("/srv/media").join(reference.trim_start_matches('/')),
            root: PathBuf::from("/srv/media"),
            modification_time,
        }
    }

    #[test]
    fn takes_newest_member_time() {
        let unit = combine(&[member("/js/a.js", 10), member("/js/b.js", 30)], 40).unwrap();
        assert_eq!(unit.logical_name, "/js/a_b.js");
        assert_eq!(unit.modification_time, 30);
    }

    #[test]
    fn order_is_significant() {
        let forward = combine(&[member("/a.css", 1), member("/b.css", 1)], 40).unwrap();
        let backward = combine(&[member("/b.css", 1), member("/a.css", 1)], 40).unwrap();
        assert_ne!(forward.logical_name, backward.logical_name);
    }

    #[test]
    fn single_member_is_its_own_unit() {
        let unit = combine(&[member("/foo.js", 7)], 40).unwrap();
        assert_eq!(unit.logical_name, "/foo.js");
        assert_eq!(unit.modification_time, 7);
    }

    #[test]
    fn combined_base_respects_length_bound() {
        let members: Vec<_> = (0..10)
            .map(|x| member(&format!("/jquery_something_{x}.js"), x))
            .collect();
        let unit = combine(&members, 40).unwrap();
        let base = unit
            .logical_name
            .trim_start_matches('/')
            .trim_end_matches(".js");
        assert_eq!(base.chars().count(), 40);
        assert_eq!(unit.modification_time, 9);
    }

    #[test]
    fn mixed_extensions_fail_before_resolution() {
        let err = check_members(&["/a.js", "/b.css"], 40).unwrap_err();
        assert!(matches!(err, PipelineError::ExtensionMismatch { .. }));
    }
}
