//! Fingerprinted file names and combined names.

use std::fmt;

use crate::error::{PipelineError, Result};

/// Output name with the source modification time spliced in before the extension.
///
/// `"/css/app.css"` at mtime `1257894000` becomes `"/css/app.1257894000.css"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeneratedName(String);

impl GeneratedName {
    /// Build the name for `logical` at the given Unix modification time.
    pub fn new(logical: &str, modification_time: u64) -> Self {
        let (stem, extension) = split_extension(logical);
        Self(format!("{stem}.{modification_time}{extension}"))
    }

    /// Borrow the name as a logical path.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeneratedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split a logical path into stem and extension (the extension keeps its dot).
///
/// Only the last path component is considered and leading dots do not start an
/// extension, so `"/conf/.htaccess"` has none.
pub fn split_extension(path: &str) -> (&str, &str) {
    let name_start = path.rfind('/').map_or(0, |index| index + 1);
    let name = &path[name_start..];
    let leading_dots = name.len() - name.trim_start_matches('.').len();

    match name[leading_dots..].rfind('.') {
        Some(index) => path.split_at(name_start + leading_dots + index),
        None => (path, ""),
    }
}

/// Lower-cased extension without the dot, if any.
pub fn extension_of(path: &str) -> Option<String> {
    let (_, extension) = split_extension(path);
    extension
        .strip_prefix('.')
        .filter(|value| !value.is_empty())
        .map(str::to_ascii_lowercase)
}

/// Remove a trailing `.<digits>` timestamp segment from a stem.
pub fn strip_timestamp(stem: &str) -> (&str, Option<u64>) {
    let Some((head, tail)) = stem.rsplit_once('.') else {
        return (stem, None);
    };
    if head.is_empty() || head.ends_with('/') || tail.is_empty() {
        return (stem, None);
    }
    if !tail.bytes().all(|byte| byte.is_ascii_digit()) {
        return (stem, None);
    }

    match tail.parse() {
        Ok(timestamp) => (head, Some(timestamp)),
        Err(_) => (stem, None),
    }
}

/// Compute the logical name of a combination of `names`.
///
/// Base names are joined with `_` and the joined string is cut at `max_length`
/// characters. The result lives in the deepest directory shared by every member. When the
/// members already carry timestamp segments the greatest one is kept in the result.
pub fn combine_filenames<S: AsRef<str>>(names: &[S], max_length: usize) -> Result<String> {
    let parts = CombinedParts::from_names(names, max_length)?;
    let timestamp = parts
        .newest
        .map(|timestamp| format!(".{timestamp}"))
        .unwrap_or_default();
    Ok(format!("{}{timestamp}{}", parts.stem, parts.extension))
}

/// Like [`combine_filenames`], but embedded timestamps are dropped entirely.
///
/// This is the logical name a combination is fingerprinted under.
pub fn combined_name<S: AsRef<str>>(names: &[S], max_length: usize) -> Result<String> {
    let parts = CombinedParts::from_names(names, max_length)?;
    Ok(format!("{}{}", parts.stem, parts.extension))
}

struct CombinedParts<'a> {
    stem: String,
    extension: &'a str,
    newest: Option<u64>,
}

impl<'a> CombinedParts<'a> {
    fn from_names<S: AsRef<str>>(names: &'a [S], max_length: usize) -> Result<Self> {
        let mut extension: Option<(&str, &str)> = None;
        let mut bases = Vec::with_capacity(names.len());
        let mut common_dir: Option<Vec<&str>> = None;
        let mut newest: Option<u64> = None;

        for name in names {
            let name = name.as_ref().trim();
            let (stem, ext) = split_extension(name);
            match extension {
                None => extension = Some((ext, name)),
                Some((expected, first)) if !expected.eq_ignore_ascii_case(ext) => {
                    return Err(PipelineError::ExtensionMismatch {
                        first: first.to_string(),
                        other: name.to_string(),
                    });
                }
                Some(_) => {}
            }

            let (dir, base) = match stem.rfind('/') {
                Some(index) => (stem[..index].split('/').collect::<Vec<_>>(), &stem[index + 1..]),
                None => (Vec::new(), stem),
            };
            let (base, timestamp) = strip_timestamp(base);
            bases.push(base);
            newest = newest.max(timestamp);

            common_dir = Some(match common_dir {
                None => dir,
                Some(current) => current
                    .iter()
                    .zip(dir.iter())
                    .take_while(|(left, right)| left == right)
                    .map(|(left, _)| *left)
                    .collect(),
            });
        }

        let joined: String = bases.join("_").chars().take(max_length).collect();
        let stem = match common_dir {
            Some(dir) if !dir.is_empty() => format!("{}/{joined}", dir.join("/")),
            _ => joined,
        };

        Ok(Self {
            stem,
            extension: extension.map_or("", |(ext, _)| ext),
            newest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splices_timestamp_before_extension() {
        assert_eq!(
            GeneratedName::new("/foo.js", 1257894000).as_str(),
            "/foo.1257894000.js"
        );
        assert_eq!(
            GeneratedName::new("/js/jquery-1.9.9.min.js", 42).as_str(),
            "/js/jquery-1.9.9.min.42.js"
        );
        assert_eq!(GeneratedName::new("/LICENSE", 7).as_str(), "/LICENSE.7");
    }

    #[test]
    fn extension_comes_from_last_component() {
        assert_eq!(split_extension("/v1.2/readme"), ("/v1.2/readme", ""));
        assert_eq!(split_extension("/conf/.htaccess"), ("/conf/.htaccess", ""));
        assert_eq!(split_extension("/css/app.css"), ("/css/app", ".css"));
        assert_eq!(extension_of("/img/LOGO.PNG").as_deref(), Some("png"));
        assert_eq!(extension_of("/Makefile"), None);
    }

    #[test]
    fn strips_only_numeric_segments() {
        assert_eq!(strip_timestamp("/foo.1243892792"), ("/foo", Some(1243892792)));
        assert_eq!(strip_timestamp("/jquery.min"), ("/jquery.min", None));
        assert_eq!(strip_timestamp("/.123"), ("/.123", None));
    }

    #[test]
    fn combines_into_common_directory() {
        let names = [
            "/somewhere/else/foo.js",
            "/somewhere/bar.js",
            "/somewhere/different/too/foobar.js",
        ];
        assert_eq!(
            combine_filenames(&names, 40).unwrap(),
            "/somewhere/foo_bar_foobar.js"
        );
    }

    #[test]
    fn keeps_newest_embedded_timestamp() {
        let names = ["/foo.1243892792.js", "/bar.1243893111.js", "/foobar.js"];
        assert_eq!(
            combine_filenames(&names, 40).unwrap(),
            "/foo_bar_foobar.1243893111.js"
        );
    }

    #[test]
    fn combined_name_drops_embedded_timestamps() {
        let names = ["/foo.1243892792.js", "/bar.1243893111.js", "/foobar.js"];
        assert_eq!(combined_name(&names, 40).unwrap(), "/foo_bar_foobar.js");
    }

    #[test]
    fn truncates_joined_name_mid_component() {
        let names: Vec<String> = (0..10).map(|x| format!("/jquery_something_{x}.js")).collect();
        let combined = combine_filenames(&names, 40).unwrap();
        assert_eq!(combined, "/jquery_something_0_jquery_something_1_jq.js");
    }

    #[test]
    fn relative_members_stay_relative() {
        assert_eq!(combine_filenames(&["a.css", "b.css"], 40).unwrap(), "a_b.css");
        assert_eq!(
            combine_filenames(&["css/a.css", "css/b.css"], 40).unwrap(),
            "css/a_b.css"
        );
    }

    #[test]
    fn rejects_mixed_extensions() {
        let err = combine_filenames(&["/a.js", "/b.css"], 40).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ExtensionMismatch { ref first, ref other }
                if first == "/a.js" && other == "/b.css"
        ));
    }
}
