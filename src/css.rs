//! References nested inside stylesheets.
//!
//! `url(...)` values and quoted `@import` targets are found with a regex; the pipeline
//! decides what each one is rewritten to. [`ReferenceTrail`] keeps the recursion through
//! imported stylesheets finite.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use crate::asset_paths::should_ignore_asset_reference;
use crate::error::{PipelineError, Result};
use crate::models::CacheKey;

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)url\(\s*(?P<url>[^)]*?)\s*\)|@import\s+(?P<import>"[^"]*"|'[^']*')"#)
            .expect("invalid stylesheet reference regex")
    })
}

/// One reference inside a stylesheet, quotes excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StylesheetReference<'a> {
    /// Reference text.
    pub value: &'a str,
    /// Byte range of `value` in the stylesheet.
    pub span: Range<usize>,
}

/// Every `url(...)` and quoted `@import` reference in `css`, in document order.
pub fn find_references(css: &str) -> Vec<StylesheetReference<'_>> {
    reference_pattern()
        .captures_iter(css)
        .filter_map(|captures| captures.name("url").or_else(|| captures.name("import")))
        .map(|found| {
            let span = unquoted(found.as_str(), found.range());
            StylesheetReference {
                value: &css[span.clone()],
                span,
            }
        })
        .collect()
}

fn unquoted(text: &str, range: Range<usize>) -> Range<usize> {
    let quoted = text.len() >= 2
        && (text.starts_with('"') || text.starts_with('\''))
        && text.ends_with(&text[..1]);
    if quoted {
        range.start + 1..range.end - 1
    } else {
        range
    }
}

/// Replace every local reference in `css` with what `replace` returns for it.
///
/// External URLs and data URIs are left alone, as are the surrounding quotes.
pub fn rewrite_references<F>(css: &str, mut replace: F) -> Result<String>
where
    F: FnMut(&str) -> Result<String>,
{
    let mut rewritten = String::with_capacity(css.len());
    let mut copied_to = 0;

    for reference in find_references(css) {
        if should_ignore_asset_reference(reference.value) {
            continue;
        }
        let replacement = replace(reference.value)?;
        rewritten.push_str(&css[copied_to..reference.span.start]);
        rewritten.push_str(&replacement);
        copied_to = reference.span.end;
    }

    rewritten.push_str(&css[copied_to..]);
    Ok(rewritten)
}

/// Stack of cache keys being processed through nested stylesheet references.
#[derive(Debug, Clone)]
pub struct ReferenceTrail {
    stack: Vec<CacheKey>,
    max_depth: usize,
}

impl ReferenceTrail {
    /// Empty trail allowing `max_depth` levels of nesting.
    pub fn new(max_depth: usize) -> Self {
        Self {
            stack: Vec::new(),
            max_depth,
        }
    }

    /// Number of keys currently being processed.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Start processing `key`.
    ///
    /// Fails with [`PipelineError::CyclicReference`] when `key` is already on the trail and
    /// with [`PipelineError::NestingTooDeep`] when the nesting limit is reached.
    pub fn enter(&mut self, key: &CacheKey) -> Result<()> {
        if self.stack.contains(key) {
            return Err(PipelineError::CyclicReference {
                reference: key.to_string(),
                trail: self.describe(),
            });
        }
        if self.stack.len() > self.max_depth {
            return Err(PipelineError::NestingTooDeep {
                reference: key.to_string(),
                limit: self.max_depth,
                trail: self.describe(),
            });
        }
        self.stack.push(key.clone());
        Ok(())
    }

    /// Finish processing the innermost key.
    pub fn leave(&mut self) {
        self.stack.pop();
    }

    fn describe(&self) -> String {
        self.stack
            .iter()
            .map(CacheKey::as_str)
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOOBAR: &str = r#"
@import "two.css";
@import 'print.css';
.foo { background: url(one.gif); }
.bar { background: url( "/four.gif" ); }
.baz { background: url(data:image/png;base64,iVBORw0KGgo=); }
"#;

    #[test]
    fn finds_imports_and_urls() {
        let values: Vec<_> = find_references(FOOBAR)
            .into_iter()
            .map(|reference| reference.value)
            .collect();
        assert_eq!(
            values,
            [
                "two.css",
                "print.css",
                "one.gif",
                "/four.gif",
                "data:image/png;base64,iVBORw0KGgo="
            ]
        );
    }

    #[test]
    fn rewrites_inside_quotes_and_skips_data_uris() {
        let rewritten = rewrite_references(FOOBAR, |value| {
            Ok(format!("/css/{value}").replace("//", "/"))
        })
        .unwrap();

        assert!(rewritten.contains(r#"@import "/css/two.css";"#));
        assert!(rewritten.contains("@import '/css/print.css';"));
        assert!(rewritten.contains("url(/css/one.gif)"));
        assert!(rewritten.contains(r#"url( "/css/four.gif" )"#));
        assert!(rewritten.contains("url(data:image/png;base64,iVBORw0KGgo=)"));
    }

    #[test]
    fn replacement_errors_propagate() {
        let err = rewrite_references("a { background: url(x.gif) }", |value| {
            Err(PipelineError::UnknownContentKind {
                reference: value.to_string(),
            })
        })
        .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownContentKind { .. }));
    }

    #[test]
    fn trail_detects_cycles() {
        let one = CacheKey::from_references(&["/css/one.css"]);
        let two = CacheKey::from_references(&["/css/two.css"]);
        let mut trail = ReferenceTrail::new(16);

        trail.enter(&one).unwrap();
        trail.enter(&two).unwrap();
        let err = trail.enter(&one).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::CyclicReference { ref trail, .. }
                if trail == "/css/one.css -> /css/two.css"
        ));

        trail.leave();
        trail.leave();
        assert_eq!(trail.depth(), 0);
        trail.enter(&one).unwrap();
    }

    #[test]
    fn trail_limits_depth() {
        let mut trail = ReferenceTrail::new(1);
        trail
            .enter(&CacheKey::from_references(&["/a.css"]))
            .unwrap();
        trail
            .enter(&CacheKey::from_references(&["/b.css"]))
            .unwrap();
        let err = trail
            .enter(&CacheKey::from_references(&["/c.css"]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::NestingTooDeep { limit: 1, .. }));
    }
}
