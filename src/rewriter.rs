//! Rewriting asset references inside blocks of HTML.
//!
//! Script tags are collapsed into one, stylesheet links into one per `media` value, images
//! are fingerprinted one by one. Only the reference attribute of a kept tag changes; every
//! other attribute and all surrounding markup is preserved.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use crate::asset_paths::should_ignore_asset_reference;
use crate::error::Result;
use crate::models::ProcessOptions;
use crate::pipeline::Pipeline;

fn script_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)<script\b[^>]*>\s*</script\s*>").expect("invalid script tag regex")
    })
}

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?is)<link\b[^>]*>").expect("invalid link tag regex"))
}

fn img_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?is)<img\b[^>]*>").expect("invalid img tag regex"))
}

fn attribute_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?s)([A-Za-z][A-Za-z0-9_:-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("invalid attribute regex")
    })
}

#[derive(Debug)]
struct Attribute {
    name: String,
    value: Range<usize>,
}

#[derive(Debug)]
struct Tag {
    span: Range<usize>,
    attributes: Vec<Attribute>,
}

impl Tag {
    fn attribute<'m>(&self, markup: &'m str, name: &str) -> Option<(&'m str, Range<usize>)> {
        self.attributes
            .iter()
            .find(|attribute| attribute.name == name)
            .map(|attribute| (&markup[attribute.value.clone()], attribute.value.clone()))
    }
}

fn find_tags(markup: &str, pattern: &Regex) -> Vec<Tag> {
    pattern
        .find_iter(markup)
        .map(|found| {
            let opening_end = markup[found.range()]
                .find('>')
                .map_or(found.end(), |index| found.start() + index);
            let opening = &markup[found.start()..opening_end];

            let attributes = attribute_pattern()
                .captures_iter(opening)
                .filter_map(|captures| {
                    let name = captures.get(1)?;
                    let value = captures.get(2).or_else(|| captures.get(3))?;
                    Some(Attribute {
                        name: name.as_str().to_ascii_lowercase(),
                        value: found.start() + value.start()..found.start() + value.end(),
                    })
                })
                .collect();

            Tag {
                span: found.range(),
                attributes,
            }
        })
        .collect()
}

/// A tag whose reference attribute points at a local file.
struct Candidate<'m> {
    reference: &'m str,
    value: Range<usize>,
    span: Range<usize>,
}

fn candidates<'m>(markup: &'m str, tags: &[Tag], attribute: &str) -> Vec<Candidate<'m>> {
    tags.iter()
        .filter_map(|tag| {
            let (reference, value) = tag.attribute(markup, attribute)?;
            (!should_ignore_asset_reference(reference)).then(|| Candidate {
                reference,
                value,
                span: tag.span.clone(),
            })
        })
        .collect()
}

struct Edit {
    range: Range<usize>,
    replacement: String,
}

/// Rewrites references in markup through a [`Pipeline`].
#[derive(Debug, Clone, Copy)]
pub struct ReferenceRewriter<'p> {
    pipeline: &'p Pipeline,
}

impl<'p> ReferenceRewriter<'p> {
    /// Rewriter backed by `pipeline`.
    pub fn new(pipeline: &'p Pipeline) -> Self {
        Self { pipeline }
    }

    /// Rewrite a single reference or a `;`-separated list of them.
    pub fn rewrite_reference(&self, reference: &str, options: ProcessOptions) -> Result<String> {
        let references: Vec<&str> = reference
            .split(';')
            .map(str::trim)
            .filter(|reference| !reference.is_empty())
            .collect();
        self.pipeline.process(&references, options)
    }

    /// Rewrite every script, stylesheet and image reference in `markup`.
    pub fn rewrite_block(&self, markup: &str, options: ProcessOptions) -> Result<String> {
        let combine = options.combine && self.pipeline.is_enabled();
        let mut edits = Vec::new();

        let scripts = find_tags(markup, script_pattern());
        let scripts = candidates(markup, &scripts, "src");
        self.rewrite_group(markup, &scripts, options, combine, &mut edits)?;

        for group in stylesheet_groups(markup) {
            self.rewrite_group(markup, &group, options, combine, &mut edits)?;
        }

        let images = find_tags(markup, img_pattern());
        let image_options = ProcessOptions {
            combine: false,
            optimize: false,
            ..options
        };
        for image in candidates(markup, &images, "src") {
            self.rewrite_group(markup, &[image], image_options, false, &mut edits)?;
        }

        Ok(apply(markup, edits))
    }

    fn rewrite_group(
        &self,
        markup: &str,
        group: &[Candidate<'_>],
        options: ProcessOptions,
        combine: bool,
        edits: &mut Vec<Edit>,
    ) -> Result<()> {
        if combine && group.len() > 1 {
            let references: Vec<&str> = group.iter().map(|candidate| candidate.reference).collect();
            // Warnings for missing members come from the one-by-one fallback below.
            let quiet = ProcessOptions {
                warn_if_missing: false,
                ..options
            };
            let outcome = self.pipeline.process_outcome(&references, quiet)?;
            if !outcome.event.not_found {
                edits.push(Edit {
                    range: group[0].value.clone(),
                    replacement: outcome.reference,
                });
                for candidate in &group[1..] {
                    edits.push(Edit {
                        range: removal_span(markup, candidate.span.clone()),
                        replacement: String::new(),
                    });
                }
                return Ok(());
            }
        }

        let single = ProcessOptions {
            combine: false,
            ..options
        };
        for candidate in group {
            let rewritten = self.pipeline.process(&[candidate.reference], single)?;
            if rewritten != candidate.reference {
                edits.push(Edit {
                    range: candidate.value.clone(),
                    replacement: rewritten,
                });
            }
        }
        Ok(())
    }
}

/// Stylesheet links grouped by `media`, groups in order of first appearance.
///
/// A link without `media` belongs to the `""` group.
fn stylesheet_groups(markup: &str) -> Vec<Vec<Candidate<'_>>> {
    let mut groups: Vec<(&str, Vec<Candidate<'_>>)> = Vec::new();

    for tag in find_tags(markup, link_pattern()) {
        let is_stylesheet = tag.attribute(markup, "rel").is_some_and(|(rel, _)| {
            rel.split_ascii_whitespace()
                .any(|token| token.eq_ignore_ascii_case("stylesheet"))
        });
        if !is_stylesheet {
            continue;
        }
        let Some((reference, value)) = tag.attribute(markup, "href") else {
            continue;
        };
        if should_ignore_asset_reference(reference) {
            continue;
        }

        let media = tag
            .attribute(markup, "media")
            .map_or("", |(media, _)| media.trim());
        let candidate = Candidate {
            reference,
            value,
            span: tag.span.clone(),
        };
        match groups.iter_mut().find(|(existing, _)| *existing == media) {
            Some((_, members)) => members.push(candidate),
            None => groups.push((media, vec![candidate])),
        }
    }

    groups.into_iter().map(|(_, members)| members).collect()
}

/// Span covering a tag to delete, plus its line when the tag stands alone on it.
fn removal_span(markup: &str, span: Range<usize>) -> Range<usize> {
    let bytes = markup.as_bytes();
    let is_blank = |byte: &u8| matches!(byte, b' ' | b'\t');

    let mut start = span.start;
    while start > 0 && is_blank(&bytes[start - 1]) {
        start -= 1;
    }
    let mut end = span.end;
    while end < bytes.len() && is_blank(&bytes[end]) {
        end += 1;
    }

    let starts_line = start == 0 || bytes[start - 1] == b'\n';
    let ends_line = end == bytes.len() || matches!(bytes[end], b'\r' | b'\n');
    if !(starts_line && ends_line) {
        return span;
    }

    if bytes.get(end) == Some(&b'\r') {
        end += 1;
    }
    if bytes.get(end) == Some(&b'\n') {
        end += 1;
    }
    start..end
}

fn apply(markup: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|edit| edit.range.start);

    let mut rewritten = String::with_capacity(markup.len());
    let mut copied_to = 0;
    for edit in edits {
        if edit.range.start < copied_to {
            continue;
        }
        rewritten.push_str(&markup[copied_to..edit.range.start]);
        rewritten.push_str(&edit.replacement);
        copied_to = edit.range.end;
    }
    rewritten.push_str(&markup[copied_to..]);
    rewritten
}
