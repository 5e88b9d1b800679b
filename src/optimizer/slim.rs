//! Built-in minifier.
//!
//! Only transformations that cannot change meaning are applied: comments and redundant
//! whitespace go away in stylesheets, blank lines and indentation in scripts. String
//! literals are copied verbatim.

use crate::error::Result;
use crate::models::ContentKind;

use super::Optimizer;

/// Conservative whitespace and comment stripper.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlimOptimizer;

impl Optimizer for SlimOptimizer {
    fn supports(&self, _kind: ContentKind) -> bool {
        true
    }

    fn optimize(&self, kind: ContentKind, content: &str) -> Result<String> {
        Ok(match kind {
            ContentKind::Stylesheet => slim_stylesheet(content),
            ContentKind::Script => slim_script(content),
        })
    }
}

/// Characters around which whitespace carries no meaning in CSS.
fn is_css_separator(c: char) -> bool {
    matches!(c, '{' | '}' | ';' | ',' | '>')
}

fn slim_stylesheet(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut chars = css.chars().peekable();
    let mut pending_space = false;

    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = '\0';
                for inner in chars.by_ref() {
                    if previous == '*' && inner == '/' {
                        break;
                    }
                    previous = inner;
                }
                pending_space = true;
            }
            '"' | '\'' => {
                flush_space(&mut out, &mut pending_space, c);
                out.push(c);
                let mut escaped = false;
                for inner in chars.by_ref() {
                    out.push(inner);
                    if escaped {
                        escaped = false;
                    } else if inner == '\\' {
                        escaped = true;
                    } else if inner == c {
                        break;
                    }
                }
            }
            c if c.is_whitespace() => pending_space = true,
            c => {
                if is_css_separator(c) {
                    pending_space = false;
                    if c == '}' && out.ends_with(';') {
                        out.pop();
                    }
                }
                flush_space(&mut out, &mut pending_space, c);
                out.push(c);
                if is_css_separator(c) || c == ':' {
                    skip_whitespace(&mut chars);
                }
            }
        }
    }

    out.trim().to_string()
}

fn flush_space(out: &mut String, pending_space: &mut bool, next: char) {
    if *pending_space {
        let after_separator = out
            .chars()
            .last()
            .is_none_or(|last| is_css_separator(last) || last == ':');
        if !after_separator && !is_css_separator(next) {
            out.push(' ');
        }
        *pending_space = false;
    }
}

fn skip_whitespace(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

fn slim_script(js: &str) -> String {
    let lines: Vec<&str> = js
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    lines.join("\n")
}
