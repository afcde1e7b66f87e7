//! Truncation-tolerant tag scanning.
//!
//! Report files are observed while an external tool is still writing them,
//! so the tail of the input is routinely an unterminated tag, comment or
//! CDATA section. The scanner yields only constructs that are complete in
//! the current snapshot and silently stops at the first incomplete one; a
//! later snapshot re-scans from the start and gets further.
//!
//! This is not a general XML parser. It understands exactly what build-tool
//! reports need: tags with quoted attributes, comments, processing
//! instructions, CDATA and the five predefined entities.

use std::ops::Range;

/// A complete tag found in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedTag<'a> {
    pub name: &'a str,
    pub kind: TagKind,
    /// Raw attribute text between the name and the closing `>`.
    attrs: &'a str,
    /// Byte range of the whole construct, `<` through `>` inclusive.
    pub range: Range<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Open,
    Close,
    SelfClose,
}

impl<'a> ScannedTag<'a> {
    /// Look up an attribute value, entity-unescaped.
    pub fn attr(&self, name: &str) -> Option<String> {
        let mut rest = self.attrs;
        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                return None;
            }
            let key_end = rest
                .find(|c: char| c == '=' || c.is_whitespace())
                .unwrap_or(rest.len());
            let key = &rest[..key_end];
            rest = rest[key_end..].trim_start();
            if !rest.starts_with('=') {
                // Valueless attribute, keep scanning.
                continue;
            }
            rest = rest[1..].trim_start();
            let quote = match rest.chars().next() {
                Some(q @ ('"' | '\'')) => q,
                _ => return None,
            };
            let value_end = match rest[1..].find(quote) {
                Some(end) => end + 1,
                None => return None,
            };
            let value = &rest[1..value_end];
            if key == name {
                return Some(unescape(value));
            }
            rest = &rest[value_end + 1..];
        }
    }
}

/// Linear scanner over one snapshot of a report file.
pub struct TagScanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> TagScanner<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Next complete tag, or `None` once the rest of the input holds no
    /// further complete construct.
    pub fn next_tag(&mut self) -> Option<ScannedTag<'a>> {
        loop {
            let lt = self.input[self.pos..].find('<')? + self.pos;
            let rest = &self.input[lt..];

            if let Some(skip_to) = skip_non_tag(rest) {
                match skip_to {
                    Some(len) => {
                        self.pos = lt + len;
                        continue;
                    }
                    // Unterminated comment/CDATA/PI: the snapshot ends here.
                    None => return None,
                }
            }

            let gt = match find_tag_end(rest) {
                Some(offset) => offset,
                None => return None,
            };
            let body = &rest[1..gt];
            let range = lt..lt + gt + 1;
            self.pos = range.end;

            if let Some(stripped) = body.strip_prefix('/') {
                let name = stripped.trim();
                if name.is_empty() {
                    continue;
                }
                return Some(ScannedTag {
                    name,
                    kind: TagKind::Close,
                    attrs: "",
                    range,
                });
            }

            let (body, kind) = match body.strip_suffix('/') {
                Some(stripped) => (stripped, TagKind::SelfClose),
                None => (body, TagKind::Open),
            };
            let name_end = body
                .find(|c: char| c.is_whitespace())
                .unwrap_or(body.len());
            let name = &body[..name_end];
            if name.is_empty() {
                continue;
            }
            return Some(ScannedTag {
                name,
                kind,
                attrs: &body[name_end..],
                range,
            });
        }
    }
}

/// For input starting at `<`: `Some(Some(len))` to skip a non-tag construct
/// of `len` bytes, `Some(None)` if the construct is unterminated, `None` if
/// this is an ordinary tag.
fn skip_non_tag(rest: &str) -> Option<Option<usize>> {
    for (prefix, terminator) in [
        ("<!--", "-->"),
        ("<![CDATA[", "]]>"),
        ("<?", "?>"),
        ("<!", ">"),
    ] {
        if rest.starts_with(prefix) {
            return Some(
                rest[prefix.len()..]
                    .find(terminator)
                    .map(|at| prefix.len() + at + terminator.len()),
            );
        }
    }
    None
}

/// Offset of the `>` closing an ordinary tag, honoring quoted attributes.
fn find_tag_end(rest: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (idx, ch) in rest.char_indices().skip(1) {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '>') => return Some(idx),
            (None, _) => {}
        }
    }
    None
}

/// Decode the five predefined entities plus numeric character references.
pub fn unescape(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let semi = match rest.find(';') {
            Some(s) if s <= 12 => s,
            _ => {
                out.push('&');
                rest = &rest[1..];
                continue;
            }
        };
        let entity = &rest[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Extract the human-readable text of an element body: CDATA sections
/// verbatim, markup dropped, entities decoded, surrounding whitespace
/// trimmed.
pub fn text_content(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(lt) = rest.find('<') {
        out.push_str(&unescape(&rest[..lt]));
        let tail = &rest[lt..];
        if let Some(skip) = skip_non_tag(tail) {
            match skip {
                Some(len) => {
                    if let Some(cdata) = tail[..len].strip_prefix("<![CDATA[") {
                        out.push_str(cdata.trim_end_matches("]]>"));
                    }
                    rest = &tail[len..];
                }
                None => {
                    // Unterminated construct; salvage CDATA text seen so far.
                    if let Some(cdata) = tail.strip_prefix("<![CDATA[") {
                        out.push_str(cdata);
                    }
                    rest = "";
                    break;
                }
            }
        } else {
            match find_tag_end(tail) {
                Some(gt) => rest = &tail[gt + 1..],
                None => {
                    rest = "";
                    break;
                }
            }
        }
    }
    out.push_str(&unescape(rest));
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(input: &str) -> Vec<(String, TagKind)> {
        let mut scanner = TagScanner::new(input);
        let mut tags = Vec::new();
        while let Some(tag) = scanner.next_tag() {
            tags.push((tag.name.to_string(), tag.kind));
        }
        tags
    }

    #[test]
    fn scans_open_close_selfclose() {
        let tags = collect(r#"<a x="1"><b/></a>"#);
        assert_eq!(
            tags,
            vec![
                ("a".to_string(), TagKind::Open),
                ("b".to_string(), TagKind::SelfClose),
                ("a".to_string(), TagKind::Close),
            ]
        );
    }

    #[test]
    fn stops_at_truncated_tag() {
        assert_eq!(collect(r#"<a><b name="unter"#), vec![("a".to_string(), TagKind::Open)]);
    }

    #[test]
    fn stops_at_truncated_comment() {
        assert_eq!(collect("<a><!-- half"), vec![("a".to_string(), TagKind::Open)]);
    }

    #[test]
    fn skips_prolog_comments_and_cdata() {
        let input = r#"<?xml version="1.0"?><!-- hi --><a><![CDATA[<not-a-tag>]]></a>"#;
        let tags = collect(input);
        assert_eq!(
            tags,
            vec![("a".to_string(), TagKind::Open), ("a".to_string(), TagKind::Close)]
        );
    }

    #[test]
    fn angle_bracket_inside_quoted_attr() {
        let mut scanner = TagScanner::new(r#"<case name="a>b" time="1"/>"#);
        let tag = scanner.next_tag().unwrap();
        assert_eq!(tag.kind, TagKind::SelfClose);
        assert_eq!(tag.attr("name").as_deref(), Some("a>b"));
        assert_eq!(tag.attr("time").as_deref(), Some("1"));
    }

    #[test]
    fn attr_unescapes_entities() {
        let mut scanner = TagScanner::new(r#"<m text="1 &lt; 2 &amp; 3 &#x41;"/>"#);
        let tag = scanner.next_tag().unwrap();
        assert_eq!(tag.attr("text").as_deref(), Some("1 < 2 & 3 A"));
        assert_eq!(tag.attr("missing"), None);
    }

    #[test]
    fn text_content_handles_cdata_and_markup() {
        assert_eq!(
            text_content(" expected &lt;5&gt; <![CDATA[got >9]]> "),
            "expected <5> got >9"
        );
        assert_eq!(text_content("<inner>kept</inner>"), "kept");
    }
}
