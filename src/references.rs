//! Locating attachment references inside note text.
//!
//! Two patterns are scanned side by side: image embeds (`![alt](target)`) and
//! plain links (`[text](target)`). Either may be followed directly by an HTML
//! comment holding JSON metadata, e.g. `[Doc](doc.pdf)<!-- {"embed": false} -->`,
//! which becomes part of the matched span.
//!
//! When an image candidate and a link candidate overlap, the image wins. When
//! they do not overlap, the one that starts first is yielded first.

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::ops::Range;
use std::sync::LazyLock;
use url::Url;

static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[([^\]\n]*)\]\(([^)\n]*)\)(?:<!--\s*(.*?)\s*-->)?").unwrap()
});

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]\n]*)\]\(([^)\n]*)\)(?:<!--\s*(.*?)\s*-->)?").unwrap()
});

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^(.*?)\s+(?:"([^"]*)"|'([^']*)')$"#).unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Points at a file on disk (relative to the note).
    Local,
    /// A URL or in-document anchor. Never converted.
    External,
}

/// One attachment mention inside a note.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentReference {
    /// The full matched text, metadata comment included.
    pub raw: String,
    /// Byte span of `raw` in the note text.
    pub span: Range<usize>,
    pub alt_text: String,
    /// Everything between the parentheses, verbatim.
    pub target: String,
    pub is_image: bool,
    pub metadata: Map<String, Value>,
    pub kind: ReferenceKind,
}

impl AttachmentReference {
    /// The link destination with any trailing `"title"` and `<...>` wrapping removed.
    /// Percent-encoding is left intact.
    pub fn destination(&self) -> &str {
        split_title(&self.target).0
    }

    pub fn title(&self) -> Option<&str> {
        split_title(&self.target).1
    }

    /// References are inlined unless their metadata says `"embed": false`.
    pub fn embed(&self) -> bool {
        self.metadata
            .get("embed")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    pub fn is_external(&self) -> bool {
        self.kind == ReferenceKind::External
    }
}

fn split_title(target: &str) -> (&str, Option<&str>) {
    let trimmed = target.trim();
    let (dest, title) = match TITLE_RE.captures(trimmed) {
        Some(caps) => {
            let dest = caps.get(1).map_or("", |m| m.as_str());
            let title = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
            (dest, title)
        }
        None => (trimmed, None),
    };
    let dest = dest
        .strip_prefix('<')
        .and_then(|d| d.strip_suffix('>'))
        .unwrap_or(dest);
    (dest, title)
}

/// Schemes that are URLs even without `//` after the colon.
const OPAQUE_SCHEMES: &[&str] = &[
    "http", "https", "ftp", "ftps", "mailto", "tel", "sms", "file", "data", "bear",
    "obsidian", "things", "message", "x-devonthink-item",
];

/// Classify a link destination. URLs (`scheme://…` or a well-known scheme such
/// as `mailto:`) and bare `#anchor` links are external. A file name that merely
/// contains a colon, like `Re:%20Budget.pdf`, stays local.
pub fn classify(destination: &str) -> ReferenceKind {
    if destination.is_empty() || destination.starts_with('#') || destination.starts_with("//") {
        return ReferenceKind::External;
    }
    match Url::parse(destination) {
        // A single-letter scheme is a Windows drive letter, not a URL.
        Ok(url)
            if url.scheme().len() > 1
                && (destination
                    .get(url.scheme().len()..)
                    .is_some_and(|rest| rest.starts_with("://"))
                    || OPAQUE_SCHEMES.contains(&url.scheme())) =>
        {
            ReferenceKind::External
        }
        _ => ReferenceKind::Local,
    }
}

struct Candidate {
    span: Range<usize>,
    alt: Range<usize>,
    target: Range<usize>,
    comment: Option<Range<usize>>,
    is_image: bool,
}

impl Candidate {
    fn from_captures(caps: &Captures<'_>, is_image: bool) -> Option<Self> {
        Some(Self {
            span: caps.get(0)?.range(),
            alt: caps.get(1)?.range(),
            target: caps.get(2)?.range(),
            comment: caps.get(3).map(|m| m.range()),
            is_image,
        })
    }

    fn overlaps(&self, other: &Candidate) -> bool {
        self.span.start < other.span.end && other.span.start < self.span.end
    }
}

struct Lane {
    re: &'static Regex,
    is_image: bool,
    next: Option<Candidate>,
    done: bool,
}

impl Lane {
    fn new(re: &'static Regex, is_image: bool) -> Self {
        Self {
            re,
            is_image,
            next: None,
            done: false,
        }
    }

    fn peek(&mut self, text: &str, cursor: usize) -> Option<&Candidate> {
        if self.next.as_ref().is_some_and(|c| c.span.start < cursor) {
            self.next = None;
        }
        if self.next.is_none() && !self.done {
            match self
                .re
                .captures_at(text, cursor)
                .and_then(|caps| Candidate::from_captures(&caps, self.is_image))
            {
                Some(c) => self.next = Some(c),
                None => self.done = true,
            }
        }
        self.next.as_ref()
    }

    fn take(&mut self) -> Option<Candidate> {
        self.next.take()
    }
}

/// Lazy scan over a note's references, in text order, with non-overlapping spans.
pub struct References<'t> {
    text: &'t str,
    cursor: usize,
    images: Lane,
    links: Lane,
}

/// Scan `text` for references. Calling this again on the same text yields the
/// same sequence.
pub fn find_references(text: &str) -> References<'_> {
    References {
        text,
        cursor: 0,
        images: Lane::new(&IMAGE_RE, true),
        links: Lane::new(&LINK_RE, false),
    }
}

impl Iterator for References<'_> {
    type Item = AttachmentReference;

    fn next(&mut self) -> Option<Self::Item> {
        let image = self.images.peek(self.text, self.cursor).is_some();
        let link = self.links.peek(self.text, self.cursor).is_some();

        let chosen = match (image, link) {
            (false, false) => return None,
            (true, false) => self.images.take(),
            (false, true) => self.links.take(),
            (true, true) => {
                let (img, lnk) = (self.images.next.as_ref()?, self.links.next.as_ref()?);
                if img.overlaps(lnk) || img.span.start <= lnk.span.start {
                    self.images.take()
                } else {
                    self.links.take()
                }
            }
        }?;

        self.cursor = chosen.span.end;
        Some(build_reference(self.text, chosen))
    }
}

fn build_reference(text: &str, c: Candidate) -> AttachmentReference {
    let target = text[c.target.clone()].to_string();
    let metadata = c
        .comment
        .map(|r| parse_metadata(&text[r], &target))
        .unwrap_or_default();
    let kind = classify(split_title(&target).0);
    AttachmentReference {
        raw: text[c.span.clone()].to_string(),
        span: c.span,
        alt_text: text[c.alt].to_string(),
        target,
        is_image: c.is_image,
        metadata,
        kind,
    }
}

fn parse_metadata(comment: &str, target: &str) -> Map<String, Value> {
    match serde_json::from_str::<Map<String, Value>>(comment) {
        Ok(map) => map,
        Err(_) => {
            tracing::warn!("Invalid metadata for reference: {}", target);
            Map::new()
        }
    }
}

/// Replace each span with its text. Spans must be sorted and non-overlapping;
/// replacement runs from the last span backwards so earlier offsets stay valid.
pub fn splice(text: &str, replacements: &[(Range<usize>, String)]) -> String {
    debug_assert!(
        replacements
            .windows(2)
            .all(|w| w[0].0.end <= w[1].0.start),
        "spans must be sorted and disjoint"
    );
    let mut out = text.to_string();
    for (span, replacement) in replacements.iter().rev() {
        out.replace_range(span.clone(), replacement);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn refs(text: &str) -> Vec<AttachmentReference> {
        find_references(text).collect()
    }

    #[test]
    fn finds_images_and_links_in_order() {
        let text = "Here: ![Image](test/image.jpg)\nAnd [Document](test/doc.pdf)\n![](test/image2.png)";
        let found = refs(text);
        assert_eq!(found.len(), 3);

        assert_eq!(found[0].raw, "![Image](test/image.jpg)");
        assert_eq!(found[0].alt_text, "Image");
        assert!(found[0].is_image);

        assert_eq!(found[1].raw, "[Document](test/doc.pdf)");
        assert!(!found[1].is_image);

        assert_eq!(found[2].alt_text, "");
        assert_eq!(found[2].destination(), "test/image2.png");

        for r in &found {
            assert_eq!(&text[r.span.clone()], r.raw);
        }
    }

    #[test]
    fn metadata_comment_is_part_of_span() {
        let text = r#"A [Doc](test.pdf)<!-- {"embed": false} --> and ![Alt](img.jpg)<!-- {"width": 100} -->"#;
        let found = refs(text);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].raw, r#"[Doc](test.pdf)<!-- {"embed": false} -->"#);
        assert!(!found[0].embed());
        assert!(found[1].embed());
        assert_eq!(found[1].metadata.get("width"), Some(&Value::from(100)));
    }

    #[test]
    fn invalid_metadata_is_ignored() {
        let found = refs("[Doc](test.pdf)<!-- {not json} -->");
        assert_eq!(found.len(), 1);
        assert!(found[0].metadata.is_empty());
        assert!(found[0].embed());
        assert_eq!(found[0].raw, "[Doc](test.pdf)<!-- {not json} -->");
    }

    #[test]
    fn image_beats_overlapping_link() {
        let text = "[![img](a.png)](b.pdf)";
        let found = refs(text);
        assert_eq!(found.len(), 1);
        assert!(found[0].is_image);
        assert_eq!(found[0].destination(), "a.png");
        assert_eq!(found[0].span, 1..14);
    }

    #[test]
    fn title_and_whitespace_are_kept_in_target() {
        let found = refs(r#"![chart](notes/chart.png "external")"#);
        assert_eq!(found[0].target, r#"notes/chart.png "external""#);
        assert_eq!(found[0].destination(), "notes/chart.png");
        assert_eq!(found[0].title(), Some("external"));

        let found = refs("[x](<my file.pdf>)");
        assert_eq!(found[0].destination(), "my file.pdf");
    }

    #[rstest]
    #[case("https://example.com/logo.png", ReferenceKind::External)]
    #[case("http://example.com", ReferenceKind::External)]
    #[case("mailto:someone@example.com", ReferenceKind::External)]
    #[case("#heading", ReferenceKind::External)]
    #[case("trip/map.svg", ReferenceKind::Local)]
    #[case("trip%20notes/map%201.svg", ReferenceKind::Local)]
    #[case("C:/notes/a.png", ReferenceKind::Local)]
    #[case("Re:%20Budget.pdf", ReferenceKind::Local)]
    #[case("bear://x-callback-url/open-note?id=1", ReferenceKind::External)]
    #[case("custom-app://open", ReferenceKind::External)]
    #[case("data:image/png;base64,AAAA", ReferenceKind::External)]
    fn classification(#[case] destination: &str, #[case] expected: ReferenceKind) {
        assert_eq!(classify(destination), expected);
    }

    #[test]
    fn rescanning_yields_same_sequence() {
        let text = "![a](x.png) text [b](y.pdf) ![c](https://e.com/z.png)";
        assert_eq!(refs(text), refs(text));
    }

    #[test]
    fn identity_splice_round_trips() {
        let text = "# T\n\n![a](a%20b.png) mid [d](doc.pdf)<!-- {\"k\":1} --> end\n";
        let replacements: Vec<_> = find_references(text)
            .map(|r| (r.span.clone(), r.raw.clone()))
            .collect();
        assert_eq!(replacements.len(), 2);
        assert_eq!(splice(text, &replacements), text);
    }

    #[test]
    fn splice_preserves_text_outside_spans() {
        let text = "a ![x](1.png) b [y](2.pdf) c";
        let replacements: Vec<_> = find_references(text)
            .map(|r| (r.span.clone(), format!("<{}>", r.alt_text)))
            .collect();
        assert_eq!(splice(text, &replacements), "a <x> b <y> c");
    }
}
