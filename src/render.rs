use crate::note::{Attachment, AttachmentKind};
use crate::utils::{format_modified, format_size};
use std::fmt::Write;
use std::time::SystemTime;

const BEGIN: &str = "<!-- BEGIN EMBEDDED CONTENT -->";
const END: &str = "<!-- END EMBEDDED CONTENT -->";

/// Details of a conversion that produced no content.
#[derive(Debug, Clone)]
pub struct Failure<'a> {
    pub file_name: &'a str,
    pub kind: Option<AttachmentKind>,
    pub extension: &'a str,
    pub size: Option<u64>,
    pub modified: Option<SystemTime>,
    pub error_type: &'a str,
    pub primary_error: &'a str,
    pub fallback_error: Option<&'a str>,
}

impl<'a> Failure<'a> {
    pub fn for_attachment(
        attachment: &'a Attachment,
        file_name: &'a str,
        extension: &'a str,
        error_type: &'a str,
        primary_error: &'a str,
    ) -> Self {
        Self {
            file_name,
            kind: Some(attachment.kind),
            extension,
            size: Some(attachment.size),
            modified: attachment.modified,
            error_type,
            primary_error,
            fallback_error: None,
        }
    }
}

/// The original reference followed by a collapsible block holding the converted content.
pub fn embedded(reference: &str, attachment: &Attachment, dimensions: Option<(u32, u32)>, body: &str) -> String {
    let dims = dimensions
        .map(|(w, h)| format!("{}x{}, ", w, h))
        .unwrap_or_default();
    let mut out = String::new();
    let _ = writeln!(out, "{}", reference);
    let _ = writeln!(out, "{}", BEGIN);
    let _ = writeln!(out, "<details class=\"embedded-content\">");
    let _ = writeln!(
        out,
        "<summary>{} {} ({}{}, modified {})</summary>",
        attachment.kind.emoji(),
        attachment.file_name(),
        dims,
        format_size(attachment.size),
        format_modified(attachment.modified)
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", body.trim_end());
    let _ = writeln!(out);
    let _ = writeln!(out, "</details>");
    let _ = write!(out, "{}", END);
    out
}

/// Same frame as [`embedded`], carrying the failure details instead of content.
pub fn placeholder(reference: &str, failure: &Failure<'_>) -> String {
    let file_type = if failure.extension.is_empty() {
        failure.kind.map_or("unknown", AttachmentKind::as_str).to_uppercase()
    } else {
        failure.extension.to_uppercase()
    };
    let size = failure
        .size
        .map(format_size)
        .unwrap_or_else(|| "unknown".to_string());

    let mut out = String::new();
    let _ = writeln!(out, "{}", reference);
    let _ = writeln!(out, "{}", BEGIN);
    let _ = writeln!(out, "<details class=\"embedded-content attachment-error\">");
    let _ = writeln!(out, "<summary>⚠️ {} (not converted)</summary>", failure.file_name);
    let _ = writeln!(out);
    let _ = writeln!(out, "- **File Name**: {}", failure.file_name);
    let _ = writeln!(out, "- **File Type**: {}", file_type);
    let _ = writeln!(out, "- **Size**: {}", size);
    let _ = writeln!(out, "- **Last Modified**: {}", format_modified(failure.modified));
    let _ = writeln!(out, "- **Error Type**: {}", failure.error_type);
    let _ = writeln!(out, "- **Error Message**: {}", one_line(failure.primary_error));
    if let Some(fallback) = failure.fallback_error {
        let _ = writeln!(out, "- **Fallback Error**: {}", one_line(fallback));
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "> This attachment could not be converted. Please access the original file for content."
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "</details>");
    let _ = write!(out, "{}", END);
    out
}

fn one_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn attachment() -> Attachment {
        Attachment {
            path: PathBuf::from("/notes/trip/map.svg"),
            modified: None,
            size: 2048,
            kind: AttachmentKind::Image,
        }
    }

    #[test]
    fn embedded_keeps_reference_first() {
        let out = embedded("![m](trip/map.svg)", &attachment(), Some((10, 20)), "A map.\n\n");
        assert!(out.starts_with("![m](trip/map.svg)\n<!-- BEGIN EMBEDDED CONTENT -->"));
        assert!(out.contains("<summary>🖼️ map.svg (10x20, 2.0KB, modified unknown)</summary>"));
        assert!(out.contains("\n\nA map.\n\n</details>"));
        assert!(out.ends_with(END));
    }

    #[test]
    fn placeholder_lists_details() {
        let out = placeholder(
            "![chart](notes/chart.png)",
            &Failure {
                file_name: "chart.png",
                kind: None,
                extension: "png",
                size: None,
                modified: None,
                error_type: "not_found",
                primary_error: "File not found:\n chart.png",
                fallback_error: Some("no fallback"),
            },
        );
        assert!(out.contains("- **File Name**: chart.png"));
        assert!(out.contains("- **File Type**: PNG"));
        assert!(out.contains("- **Size**: unknown"));
        assert!(out.contains("- **Error Type**: not_found"));
        assert!(out.contains("- **Error Message**: File not found: chart.png"));
        assert!(out.contains("- **Fallback Error**: no fallback"));
    }
}
