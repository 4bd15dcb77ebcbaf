use crate::cache::{CacheEntry, CacheKey, CachedVia, ConversionCache, fingerprint};
use crate::error::ConvertError;
use crate::note::{Attachment, AttachmentKind};
use crate::render::{self, Failure};
use crate::services::{ConversionEngine, VisionService};
use crate::stats::ErrorCategory;
use crate::transcode::{ImageTranscoder, image_dimensions, is_vision_native};
use crate::utils::{RunOptions, format_size};
use calamine::{Reader, open_workbook_auto};
use std::fs;
use std::path::Path;

/// How a snippet was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionTag {
    Success,
    Fallback,
    Skipped,
    Error,
}

impl ConversionTag {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversionTag::Success => "success",
            ConversionTag::Fallback => "fallback",
            ConversionTag::Skipped => "skipped",
            ConversionTag::Error => "error",
        }
    }
}

/// Result of converting one attachment for one reference.
#[derive(Debug, Clone)]
pub struct Converted {
    pub snippet: String,
    pub tag: ConversionTag,
    pub from_cache: bool,
    /// Set when `tag` is `Error`.
    pub failure: Option<(ErrorCategory, String)>,
}

pub struct AttachmentConverter<'a> {
    cache: &'a ConversionCache,
    engine: &'a dyn ConversionEngine,
    vision: Option<&'a dyn VisionService>,
    transcoder: &'a dyn ImageTranscoder,
    options: &'a RunOptions,
}

impl<'a> AttachmentConverter<'a> {
    pub fn new(
        cache: &'a ConversionCache,
        engine: &'a dyn ConversionEngine,
        vision: Option<&'a dyn VisionService>,
        transcoder: &'a dyn ImageTranscoder,
        options: &'a RunOptions,
    ) -> Self {
        Self {
            cache,
            engine,
            vision,
            transcoder,
            options,
        }
    }

    /// Convert `attachment` and wrap the result around the reference text it
    /// replaces. Never fails: problems become an `Error` placeholder.
    pub fn convert(&self, attachment: &Attachment, reference: &str) -> Converted {
        match attachment.kind {
            AttachmentKind::Unsupported => {
                let message = format!(
                    "{} files cannot be converted",
                    attachment.extension().to_uppercase()
                );
                self.failed(
                    attachment,
                    reference,
                    &ConvertError::UnsupportedFormat(message),
                    None,
                )
            }
            AttachmentKind::Image => self.convert_image(attachment, reference),
            _ => self.convert_file(attachment, reference),
        }
    }

    fn convert_image(&self, attachment: &Attachment, reference: &str) -> Converted {
        let dims = image_dimensions(&attachment.path);
        let vision = match self.vision {
            Some(v) if !self.options.skip_vision => v,
            _ => {
                let detail = match dims {
                    Some((w, h)) => format!("{}x{} pixels, {}", w, h, format_size(attachment.size)),
                    None => format_size(attachment.size),
                };
                let body = format!("*Image analysis skipped ({}).*", detail);
                return Converted {
                    snippet: render::embedded(reference, attachment, dims, &body),
                    tag: ConversionTag::Skipped,
                    from_cache: false,
                    failure: None,
                };
            }
        };

        let fp = fingerprint(&["vision", vision.model(), &self.options.vision_prompt]);
        self.cached(attachment, reference, dims, &fp, || {
            let primary = self
                .image_bytes(attachment)
                .and_then(|bytes| vision.analyze(&bytes, &self.options.vision_prompt));
            match primary {
                Ok(text) => Ok((text, CachedVia::Primary)),
                Err(primary) => {
                    tracing::warn!(
                        "Vision analysis failed for {}: {}; trying {}",
                        attachment.path.display(),
                        primary,
                        self.engine.name()
                    );
                    self.engine
                        .convert(&attachment.path)
                        .map(|text| (text, CachedVia::Fallback))
                        .map_err(|fallback| (primary, fallback))
                }
            }
        })
    }

    fn convert_file(&self, attachment: &Attachment, reference: &str) -> Converted {
        let fp = fingerprint(&["convert", self.engine.name()]);
        self.cached(attachment, reference, None, &fp, || {
            match self.engine.convert(&attachment.path) {
                Ok(text) => Ok((text, CachedVia::Primary)),
                Err(primary) => {
                    tracing::warn!(
                        "{} failed for {}: {}; using {} fallback",
                        self.engine.name(),
                        attachment.path.display(),
                        primary,
                        attachment.kind.as_str()
                    );
                    fallback_text(attachment)
                        .map(|text| (text, CachedVia::Fallback))
                        .map_err(|fallback| (primary, fallback))
                }
            }
        })
    }

    /// Cache lookup, compute on miss, store, format. The whole sequence runs
    /// under the key's lock.
    fn cached(
        &self,
        attachment: &Attachment,
        reference: &str,
        dims: Option<(u32, u32)>,
        fp: &str,
        compute: impl FnOnce() -> Result<(String, CachedVia), (ConvertError, ConvertError)>,
    ) -> Converted {
        let key = CacheKey::new(&attachment.path, attachment.modified, fp);
        let run = || {
            if let Some(markdown) = key
                .as_ref()
                .and_then(|k| self.cache.get(k))
                .and_then(|entry| entry.markdown)
            {
                return Converted {
                    snippet: render::embedded(reference, attachment, dims, &markdown),
                    tag: ConversionTag::Success,
                    from_cache: true,
                    failure: None,
                };
            }

            match compute() {
                Ok((markdown, via)) => {
                    if let Some(k) = &key
                        && let Err(e) = self.cache.put(k, &CacheEntry::text(k, via, markdown.clone()))
                    {
                        tracing::warn!("Could not cache {}: {}", attachment.path.display(), e);
                    }
                    let tag = match via {
                        CachedVia::Primary => ConversionTag::Success,
                        CachedVia::Fallback => ConversionTag::Fallback,
                    };
                    Converted {
                        snippet: render::embedded(reference, attachment, dims, &markdown),
                        tag,
                        from_cache: false,
                        failure: None,
                    }
                }
                Err((primary, fallback)) => self.failed(attachment, reference, &primary, Some(&fallback)),
            }
        };

        match &key {
            Some(k) => self.cache.with_key_lock(k, run),
            None => run(),
        }
    }

    /// Bytes the vision service can take: the file itself for native formats,
    /// otherwise a transcoded copy, cached under its own key.
    fn image_bytes(&self, attachment: &Attachment) -> Result<Vec<u8>, ConvertError> {
        let ext = attachment.extension();
        if is_vision_native(&ext) {
            return Ok(fs::read(&attachment.path)?);
        }

        let fp = fingerprint(&["transcode", &ext]);
        let Some(key) = CacheKey::new(&attachment.path, attachment.modified, &fp) else {
            return self.transcoder.transcode(&attachment.path);
        };
        self.cache.with_key_lock(&key, || {
            if let Some(bytes) = self.cache.get(&key).and_then(|e| e.payload) {
                tracing::debug!("Using cached transcode of {}", attachment.path.display());
                return Ok(bytes);
            }
            let bytes = self.transcoder.transcode(&attachment.path)?;
            if let Err(e) = self.cache.put(&key, &CacheEntry::bytes(&key, bytes.clone())) {
                tracing::warn!("Could not cache transcode of {}: {}", attachment.path.display(), e);
            }
            Ok(bytes)
        })
    }

    fn failed(
        &self,
        attachment: &Attachment,
        reference: &str,
        primary: &ConvertError,
        fallback: Option<&ConvertError>,
    ) -> Converted {
        let name = attachment.file_name();
        let ext = attachment.extension();
        let primary_msg = primary.to_string();
        let fallback_msg = fallback.map(ToString::to_string);
        let mut failure = Failure::for_attachment(attachment, &name, &ext, primary.label(), &primary_msg);
        failure.fallback_error = fallback_msg.as_deref();

        tracing::warn!("Could not convert {}: {}", attachment.path.display(), primary_msg);
        Converted {
            snippet: render::placeholder(reference, &failure),
            tag: ConversionTag::Error,
            from_cache: false,
            failure: Some((
                ErrorCategory::from_error(primary),
                format!("{}: {}", name, primary_msg),
            )),
        }
    }
}

/// Narrow handler for when the engine gives up, chosen by attachment kind.
fn fallback_text(attachment: &Attachment) -> Result<String, ConvertError> {
    let ext = attachment.extension();
    match (attachment.kind, ext.as_str()) {
        (AttachmentKind::Spreadsheet, "csv") => csv_table(&attachment.path, b','),
        (AttachmentKind::Spreadsheet, "tsv") => csv_table(&attachment.path, b'\t'),
        (AttachmentKind::Spreadsheet, "xlsx" | "xls") => workbook_table(&attachment.path),
        (AttachmentKind::Document, "pdf") => pdf_pages(&attachment.path),
        (AttachmentKind::Document, "json") => {
            let raw = read_utf8(&attachment.path)?;
            let value: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|e| ConvertError::Conversion(format!("invalid JSON: {}", e)))?;
            let pretty = serde_json::to_string_pretty(&value)
                .map_err(|e| ConvertError::Conversion(e.to_string()))?;
            Ok(fenced(&pretty, "json"))
        }
        (AttachmentKind::Document, "txt" | "md" | "xml" | "html" | "htm") => {
            let lang = match ext.as_str() {
                "txt" => "",
                "md" => "markdown",
                "htm" => "html",
                other => other,
            };
            Ok(fenced(&read_utf8(&attachment.path)?, lang))
        }
        (AttachmentKind::Other, _) => Ok(fenced(&read_utf8(&attachment.path)?, "")),
        _ => Err(ConvertError::UnsupportedFormat(format!(
            "no fallback handler for .{} files",
            ext
        ))),
    }
}

fn read_utf8(path: &Path) -> Result<String, ConvertError> {
    String::from_utf8(fs::read(path)?)
        .map_err(|_| ConvertError::UnsupportedFormat("file is not UTF-8 text".into()))
}

fn fenced(text: &str, lang: &str) -> String {
    let fence = if text.contains("```") { "~~~~" } else { "```" };
    format!("{fence}{lang}\n{}\n{fence}", text.trim_end())
}

fn csv_table(path: &Path, delimiter: u8) -> Result<String, ConvertError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| ConvertError::Conversion(e.to_string()))?;

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ConvertError::Conversion(e.to_string()))?;
        rows.push(record.iter().map(table_cell).collect());
    }
    markdown_table(&rows)
}

/// First worksheet of an Excel workbook as a table.
fn workbook_table(path: &Path) -> Result<String, ConvertError> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| ConvertError::Conversion(format!("cannot open workbook: {}", e)))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ConvertError::Conversion("workbook has no sheets".into()))?
        .map_err(|e| ConvertError::Conversion(e.to_string()))?;

    let rows: Vec<Vec<String>> = range
        .rows()
        .map(|row| row.iter().map(|cell| table_cell(&cell.to_string())).collect())
        .collect();
    markdown_table(&rows)
}

/// Text of every page that has any, under a `### Page N` heading.
fn pdf_pages(path: &Path) -> Result<String, ConvertError> {
    let doc = lopdf::Document::load(path)
        .map_err(|e| ConvertError::Conversion(format!("cannot read PDF: {}", e)))?;

    let mut pages = Vec::new();
    for number in doc.get_pages().into_keys() {
        let text = doc
            .extract_text(&[number])
            .map_err(|e| ConvertError::Conversion(format!("page {}: {}", number, e)))?;
        if !text.trim().is_empty() {
            pages.push(format!("### Page {}\n\n{}", number, text.trim_end()));
        }
    }
    if pages.is_empty() {
        return Err(ConvertError::Conversion("no text content found in PDF".into()));
    }
    Ok(pages.join("\n\n"))
}

/// Markdown table with the first row as header; short rows are padded.
fn markdown_table(rows: &[Vec<String>]) -> Result<String, ConvertError> {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return Err(ConvertError::Conversion("spreadsheet is empty".into()));
    }

    let line = |row: &[String]| {
        let mut cells: Vec<&str> = row.iter().map(String::as_str).collect();
        cells.resize(width, "");
        format!("| {} |", cells.join(" | "))
    };
    let mut out = vec![line(&rows[0]), format!("|{}", " --- |".repeat(width))];
    out.extend(rows[1..].iter().map(|r| line(r)));
    Ok(out.join("\n"))
}

fn table_cell(raw: &str) -> String {
    raw.replace('|', "\\|").replace(['\r', '\n'], " ").trim().to_string()
}
