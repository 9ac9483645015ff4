//! Rendering fetched chapter content into on-disk formats.

use crate::error::StorageError;
use crate::types::DownloadFormat;
use epub_builder::{EpubBuilder, EpubContent, ReferenceType, ZipLibrary};
use regex::Regex;
use std::io::Write;
use std::sync::LazyLock;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>")
});
static LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)<br\s*/?>"));
static BLOCK_END: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)</(p|div|h[1-6]|li|blockquote|tr|section|article)\s*>"));
static TAG: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?s)<[^>]*>"));
static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| pattern(r"\n[ \t]*\n\s*"));
static NUMERIC_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"&#(?:[xX]([0-9a-fA-F]+)|([0-9]+));"));

// Patterns are compile-time constants covered by the tests below
#[allow(clippy::expect_used)]
fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("static regex must compile")
}

/// Titles embedded in containers
pub(crate) struct RenderContext<'a> {
    pub novel_title: &'a str,
    pub chapter_title: &'a str,
}

/// Convert a fetched payload to the bytes stored for `format`
pub(crate) fn render(
    format: DownloadFormat,
    content: &str,
    ctx: &RenderContext<'_>,
) -> Result<Vec<u8>, StorageError> {
    match format {
        DownloadFormat::Html => Ok(content.as_bytes().to_vec()),
        DownloadFormat::PlainText => Ok(paragraphs(content).join("\n\n").into_bytes()),
        DownloadFormat::Docx => render_docx(&paragraphs(content)),
        DownloadFormat::Epub => render_epub(&paragraphs(content), ctx),
    }
}

/// Strip markup and split into trimmed, non-empty paragraphs
///
/// Block-level closing tags and blank lines separate paragraphs; `<br>` is a
/// line break inside one. Plain text input passes through unchanged apart
/// from whitespace trimming.
fn paragraphs(content: &str) -> Vec<String> {
    let text = content.replace("\r\n", "\n");
    let text = SCRIPT_OR_STYLE.replace_all(&text, "");
    let text = LINE_BREAK.replace_all(&text, "\n");
    let text = BLOCK_END.replace_all(&text, "\n\n");
    let text = TAG.replace_all(&text, "");
    let text = decode_entities(&text);

    PARAGRAPH_BREAK
        .split(&text)
        .map(|p| {
            p.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|p| !p.is_empty())
        .collect()
}

fn decode_entities(text: &str) -> String {
    let numeric = NUMERIC_ENTITY.replace_all(text, |caps: &regex::Captures<'_>| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (None, Some(dec)) => dec.as_str().parse().ok(),
            _ => None,
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });

    // &amp; last so "&amp;lt;" decodes to "&lt;" and not "<"
    numeric
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn render_err(format: &'static str, e: impl std::fmt::Display) -> StorageError {
    StorageError::Render {
        format,
        reason: e.to_string(),
    }
}

const DOCX_CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
  <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
  <Default Extension="xml" ContentType="application/xml"/>
  <Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>
</Types>"#;

const DOCX_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>
</Relationships>"#;

/// Minimal WordprocessingML package, one `w:p` per paragraph
fn render_docx(paragraphs: &[String]) -> Result<Vec<u8>, StorageError> {
    let body: String = paragraphs
        .iter()
        .map(|p| {
            format!(
                "<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>",
                escape_xml(p)
            )
        })
        .collect();

    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    {}
    <w:sectPr/>
  </w:body>
</w:document>"#,
        body
    );

    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, value) in [
        ("[Content_Types].xml", DOCX_CONTENT_TYPES),
        ("_rels/.rels", DOCX_RELS),
        ("word/document.xml", document.as_str()),
    ] {
        zip.start_file(name, options)
            .map_err(|e| render_err("docx", e))?;
        zip.write_all(value.as_bytes())
            .map_err(|e| render_err("docx", e))?;
    }

    let cursor = zip.finish().map_err(|e| render_err("docx", e))?;
    Ok(cursor.into_inner())
}

/// Single-chapter EPUB
fn render_epub(paragraphs: &[String], ctx: &RenderContext<'_>) -> Result<Vec<u8>, StorageError> {
    let title = escape_xml(ctx.chapter_title);
    let body: String = paragraphs
        .iter()
        .map(|p| format!("    <p>{}</p>\n", escape_xml(p).replace('\n', "<br/>")))
        .collect();

    let xhtml = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
    <title>{title}</title>
</head>
<body>
    <h1>{title}</h1>
{body}</body>
</html>"#
    );

    let mut builder =
        EpubBuilder::new(ZipLibrary::new().map_err(|e| render_err("epub", e))?)
            .map_err(|e| render_err("epub", e))?;

    builder
        .metadata("title", format!("{} - {}", ctx.novel_title, ctx.chapter_title))
        .map_err(|e| render_err("epub", e))?;
    builder
        .add_content(
            EpubContent::new("chapter.xhtml", xhtml.as_bytes())
                .title(ctx.chapter_title)
                .reftype(ReferenceType::Text),
        )
        .map_err(|e| render_err("epub", e))?;

    let mut out = Vec::new();
    builder
        .generate(&mut out)
        .map_err(|e| render_err("epub", e))?;
    Ok(out)
}
