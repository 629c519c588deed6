//! Text extraction for binary source formats (PDF, DOCX, XLSX) and fetched
//! web pages (HTML).
//!
//! The ingestor hands over raw bytes; these functions return plain UTF-8
//! text or an [`ExtractError`]. Extraction never panics on malformed input.
//! OOXML containers are read with bounded ZIP entry reads.

use std::io::Read;

use quick_xml::events::Event;
use thiserror::Error;

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("HTML extraction failed: {0}")]
    Html(String),
}

impl ExtractError {
    fn ooxml(e: impl ToString) -> Self {
        ExtractError::Ooxml(e.to_string())
    }
}

/// pdf-extract can panic on damaged files; the panic is turned into an error.
pub fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(result) => result.map_err(|e| ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("parser panicked on malformed input".into())),
    }
}

/// Text of `word/document.xml`, one line per `<w:p>` paragraph.
pub fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim().to_string())
}

/// Cell values of every worksheet, tab-separated, one line per row.
pub fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = if archive.index_for_name("xl/sharedStrings.xml").is_some() {
        read_shared_strings(&mut archive)?
    } else {
        Vec::new()
    };

    let mut sheets = Vec::new();
    for name in list_worksheet_names(&archive).into_iter().take(XLSX_MAX_SHEETS) {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &name)?;
        let text = extract_sheet_rows(&sheet_xml, &shared_strings)?;
        if !text.is_empty() {
            sheets.push(text);
        }
    }
    Ok(sheets.join("\n\n"))
}

/// Visible text of an HTML page plus its `<title>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebPage {
    pub title: Option<String>,
    /// Block elements become paragraphs separated by blank lines.
    pub text: String,
}

/// Elements whose content is never visible text.
const HTML_SKIPPED: &[&[u8]] = &[b"script", b"style", b"noscript", b"svg", b"template", b"head"];
const HTML_BLOCKS: &[&[u8]] = &[
    b"p", b"div", b"br", b"li", b"tr", b"h1", b"h2", b"h3", b"h4", b"h5", b"h6", b"section",
    b"article", b"header", b"footer", b"blockquote", b"pre", b"ul", b"ol", b"table",
];

/// Lenient HTML text extraction on quick-xml events. Unclosed and
/// mismatched tags are tolerated; a hard parse error ends extraction with
/// whatever text was collected so far.
pub fn extract_html(bytes: &[u8]) -> Result<WebPage, ExtractError> {
    let cleaned = strip_raw_text_elements(bytes);
    let mut reader = quick_xml::Reader::from_reader(cleaned.as_slice());
    {
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.trim_text(true);
    }

    let mut title: Option<String> = None;
    let mut in_title = false;
    let mut skip_depth = 0usize;
    let mut out = String::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref().eq_ignore_ascii_case(b"title") {
                    in_title = true;
                } else if is_one_of(name.as_ref(), HTML_SKIPPED) {
                    skip_depth += 1;
                } else if is_one_of(name.as_ref(), HTML_BLOCKS) {
                    out.push('\n');
                }
            }
            Ok(Event::Empty(e)) => {
                if is_one_of(e.local_name().as_ref(), HTML_BLOCKS) {
                    out.push('\n');
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref().eq_ignore_ascii_case(b"title") {
                    in_title = false;
                } else if is_one_of(name.as_ref(), HTML_SKIPPED) {
                    skip_depth = skip_depth.saturating_sub(1);
                } else if is_one_of(name.as_ref(), HTML_BLOCKS) {
                    out.push('\n');
                }
            }
            Ok(Event::Text(te)) => {
                let text = te
                    .unescape_with(html_entity)
                    .map(|t| t.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&te).into_owned());
                if in_title {
                    if title.is_none() {
                        title = Some(collapse_whitespace(&text));
                    }
                } else if skip_depth == 0 {
                    out.push_str(&text);
                    out.push(' ');
                }
            }
            Ok(Event::CData(cd)) if skip_depth == 0 && !in_title => {
                out.push_str(&String::from_utf8_lossy(&cd));
                out.push(' ');
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                if out.trim().is_empty() && title.is_none() {
                    return Err(ExtractError::Html(e.to_string()));
                }
                tracing::debug!(error = %e, "HTML parse stopped early");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    let text = out
        .lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    Ok(WebPage {
        title: title.filter(|t| !t.is_empty()),
        text,
    })
}

/// Drops `<script>` and `<style>` elements wholesale. Their bodies are not
/// markup and a bare `<` inside them would swallow the closing tag.
fn strip_raw_text_elements(bytes: &[u8]) -> Vec<u8> {
    let lower = bytes.to_ascii_lowercase();
    let mut out = Vec::with_capacity(bytes.len());
    let mut pos = 0;
    while pos < bytes.len() {
        let next = [&b"script"[..], &b"style"[..]]
            .into_iter()
            .filter_map(|tag| find_from(&lower, &[&b"<"[..], tag].concat(), pos).map(|at| (at, tag)))
            .min_by_key(|(at, _)| *at);
        let Some((start, tag)) = next else { break };
        out.extend_from_slice(&bytes[pos..start]);
        pos = match find_from(&lower, &[&b"</"[..], tag].concat(), start) {
            Some(close) => find_from(&lower, b">", close).map_or(bytes.len(), |gt| gt + 1),
            None => bytes.len(),
        };
    }
    if pos < bytes.len() {
        out.extend_from_slice(&bytes[pos..]);
    }
    out
}

fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

fn is_one_of(name: &[u8], set: &[&[u8]]) -> bool {
    set.iter().any(|tag| name.eq_ignore_ascii_case(tag))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn html_entity(name: &str) -> Option<&'static str> {
    match name {
        "nbsp" => Some(" "),
        "mdash" => Some("\u{2014}"),
        "ndash" => Some("\u{2013}"),
        "hellip" => Some("\u{2026}"),
        "lsquo" | "rsquo" => Some("'"),
        "ldquo" | "rdquo" => Some("\""),
        "copy" => Some("\u{a9}"),
        _ => None,
    }
}

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ExtractError::ooxml)
}

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(ExtractError::ooxml)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml")?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = current.is_some(),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.extend(current.take()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn list_worksheet_names(archive: &Archive<'_>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn extract_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut shared = false;
    let mut cell_count = 0usize;
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                }
                // <v> holds stored values, <t> holds inline strings
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().unwrap_or_default();
                let value = raw.trim();
                if !value.is_empty() {
                    let cell = if shared {
                        value
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned())
                    } else {
                        Some(value.to_string())
                    };
                    if let Some(cell) = cell {
                        row.push(cell);
                        cell_count += 1;
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => shared = false,
                b"row" if !row.is_empty() => rows.push(std::mem::take(&mut row).join("\t")),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join("\t"));
    }
    Ok(rows.join("\n"))
}
