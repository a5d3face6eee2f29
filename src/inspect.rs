//! Read embedded metadata back out of a file.
//!
//! Used by the CLI `--show` flag and to check that an embed round-trips.

use anyhow::{Context, Result};
use img_parts::Bytes;
use img_parts::jpeg::Jpeg;
use img_parts::png::Png;
use nom_exif::*;
use serde::Serialize;
use std::path::Path;

use crate::embed::{MediaKind, XMP_HEADER, XMP_KEYWORD, is_xmp_itxt};
use crate::record::MetadataRecord;
use crate::scan;
use crate::xmp::xml_unescape;

// IFD0 tag IDs
const TAG_IMAGE_DESCRIPTION: u16 = 0x010E;
const TAG_SOFTWARE: u16 = 0x0131;
const TAG_XP_TITLE: u16 = 0x9C9B;
const TAG_XP_COMMENT: u16 = 0x9C9C;
const TAG_XP_KEYWORDS: u16 = 0x9C9E;

const PACKET_BEGIN: &[u8] = b"<?xpacket begin";
const PACKET_END: &[u8] = b"<?xpacket end=\"w\"?>";

/// EXIF fields written by the JPEG injector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExifSummary {
    pub description: Option<String>,
    pub software: Option<String>,
    pub xp_title: Option<String>,
    pub xp_comment: Option<String>,
    pub xp_keywords: Option<String>,
}

/// Return the embedded XMP packet, if any.
///
/// JPEG and PNG are read through their container structure; for every other
/// kind, or when the container does not parse, the last
/// `<?xpacket begin … <?xpacket end="w"?>` span in the bytes wins.
pub fn extract_xmp(bytes: &[u8], kind: MediaKind) -> Option<String> {
    let structured = match kind {
        MediaKind::Jpeg => jpeg_xmp(bytes),
        MediaKind::Png => png_xmp(bytes),
        _ => None,
    };
    structured.or_else(|| scan_xmp(bytes))
}

fn jpeg_xmp(bytes: &[u8]) -> Option<String> {
    let jpeg = Jpeg::from_bytes(Bytes::copy_from_slice(bytes)).ok()?;
    jpeg.segments()
        .iter()
        .filter(|s| s.marker() == 0xE1 && s.contents().starts_with(XMP_HEADER))
        .find_map(|s| String::from_utf8(s.contents()[XMP_HEADER.len()..].to_vec()).ok())
}

fn png_xmp(bytes: &[u8]) -> Option<String> {
    let png = Png::from_bytes(Bytes::copy_from_slice(bytes)).ok()?;
    png.chunks()
        .iter()
        .filter(|c| &c.kind() == b"iTXt" && is_xmp_itxt(c.contents()))
        .find_map(|c| itxt_text(c.contents()))
}

/// Text of an uncompressed `iTXt` chunk whose keyword is already checked.
fn itxt_text(data: &[u8]) -> Option<String> {
    let mut pos = XMP_KEYWORD.len() + 1;
    let compressed = *data.get(pos)? != 0;
    if compressed {
        log::debug!("Skipping compressed XMP iTXt chunk");
        return None;
    }
    pos += 2;
    // Language tag, then translated keyword, both NUL-terminated.
    for _ in 0..2 {
        pos += data.get(pos..)?.iter().position(|&b| b == 0)? + 1;
    }
    String::from_utf8(data.get(pos..)?.to_vec()).ok()
}

fn scan_xmp(bytes: &[u8]) -> Option<String> {
    let start = scan::rfind(bytes, PACKET_BEGIN)?;
    let end = scan::find_from(bytes, PACKET_END, start)? + PACKET_END.len();
    String::from_utf8(bytes[start..end].to_vec()).ok()
}

/// Recover title, description and keywords from an XMP packet.
///
/// Only understands the layout [`crate::xmp::generate_xmp_packet`] produces
/// closely enough; missing fields come back empty.
///
/// ```rust
/// use stockmeta::inspect::parse_packet;
/// use stockmeta::record::MetadataRecord;
/// use stockmeta::xmp::generate_xmp_packet;
///
/// let record = MetadataRecord::new("Salt & pepper", "Close-up", ["salt", "pepper"]);
/// assert_eq!(parse_packet(&generate_xmp_packet(&record, "image/png")), record);
/// ```
pub fn parse_packet(xmp: &str) -> MetadataRecord {
    let title = between(xmp, "<dc:title>", "</dc:title>")
        .and_then(alt_default)
        .unwrap_or_default();
    let description = between(xmp, "<dc:description>", "</dc:description>")
        .and_then(alt_default)
        .unwrap_or_default();
    let keywords = between(xmp, "<dc:subject>", "</dc:subject>")
        .map(list_items)
        .unwrap_or_default();

    MetadataRecord {
        title,
        description,
        keywords,
    }
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let len = text[start..].find(close)?;
    Some(&text[start..start + len])
}

fn alt_default(alt: &str) -> Option<String> {
    list_items(alt).into_iter().next()
}

/// Unescaped contents of every `<rdf:li …>` element, in order.
fn list_items(container: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut rest = container;
    while let Some(open) = rest.find("<rdf:li") {
        let after = &rest[open..];
        let Some(gt) = after.find('>') else { break };
        let Some(close) = after.find("</rdf:li>") else { break };
        if close < gt {
            break;
        }
        items.push(xml_unescape(&after[gt + 1..close]));
        rest = &after[close + "</rdf:li>".len()..];
    }
    items
}

/// Read the IFD0 fields the JPEG injector writes.
///
/// A file without EXIF yields an empty summary rather than an error.
pub fn read_exif(path: &Path) -> Result<ExifSummary> {
    let mut parser = MediaParser::new();
    let ms = MediaSource::file_path(path).context("Failed to open media file")?;

    let iter: ExifIter = match parser.parse(ms) {
        Ok(iter) => iter,
        Err(_) => {
            log::debug!("No EXIF data found in {}", path.display());
            return Ok(ExifSummary::default());
        }
    };
    let exif: Exif = iter.into();

    let text = |code: u16| exif.get_by_ifd_tag_code(0, code).and_then(entry_to_string);
    let xp = |code: u16| exif.get_by_ifd_tag_code(0, code).and_then(xp_to_string);

    Ok(ExifSummary {
        description: text(TAG_IMAGE_DESCRIPTION),
        software: text(TAG_SOFTWARE),
        xp_title: xp(TAG_XP_TITLE),
        xp_comment: xp(TAG_XP_COMMENT),
        xp_keywords: xp(TAG_XP_KEYWORDS),
    })
}

fn entry_to_string(val: &EntryValue) -> Option<String> {
    let s = val.to_string();
    let s = s.trim().trim_matches('"').to_string();
    if s.is_empty() { None } else { Some(s) }
}

/// XP* tags hold NUL-terminated UTF-16LE in a byte array.
fn xp_to_string(val: &EntryValue) -> Option<String> {
    match val {
        EntryValue::U8Array(raw) | EntryValue::Undefined(raw) => {
            let units: Vec<u16> = raw
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .take_while(|&u| u != 0)
                .collect();
            let s = String::from_utf16_lossy(&units);
            if s.is_empty() { None } else { Some(s) }
        }
        other => entry_to_string(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{MediaAsset, embed_metadata};
    use crate::xmp::generate_xmp_packet;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn record() -> MetadataRecord {
        MetadataRecord::new("Red barn", "Barn <in> a field", ["barn", "farm & field"])
    }

    fn encoded(format: ImageFormat) -> Vec<u8> {
        let img = RgbImage::from_pixel(8, 8, Rgb([180, 30, 30]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    fn embed(bytes: Vec<u8>, mime: &str, record: &MetadataRecord) -> Vec<u8> {
        let asset = MediaAsset::new(bytes, mime, "");
        embed_metadata(&asset, record).unwrap().into_bytes()
    }

    // ── extract_xmp ──────────────────────────────────────────────────

    #[test]
    fn jpeg_round_trip() {
        let out = embed(encoded(ImageFormat::Jpeg), "image/jpeg", &record());
        let xmp = extract_xmp(&out, MediaKind::Jpeg).unwrap();
        assert_eq!(xmp, generate_xmp_packet(&record(), "image/jpeg"));
        assert_eq!(parse_packet(&xmp), record());
    }

    #[test]
    fn png_round_trip() {
        let out = embed(encoded(ImageFormat::Png), "image/png", &record());
        let xmp = extract_xmp(&out, MediaKind::Png).unwrap();
        assert_eq!(xmp, generate_xmp_packet(&record(), "image/png"));
    }

    #[test]
    fn png_reembed_reads_latest() {
        let once = embed(encoded(ImageFormat::Png), "image/png", &record());
        let newer = MetadataRecord::new("Blue barn", "", ["barn"]);
        let twice = embed(once, "image/png", &newer);
        let xmp = extract_xmp(&twice, MediaKind::Png).unwrap();
        assert_eq!(parse_packet(&xmp), newer);
    }

    #[test]
    fn eps_and_video_use_byte_scan() {
        let eps = embed(b"%!PS-Adobe-3.0\n%%EndComments\n".to_vec(), "application/postscript", &record());
        // EPS lines carry a "% " prefix, so only presence is checked.
        assert!(extract_xmp(&eps, MediaKind::Eps).is_some());

        let mp4 = embed(vec![0, 0, 0, 8, b'f', b'r', b'e', b'e'], "video/mp4", &record());
        let xmp = extract_xmp(&mp4, MediaKind::Video).unwrap();
        assert_eq!(parse_packet(&xmp), record());
    }

    #[test]
    fn eps_reembed_reads_latest() {
        let once = embed(b"%!PS-Adobe-3.0\n%%EndComments\nnewpath\n".to_vec(), "application/postscript", &record());
        let newer = MetadataRecord::new("Blue barn", "Barn at noon", ["barn", "blue"]);
        let twice = embed(once, "application/postscript", &newer);
        let xmp = extract_xmp(&twice, MediaKind::Eps).unwrap();
        assert_eq!(parse_packet(&xmp.replace("\n% ", "\n")), newer);
    }

    #[test]
    fn scan_prefers_last_packet() {
        let first = generate_xmp_packet(&MetadataRecord::new("Old", "", ["a"]), "image/svg+xml");
        let second = generate_xmp_packet(&record(), "image/svg+xml");
        let doc = format!("<svg>{first}<g/>{second}</svg>");
        let xmp = extract_xmp(doc.as_bytes(), MediaKind::Svg).unwrap();
        assert_eq!(xmp, second);
    }

    #[test]
    fn no_packet_returns_none() {
        assert_eq!(extract_xmp(&encoded(ImageFormat::Png), MediaKind::Png), None);
        assert_eq!(extract_xmp(b"<svg></svg>", MediaKind::Svg), None);
    }

    // ── parse_packet ─────────────────────────────────────────────────

    #[test]
    fn parse_unescapes_and_keeps_order() {
        let parsed = parse_packet(&generate_xmp_packet(&record(), "image/png"));
        assert_eq!(parsed.description, "Barn <in> a field");
        assert_eq!(parsed.keywords, vec!["barn", "farm & field"]);
    }

    #[test]
    fn parse_garbage_is_empty() {
        assert!(parse_packet("not xmp").is_empty());
    }

    // ── read_exif ────────────────────────────────────────────────────

    #[test]
    fn read_exif_after_embed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("barn.jpg");
        std::fs::write(&path, embed(encoded(ImageFormat::Jpeg), "image/jpeg", &record())).unwrap();

        let exif = read_exif(&path).unwrap();
        assert_eq!(exif.description.as_deref(), Some("Red barn - Barn <in> a field"));
        assert_eq!(exif.xp_title.as_deref(), Some("Red barn"));
        assert_eq!(exif.xp_keywords.as_deref(), Some("barn; farm & field"));
    }

    #[test]
    fn read_exif_without_exif_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.jpg");
        std::fs::write(&path, encoded(ImageFormat::Jpeg)).unwrap();
        assert_eq!(read_exif(&path).unwrap(), ExifSummary::default());
    }
}
