use anyhow::{Context, Result};
use little_exif::endian::Endian;
use little_exif::exif_tag::{ExifTag, ExifTagGroup};
use little_exif::exif_tag_format::ExifTagFormat;
use little_exif::filetype::FileExtension;
use little_exif::metadata::Metadata;

use super::{Injection, PassThroughReason};
use crate::record::MetadataRecord;
use crate::xmp::generate_xmp_packet;

// EXIF tag IDs for tags not natively supported by little_exif
const TAG_XP_TITLE: u16 = 0x9C9B;
const TAG_XP_COMMENT: u16 = 0x9C9C;
const TAG_XP_KEYWORDS: u16 = 0x9C9E;

// little_exif as_u8_vec(JPEG) returns: [APP1 marker 2B][length 2B][Exif\0\0 6B][TIFF data]
const JPEG_EXIF_OVERHEAD: usize = 10; // 2 + 2 + 6
// Segment header, TIFF header, IFD0 entry table and padding, rounded up.
const EXIF_IFD_OVERHEAD: usize = 256;

const SOI: [u8; 2] = [0xFF, 0xD8];
const MARKER_APP0: u8 = 0xE0;
const MARKER_APP1: u8 = 0xE1;
const MARKER_SOS: u8 = 0xDA;
const MARKER_EOI: u8 = 0xD9;

const EXIF_HEADER: &[u8] = b"Exif\0\0";
pub(crate) const XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

/// Embed `record` into a JPEG as an EXIF APP1 segment plus an XMP APP1 segment.
///
/// 1. EXIF IFD0 gets `ImageDescription` (`"{title} - {description}"`),
///    `XPTitle`, `XPComment`, `XPKeywords` and `Software`. Any existing EXIF
///    segment is replaced; the new one follows a leading JFIF APP0, or SOI.
/// 2. The XMP packet goes into its own APP1 segment directly after SOI,
///    replacing any previous XMP segment.
///
/// Any failure returns the original bytes.
pub fn embed_jpeg(bytes: &[u8], record: &MetadataRecord, software: &str) -> Injection {
    if !bytes.starts_with(&SOI) {
        return Injection::pass_through(
            bytes,
            PassThroughReason::MalformedContainer("missing JPEG SOI marker".into()),
        );
    }

    let with_exif = match build_exif_segment(record, software).and_then(|s| splice_exif(bytes, &s)) {
        Ok(b) => b,
        Err(e) => {
            return Injection::pass_through(bytes, PassThroughReason::InjectionFailure(format!("EXIF: {e:#}")));
        }
    };
    log::debug!("  EXIF segment spliced ({} -> {} bytes)", bytes.len(), with_exif.len());

    let xmp = generate_xmp_packet(record, "image/jpeg");
    match splice_xmp(&with_exif, &xmp) {
        Ok(out) => {
            log::debug!("  XMP segment inserted ({} bytes of XMP)", xmp.len());
            Injection::Embedded(out)
        }
        Err(e) => Injection::pass_through(bytes, PassThroughReason::InjectionFailure(format!("XMP: {e:#}"))),
    }
}

/// Encode a string as UTF-16LE bytes (used for XP* tags).
fn encode_utf16le(s: &str) -> Vec<u8> {
    let mut bytes: Vec<u8> = s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
    // Null terminator
    bytes.push(0);
    bytes.push(0);
    bytes
}

/// Create an XP* tag (UTF-16LE encoded, IFD0 group).
fn make_xp_tag(tag_id: u16, value: &str) -> Option<ExifTag> {
    let raw_data = encode_utf16le(value);
    ExifTag::from_u16_with_data(
        tag_id,
        &ExifTagFormat::INT8U,
        &raw_data,
        &Endian::Little,
        &ExifTagGroup::IFD0,
    )
    .ok()
}

/// Build a complete EXIF APP1 segment (marker, length, `Exif\0\0`, TIFF).
fn build_exif_segment(record: &MetadataRecord, software: &str) -> Result<Vec<u8>> {
    let description = format!("{} - {}", record.title, record.description);
    let keywords = record.keywords_joined();

    // little_exif computes the APP1 length in u16 arithmetic; refuse anything
    // that cannot fit before handing it over.
    let estimated = EXIF_IFD_OVERHEAD
        + description.len()
        + software.len()
        + encode_utf16le(&record.title).len()
        + encode_utf16le(&record.description).len()
        + encode_utf16le(&keywords).len();
    if estimated > usize::from(u16::MAX) {
        anyhow::bail!("EXIF payload of ~{estimated} bytes exceeds the JPEG segment limit");
    }

    let mut metadata = Metadata::new();
    metadata.set_tag(ExifTag::ImageDescription(description));
    metadata.set_tag(ExifTag::Software(software.to_string()));

    for (tag_id, value) in [
        (TAG_XP_TITLE, record.title.as_str()),
        (TAG_XP_COMMENT, record.description.as_str()),
        (TAG_XP_KEYWORDS, keywords.as_str()),
    ] {
        let tag = make_xp_tag(tag_id, value)
            .with_context(|| format!("Failed to build XP tag 0x{tag_id:04X}"))?;
        metadata.set_tag(tag);
    }

    let exif_bytes = metadata.as_u8_vec(FileExtension::JPEG);
    if exif_bytes.len() <= JPEG_EXIF_OVERHEAD {
        anyhow::bail!("EXIF writer produced no TIFF data");
    }
    let tiff = &exif_bytes[JPEG_EXIF_OVERHEAD..];
    if !(tiff.starts_with(b"II") || tiff.starts_with(b"MM")) {
        anyhow::bail!("EXIF writer produced an invalid TIFF header");
    }
    app1_segment(EXIF_HEADER, tiff)
}

/// `FF E1` + big-endian length (length field + payload) + header + body.
fn app1_segment(header: &[u8], body: &[u8]) -> Result<Vec<u8>> {
    let length = 2 + header.len() + body.len();
    let length = u16::try_from(length)
        .map_err(|_| anyhow::anyhow!("APP1 payload of {length} bytes exceeds the JPEG segment limit"))?;

    let mut segment = Vec::with_capacity(usize::from(length) + 2);
    segment.extend_from_slice(&[0xFF, MARKER_APP1]);
    segment.extend_from_slice(&length.to_be_bytes());
    segment.extend_from_slice(header);
    segment.extend_from_slice(body);
    Ok(segment)
}

/// A marker segment in the JPEG header, as byte offsets into the file.
#[derive(Debug, Clone, Copy)]
struct Segment {
    marker: u8,
    /// Offset of the segment's first `FF`.
    start: usize,
    /// Offset of the payload, after the length field.
    payload: usize,
    /// One past the last payload byte.
    end: usize,
}

impl Segment {
    fn is_app1_with(&self, bytes: &[u8], header: &[u8]) -> bool {
        self.marker == MARKER_APP1 && bytes[self.payload..self.end].starts_with(header)
    }
}

/// Walk the marker segments between SOI and SOS (or EOI / end of buffer).
// Raw walk instead of img_parts::jpeg::Jpeg, which needs a complete image;
// splicing must also work on bare SOI stubs and leave other bytes untouched.
fn header_segments(bytes: &[u8]) -> Result<Vec<Segment>> {
    if !bytes.starts_with(&SOI) {
        anyhow::bail!("Not a JPEG (missing SOI)");
    }

    let mut segments = Vec::new();
    let mut pos = SOI.len();
    while pos < bytes.len() {
        if bytes[pos] != 0xFF {
            anyhow::bail!("Expected marker at offset {pos}, found 0x{:02X}", bytes[pos]);
        }
        // Skip fill bytes
        let mut m = pos + 1;
        while m < bytes.len() && bytes[m] == 0xFF {
            m += 1;
        }
        let Some(&marker) = bytes.get(m) else {
            anyhow::bail!("Truncated marker at offset {pos}");
        };

        match marker {
            MARKER_SOS | MARKER_EOI => break,
            // Standalone markers carry no length
            0x01 | 0xD0..=0xD7 => {
                pos = m + 1;
                continue;
            }
            _ => {}
        }

        if m + 3 > bytes.len() {
            anyhow::bail!("Truncated length field for marker 0x{marker:02X} at offset {pos}");
        }
        let length = usize::from(u16::from_be_bytes([bytes[m + 1], bytes[m + 2]]));
        if length < 2 {
            anyhow::bail!("Invalid segment length {length} at offset {pos}");
        }
        let end = m + 1 + length;
        if end > bytes.len() {
            anyhow::bail!("Segment 0x{marker:02X} at offset {pos} runs past end of file");
        }

        segments.push(Segment {
            marker,
            start: pos,
            payload: m + 3,
            end,
        });
        pos = end;
    }

    Ok(segments)
}

/// Copy `bytes` without the `removed` segments, inserting `segment` at
/// `insert_at` (an offset outside every removed range).
fn splice(bytes: &[u8], removed: &[Segment], insert_at: usize, segment: &[u8]) -> Vec<u8> {
    let removed_len: usize = removed.iter().map(|s| s.end - s.start).sum();
    let mut out = Vec::with_capacity(bytes.len() - removed_len + segment.len());
    let mut cursor = 0;
    let mut inserted = false;

    for seg in removed {
        if !inserted && insert_at <= seg.start {
            out.extend_from_slice(&bytes[cursor..insert_at]);
            out.extend_from_slice(segment);
            cursor = insert_at;
            inserted = true;
        }
        out.extend_from_slice(&bytes[cursor..seg.start]);
        cursor = seg.end;
    }
    if !inserted {
        out.extend_from_slice(&bytes[cursor..insert_at]);
        out.extend_from_slice(segment);
        cursor = insert_at;
    }
    out.extend_from_slice(&bytes[cursor..]);
    out
}

/// Replace any EXIF APP1 segment with `exif_segment`, placed after a leading
/// APP0 when there is one, otherwise right after SOI.
fn splice_exif(bytes: &[u8], exif_segment: &[u8]) -> Result<Vec<u8>> {
    let segments = header_segments(bytes)?;
    let insert_at = match segments.first() {
        Some(first) if first.marker == MARKER_APP0 => first.end,
        _ => SOI.len(),
    };
    let stale: Vec<Segment> = segments
        .into_iter()
        .filter(|s| s.is_app1_with(bytes, EXIF_HEADER))
        .collect();
    Ok(splice(bytes, &stale, insert_at, exif_segment))
}

/// Replace any XMP APP1 segment with a new one directly after SOI.
fn splice_xmp(bytes: &[u8], xmp: &str) -> Result<Vec<u8>> {
    let segment = app1_segment(XMP_HEADER, xmp.as_bytes())?;
    let stale: Vec<Segment> = header_segments(bytes)?
        .into_iter()
        .filter(|s| s.is_app1_with(bytes, XMP_HEADER))
        .collect();
    Ok(splice(bytes, &stale, SOI.len(), &segment))
}
