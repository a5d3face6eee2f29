use anyhow::Result;
use std::ops::Range;

use super::{Injection, PassThroughReason};
use crate::crc::Crc32;
use crate::record::MetadataRecord;
use crate::xmp::generate_xmp_packet;

const PNG_SIGNATURE_LEN: usize = 8;
const CHUNK_LENGTH_LEN: usize = 4;
const CHUNK_TYPE_LEN: usize = 4;
const IHDR_DATA_LEN: usize = 13;
const CHUNK_CRC_LEN: usize = 4;

/// Where the XMP chunk goes: right after IHDR, which PNG requires to be the
/// first chunk and to carry exactly 13 bytes of data.
pub const PNG_XMP_OFFSET: usize =
    PNG_SIGNATURE_LEN + CHUNK_LENGTH_LEN + CHUNK_TYPE_LEN + IHDR_DATA_LEN + CHUNK_CRC_LEN;

const SIGNATURE_PREFIX: [u8; 2] = [0x89, 0x50];
const ITXT: &[u8; 4] = b"iTXt";
pub(crate) const XMP_KEYWORD: &[u8] = b"XML:com.adobe.xmp";

/// Embed `record` into a PNG as an uncompressed `iTXt` XMP chunk directly
/// after IHDR. Earlier XMP `iTXt` chunks are dropped.
///
/// A buffer that does not start with the PNG signature, or is too short to
/// hold IHDR, is returned unchanged.
pub fn embed_png(bytes: &[u8], record: &MetadataRecord) -> Injection {
    if bytes.len() < PNG_XMP_OFFSET || !bytes.starts_with(&SIGNATURE_PREFIX) {
        return Injection::pass_through(
            bytes,
            PassThroughReason::MalformedContainer("missing PNG signature or IHDR".into()),
        );
    }

    let xmp = generate_xmp_packet(record, "image/png");
    let chunk = match build_itxt_chunk(xmp.as_bytes()) {
        Ok(c) => c,
        Err(e) => return Injection::pass_through(bytes, PassThroughReason::InjectionFailure(format!("{e:#}"))),
    };

    let stale = stale_xmp_chunks(bytes);
    if !stale.is_empty() {
        log::debug!("  Replacing {} existing XMP iTXt chunk(s)", stale.len());
    }

    let removed: usize = stale.iter().map(|r| r.len()).sum();
    let mut out = Vec::with_capacity(bytes.len() + chunk.len() - removed);
    out.extend_from_slice(&bytes[..PNG_XMP_OFFSET]);
    out.extend_from_slice(&chunk);
    let mut cursor = PNG_XMP_OFFSET;
    for range in stale {
        out.extend_from_slice(&bytes[cursor..range.start]);
        cursor = range.end;
    }
    out.extend_from_slice(&bytes[cursor..]);

    log::debug!("  iTXt chunk inserted at offset {PNG_XMP_OFFSET} ({} bytes)", chunk.len());
    Injection::Embedded(out)
}

/// `[length][iTXt][keyword\0 0 0 \0 \0 xmp][crc]`.
fn build_itxt_chunk(xmp: &[u8]) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(XMP_KEYWORD.len() + 5 + xmp.len());
    data.extend_from_slice(XMP_KEYWORD);
    data.push(0); // keyword terminator
    data.push(0); // compression flag: uncompressed
    data.push(0); // compression method
    data.push(0); // empty language tag
    data.push(0); // empty translated keyword
    data.extend_from_slice(xmp);

    // PNG limits chunk lengths to 2^31 - 1.
    let length = u32::try_from(data.len())
        .ok()
        .filter(|&l| l <= i32::MAX as u32)
        .ok_or_else(|| anyhow::anyhow!("iTXt chunk of {} bytes is too large", data.len()))?;

    let mut crc = Crc32::new();
    crc.update(ITXT);
    crc.update(&data);

    let mut chunk = Vec::with_capacity(data.len() + CHUNK_LENGTH_LEN + CHUNK_TYPE_LEN + CHUNK_CRC_LEN);
    chunk.extend_from_slice(&length.to_be_bytes());
    chunk.extend_from_slice(ITXT);
    chunk.extend_from_slice(&data);
    chunk.extend_from_slice(&crc.finalize().to_be_bytes());
    Ok(chunk)
}

/// Byte ranges of existing XMP `iTXt` chunks after IHDR.
///
/// Stops at IEND or at the first chunk whose length runs past the buffer;
/// anything beyond that point is left alone.
fn stale_xmp_chunks(bytes: &[u8]) -> Vec<Range<usize>> {
    let mut stale = Vec::new();
    let mut pos = PNG_XMP_OFFSET;

    while pos + CHUNK_LENGTH_LEN + CHUNK_TYPE_LEN <= bytes.len() {
        let length = u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]) as usize;
        let kind = &bytes[pos + 4..pos + 8];
        let data_start = pos + CHUNK_LENGTH_LEN + CHUNK_TYPE_LEN;
        let Some(end) = data_start
            .checked_add(length)
            .and_then(|e| e.checked_add(CHUNK_CRC_LEN))
            .filter(|&e| e <= bytes.len())
        else {
            break;
        };

        if kind == ITXT && is_xmp_itxt(&bytes[data_start..data_start + length]) {
            stale.push(pos..end);
        }
        if kind == b"IEND" {
            break;
        }
        pos = end;
    }

    stale
}

pub(crate) fn is_xmp_itxt(data: &[u8]) -> bool {
    data.len() > XMP_KEYWORD.len() && data.starts_with(XMP_KEYWORD) && data[XMP_KEYWORD.len()] == 0
}
