use anyhow::{Result, bail};

use crate::record::MetadataRecord;
use crate::xmp::generate_xmp_packet;

/// Adobe's XMP extended type, `BE7ACFCB-97A9-42E8-9C71-999491E3AFAC`.
pub const XMP_UUID: [u8; 16] = [
    0xBE, 0x7A, 0xCF, 0xCB, 0x97, 0xA9, 0x42, 0xE8, 0x9C, 0x71, 0x99, 0x94, 0x91, 0xE3, 0xAF, 0xAC,
];

const BOX_HEADER_LEN: usize = 4 + 4 + XMP_UUID.len();

/// Append a top-level `uuid` box holding the XMP packet.
///
/// Nothing already in the file is rewritten. Readers that only follow the
/// `moov` index will not see the box; tools that walk top-level boxes will.
pub fn embed_video(bytes: &[u8], record: &MetadataRecord, mime_type: &str) -> Result<Vec<u8>> {
    let xmp = generate_xmp_packet(record, mime_type);
    let total = BOX_HEADER_LEN + xmp.len();
    let Ok(size) = u32::try_from(total) else {
        bail!("uuid box of {total} bytes does not fit a 32-bit size field");
    };

    let mut out = Vec::with_capacity(bytes.len() + total);
    out.extend_from_slice(bytes);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(b"uuid");
    out.extend_from_slice(&XMP_UUID);
    out.extend_from_slice(xmp.as_bytes());

    log::debug!("  Appended {total}-byte uuid box after {} bytes", bytes.len());
    Ok(out)
}
