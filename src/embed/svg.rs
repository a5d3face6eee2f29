use super::{Injection, PassThroughReason};
use crate::record::MetadataRecord;
use crate::xmp::generate_xmp_packet;

const METADATA_OPEN: &str = "<metadata";
const METADATA_CLOSE: &str = "</metadata>";
const SVG_CLOSE: &str = "</svg>";

/// Embed `record` into an SVG document's `<metadata>` element.
///
/// The first existing `<metadata>` element has its contents replaced;
/// otherwise a new element is inserted before the closing `</svg>`. A
/// document with neither gets the packet appended.
pub fn embed_svg(bytes: &[u8], record: &MetadataRecord) -> Injection {
    let text = match std::str::from_utf8(bytes) {
        Ok(t) => t,
        Err(e) => {
            return Injection::pass_through(
                bytes,
                PassThroughReason::InjectionFailure(format!("SVG is not valid UTF-8: {e}")),
            );
        }
    };

    let xmp = generate_xmp_packet(record, "image/svg+xml");
    Injection::Embedded(patch_svg(text, &xmp).into_bytes())
}

fn patch_svg(text: &str, xmp: &str) -> String {
    if let Some(patched) = replace_metadata(text, xmp) {
        log::debug!("  Replaced existing <metadata> contents");
        return patched;
    }

    let element = format!("<metadata>{xmp}</metadata>");
    if let Some(pos) = text.rfind(SVG_CLOSE) {
        log::debug!("  Inserted <metadata> before </svg>");
        let mut out = String::with_capacity(text.len() + element.len());
        out.push_str(&text[..pos]);
        out.push_str(&element);
        out.push_str(&text[pos..]);
        return out;
    }

    log::debug!("  No </svg> found, appending XMP packet");
    let mut out = String::with_capacity(text.len() + xmp.len());
    out.push_str(text);
    out.push_str(xmp);
    out
}

/// Replace the contents of the first `<metadata>` element, keeping its
/// attributes. A self-closing `<metadata/>` is expanded.
fn replace_metadata(text: &str, xmp: &str) -> Option<String> {
    let start = find_metadata_open(text)?;
    let tag_end = start + text[start..].find('>')?;
    let self_closing = text[..tag_end].ends_with('/');

    let mut out = String::with_capacity(text.len() + xmp.len());
    if self_closing {
        out.push_str(&text[..tag_end - 1]);
        out.push('>');
        out.push_str(xmp);
        out.push_str(METADATA_CLOSE);
        out.push_str(&text[tag_end + 1..]);
    } else {
        let close = tag_end + text[tag_end..].find(METADATA_CLOSE)?;
        out.push_str(&text[..=tag_end]);
        out.push_str(xmp);
        out.push_str(&text[close..]);
    }
    Some(out)
}

/// Offset of a `<metadata` tag proper (not e.g. `<metadataFoo`).
fn find_metadata_open(text: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(i) = text[from..].find(METADATA_OPEN) {
        let at = from + i;
        let next = text[at + METADATA_OPEN.len()..].chars().next();
        if matches!(next, Some('>' | '/')) || next.is_some_and(char::is_whitespace) {
            return Some(at);
        }
        from = at + METADATA_OPEN.len();
    }
    None
}
