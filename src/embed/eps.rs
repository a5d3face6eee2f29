use super::Injection;
use crate::record::MetadataRecord;
use crate::scan;
use crate::xmp::generate_xmp_packet;

const END_COMMENTS: &[u8] = b"%%EndComments";
const BEGIN_PACKET: &[u8] = b"%begin_xml_packet:";
const END_PACKET: &[u8] = b"%end_xml_packet";
const PS_ADOBE: &[u8] = b"%!PS-Adobe";
/// How far into the file the `%!PS-Adobe` header may start.
const HEADER_SEARCH_LIMIT: usize = 1024;
/// How far past the header token to look for its line terminator.
const LINE_END_WINDOW: usize = 256;

/// Where the comment block goes and whether it needs a newline in front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InsertPoint {
    offset: usize,
    leading_newline: bool,
}

/// Embed `record` into an EPS file as a `%`-prefixed XMP comment block.
///
/// Works on raw bytes throughout; EPS files often carry binary previews.
/// A block left by an earlier embed is removed first, so re-embedding
/// replaces the packet. Insertion never fails, so the result is always
/// [`Injection::Embedded`].
pub fn embed_eps(bytes: &[u8], record: &MetadataRecord) -> Injection {
    let xmp = generate_xmp_packet(record, "application/postscript");
    let stripped = strip_packet_blocks(bytes);
    let bytes = stripped.as_slice();
    let point = insertion_point(bytes);
    let block = comment_block(&xmp, point.leading_newline);

    log::debug!("  EPS comment block at offset {} ({} bytes)", point.offset, block.len());

    let mut out = Vec::with_capacity(bytes.len() + block.len());
    out.extend_from_slice(&bytes[..point.offset]);
    out.extend_from_slice(&block);
    out.extend_from_slice(&bytes[point.offset..]);
    Injection::Embedded(out)
}

fn insertion_point(bytes: &[u8]) -> InsertPoint {
    if let Some(i) = scan::find(bytes, END_COMMENTS, None) {
        return InsertPoint { offset: i + END_COMMENTS.len(), leading_newline: true };
    }

    let Some(header) = scan::find(bytes, PS_ADOBE, Some(HEADER_SEARCH_LIMIT)) else {
        log::debug!("  No PostScript header found, inserting at start of file");
        return InsertPoint { offset: 0, leading_newline: false };
    };

    let token_end = header + PS_ADOBE.len();
    match line_end_after(bytes, token_end) {
        Some(offset) => InsertPoint { offset, leading_newline: false },
        None => InsertPoint { offset: token_end, leading_newline: true },
    }
}

/// Offset just past the first `\n`, `\r` or `\r\n` within the window after
/// `from`.
fn line_end_after(bytes: &[u8], from: usize) -> Option<usize> {
    let window_end = bytes.len().min(from + LINE_END_WINDOW);
    let rel = bytes[from..window_end].iter().position(|&b| b == b'\n' || b == b'\r')?;
    let at = from + rel;
    if bytes[at] == b'\r' && bytes.get(at + 1) == Some(&b'\n') {
        Some(at + 2)
    } else {
        Some(at + 1)
    }
}

/// Remove every complete `%begin_xml_packet:` .. `%end_xml_packet` block,
/// along with its line terminator and the newline put in front of it after
/// `%%EndComments`. An unterminated block is left alone.
fn strip_packet_blocks(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut pos = 0;
    while let Some(begin) = scan::find_from(bytes, BEGIN_PACKET, pos) {
        let Some(end) = scan::find_from(bytes, END_PACKET, begin) else {
            break;
        };
        let mut start = begin;
        if start > pos
            && bytes[start - 1] == b'\n'
            && bytes[..start - 1].ends_with(END_COMMENTS)
        {
            start -= 1;
        }
        let stop = skip_line_end(bytes, end + END_PACKET.len());

        log::debug!("  Removing existing EPS packet block at offset {start}");
        out.extend_from_slice(&bytes[pos..start]);
        pos = stop;
    }
    out.extend_from_slice(&bytes[pos..]);
    out
}

/// Step over one `\n`, `\r` or `\r\n` at `at`, if present.
fn skip_line_end(bytes: &[u8], at: usize) -> usize {
    match (bytes.get(at), bytes.get(at + 1)) {
        (Some(b'\r'), Some(b'\n')) => at + 2,
        (Some(b'\r' | b'\n'), _) => at + 1,
        _ => at,
    }
}

/// Lines as PostScript sees them: `lines()` plus lone `\r` and form feed.
fn ps_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().flat_map(|l| l.split(['\r', '\x0c']))
}

fn comment_block(xmp: &str, leading_newline: bool) -> Vec<u8> {
    let mut block = String::with_capacity(xmp.len() + 128);
    if leading_newline {
        block.push('\n');
    }
    block.push_str(&format!("%begin_xml_packet: {}\n", xmp.len()));
    for line in ps_lines(xmp) {
        block.push_str("% ");
        block.push_str(line);
        block.push('\n');
    }
    block.push_str("%end_xml_packet\n");
    block.into_bytes()
}
