//! XMP packet generation.
//!
//! Every injector embeds the same packet; only the container around it
//! differs. The packet is a pure function of the record and the target MIME
//! type.

use crate::record::MetadataRecord;

/// Opening processing instruction. The `begin` attribute carries a BOM.
pub const XPACKET_BEGIN: &str = "<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>";
/// Closing processing instruction (writable packet).
pub const XPACKET_END: &str = "<?xpacket end=\"w\"?>";

/// Render `record` as a complete XMP packet.
///
/// Contains `dc:format`, `dc:title`, `dc:description`, `dc:subject` (keywords
/// in order) and `photoshop:Headline`. Text is escaped with [`xml_escape`];
/// an embedded `?>` in the metadata is not sanitised.
///
/// ```rust
/// use stockmeta::record::MetadataRecord;
/// use stockmeta::xmp::generate_xmp_packet;
///
/// let record = MetadataRecord::new("Fish & Chips", "Lunch", ["food"]);
/// let xmp = generate_xmp_packet(&record, "image/jpeg");
/// assert!(xmp.contains("Fish &amp; Chips"));
/// assert!(xmp.ends_with("<?xpacket end=\"w\"?>"));
/// ```
pub fn generate_xmp_packet(record: &MetadataRecord, mime_type: &str) -> String {
    let title = xml_escape(&record.title);
    let description = xml_escape(&record.description);

    let mut xmp = String::new();
    xmp.push_str(XPACKET_BEGIN);
    xmp.push('\n');
    xmp.push_str("<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n");
    xmp.push_str("<rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">\n");
    xmp.push_str("<rdf:Description rdf:about=\"\"\n");
    xmp.push_str("  xmlns:dc=\"http://purl.org/dc/elements/1.1/\"\n");
    xmp.push_str("  xmlns:photoshop=\"http://ns.adobe.com/photoshop/1.0/\">\n");

    xmp.push_str(&format!("  <dc:format>{}</dc:format>\n", xml_escape(mime_type)));
    xmp.push_str(&format!(
        "  <dc:title><rdf:Alt><rdf:li xml:lang=\"x-default\">{title}</rdf:li></rdf:Alt></dc:title>\n"
    ));
    xmp.push_str(&format!(
        "  <dc:description><rdf:Alt><rdf:li xml:lang=\"x-default\">{description}</rdf:li></rdf:Alt></dc:description>\n"
    ));

    xmp.push_str("  <dc:subject><rdf:Bag>\n");
    for k in &record.keywords {
        xmp.push_str(&format!("    <rdf:li>{}</rdf:li>\n", xml_escape(k)));
    }
    xmp.push_str("  </rdf:Bag></dc:subject>\n");

    xmp.push_str(&format!("  <photoshop:Headline>{title}</photoshop:Headline>\n"));

    xmp.push_str("</rdf:Description>\n");
    xmp.push_str("</rdf:RDF>\n");
    xmp.push_str("</x:xmpmeta>\n");
    xmp.push_str(XPACKET_END);
    xmp
}

/// Escape `&`, `<` and `>`. Quotes are left as-is: values only ever land in
/// element content, never in attributes.
pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Inverse of [`xml_escape`].
pub fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MetadataRecord {
        MetadataRecord::new(
            "City skyline at dusk",
            "A calm evening view",
            ["city", "skyline", "dusk"],
        )
    }

    // ── xml_escape ───────────────────────────────────────────────────

    #[test]
    fn escape_markup_characters() {
        assert_eq!(xml_escape("a & b <c> d"), "a &amp; b &lt;c&gt; d");
    }

    #[test]
    fn escape_leaves_quotes_alone() {
        assert_eq!(xml_escape(r#"say "hi" it's"#), r#"say "hi" it's"#);
    }

    #[test]
    fn escape_ampersand_first() {
        // "&lt;" in the input must not become "&lt;" after unescape of "<".
        assert_eq!(xml_escape("&lt;"), "&amp;lt;");
        assert_eq!(xml_unescape(&xml_escape("&lt; <")), "&lt; <");
    }

    // ── generate_xmp_packet ──────────────────────────────────────────

    #[test]
    fn packet_is_wrapped_in_xpacket() {
        let xmp = generate_xmp_packet(&sample(), "image/png");
        assert!(xmp.starts_with("<?xpacket begin=\"\u{feff}\""));
        assert!(xmp.ends_with(XPACKET_END));
    }

    #[test]
    fn packet_contains_all_fields() {
        let xmp = generate_xmp_packet(&sample(), "image/png");
        assert!(xmp.contains("<dc:format>image/png</dc:format>"));
        assert!(xmp.contains(">City skyline at dusk</rdf:li></rdf:Alt></dc:title>"));
        assert!(xmp.contains(">A calm evening view</rdf:li></rdf:Alt></dc:description>"));
        assert!(xmp.contains("<photoshop:Headline>City skyline at dusk</photoshop:Headline>"));
    }

    #[test]
    fn packet_keeps_keyword_order() {
        let xmp = generate_xmp_packet(&sample(), "image/jpeg");
        let city = xmp.find("<rdf:li>city</rdf:li>").unwrap();
        let skyline = xmp.find("<rdf:li>skyline</rdf:li>").unwrap();
        let dusk = xmp.find("<rdf:li>dusk</rdf:li>").unwrap();
        assert!(city < skyline && skyline < dusk);
    }

    #[test]
    fn packet_escapes_metadata() {
        let record = MetadataRecord::new("<b>Bold</b>", "R&D", ["a<b"]);
        let xmp = generate_xmp_packet(&record, "image/jpeg");
        assert!(xmp.contains("&lt;b&gt;Bold&lt;/b&gt;"));
        assert!(xmp.contains("R&amp;D"));
        assert!(xmp.contains("<rdf:li>a&lt;b</rdf:li>"));
        assert!(!xmp.contains("<b>"));
    }

    #[test]
    fn packet_is_deterministic() {
        assert_eq!(
            generate_xmp_packet(&sample(), "video/mp4"),
            generate_xmp_packet(&sample(), "video/mp4")
        );
    }

    #[test]
    fn packet_with_no_keywords_has_empty_bag() {
        let record = MetadataRecord::new("t", "d", Vec::<String>::new());
        let xmp = generate_xmp_packet(&record, "image/jpeg");
        assert!(xmp.contains("<dc:subject><rdf:Bag>\n  </rdf:Bag></dc:subject>"));
    }
}
