//! Content type detection from a file's leading bytes.

/// Best guess MIME type for `head`, or `None` if nothing matches.
///
/// `head` is normally the first `SNIFF_LEN` bytes of the file.
pub fn sniff_content_type(head: &[u8]) -> Option<&'static str> {
    infer::get(head).map(|kind| kind.mime_type())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_types() {
        assert_eq!(sniff_content_type(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"), Some("image/png"));
        assert_eq!(sniff_content_type(b"%PDF-1.7\n"), Some("application/pdf"));
        assert_eq!(sniff_content_type(b"\x1f\x8b\x08\x00"), Some("application/gzip"));
        assert_eq!(sniff_content_type(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
    }

    #[test]
    fn detects_formats_without_a_leading_tag() {
        // MPEG frame sync with no ID3 block in front
        assert_eq!(sniff_content_type(b"\xff\xfb\x90\x64\0\0\0\0"), Some("audio/mpeg"));
        let font = sniff_content_type(b"wOF2\x00\x01\x00\x00\0\0\0\0").unwrap();
        assert!(font.contains("woff"), "{font}");
    }

    #[test]
    fn webm_is_not_reported_as_matroska() {
        let mut head = b"\x1a\x45\xdf\xa3\x9f\x42\x86\x81\x01\x42\xf7\x81\x01\x42\xf2\x81\x04\x42\xf3\x81\x08\x42\x82\x84webm\x42\x87\x81\x04\x42\x85\x81\x02".to_vec();
        head.resize(64, 0);
        assert_eq!(sniff_content_type(&head), Some("video/webm"));
    }

    #[test]
    fn plain_text_and_empty_are_unknown() {
        assert_eq!(sniff_content_type(b"hello world\n"), None);
        assert_eq!(sniff_content_type(b""), None);
    }
}
