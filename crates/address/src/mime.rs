//! MIME classification.
//!
//! Classification follows a fixed order:
//! 1. content signature (magic bytes),
//! 2. file extension, but only for text formats,
//! 3. the content type the caller declared,
//! 4. [`OCTET_STREAM`].
//!
//! Extensions are only trusted for text because a binary format worth
//! trusting has magic bytes, and a mislabelled binary served as text is
//! worse than a text file served as a download.

use std::path::Path;

/// Last-resort content type.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Magic bytes at a fixed offset.
type Part = (usize, &'static [u8]);

/// All parts must match for the signature to match.
const SIGNATURES: &[(&[Part], &str)] = &[
    (&[(0, b"\x89PNG\r\n\x1A\n")], "image/png"),
    (&[(0, b"\xFF\xD8\xFF")], "image/jpeg"),
    (&[(0, b"GIF87a")], "image/gif"),
    (&[(0, b"GIF89a")], "image/gif"),
    (&[(0, b"RIFF"), (8, b"WEBP")], "image/webp"),
    (&[(0, b"BM")], "image/bmp"),
    (&[(0, b"II*\0")], "image/tiff"),
    (&[(0, b"MM\0*")], "image/tiff"),
    (&[(0, b"\0\0\x01\0")], "image/x-icon"),
    (&[(0, b"%PDF-")], "application/pdf"),
    (&[(0, b"%!PS-Adobe-")], "application/postscript"),
    (&[(0, b"PK\x03\x04")], "application/zip"),
    (&[(0, b"\x1F\x8B\x08")], "application/gzip"),
    (&[(0, b"BZh")], "application/x-bzip2"),
    (&[(0, b"\xFD7zXZ\0")], "application/x-xz"),
    (&[(0, b"\x28\xB5\x2F\xFD")], "application/zstd"),
    (&[(0, b"7z\xBC\xAF\x27\x1C")], "application/x-7z-compressed"),
    (&[(0, b"Rar!\x1A\x07")], "application/vnd.rar"),
    (&[(257, b"ustar")], "application/x-tar"),
    (&[(0, b"RIFF"), (8, b"WAVE")], "audio/wav"),
    (&[(0, b"RIFF"), (8, b"AVI ")], "video/x-msvideo"),
    (&[(0, b"ID3")], "audio/mpeg"),
    (&[(0, b"OggS\0")], "application/ogg"),
    (&[(0, b"fLaC")], "audio/flac"),
    (&[(4, b"ftyp")], "video/mp4"),
    (&[(0, b"\x1A\x45\xDF\xA3")], "video/webm"),
    (&[(0, b"\0asm")], "application/wasm"),
    (&[(0, b"\x7FELF")], "application/x-elf"),
    (&[(0, b"SQLite format 3\0")], "application/vnd.sqlite3"),
    (&[(0, b"<?xml")], "text/xml"),
];

/// Prefixes that identify HTML, compared case-insensitively after leading
/// whitespace.
const HTML_PREFIXES: &[&[u8]] = &[b"<!doctype html", b"<html"];

/// Non-`text/*` types that are still text.
const TEXTUAL: &[&str] = &[
    "application/json",
    "application/xml",
    "application/javascript",
    "application/x-javascript",
    "application/yaml",
    "application/x-yaml",
    "application/toml",
];

/// Detect a content type from magic bytes alone.
///
/// # Examples
///
/// ```
/// assert_eq!(cairn_address::sniff(b"%PDF-1.7\n"), Some("application/pdf"));
/// assert_eq!(cairn_address::sniff(b"hello"), None);
/// ```
#[must_use]
pub fn sniff(bytes: &[u8]) -> Option<&'static str> {
    let matches = |parts: &[Part]| {
        parts
            .iter()
            .all(|(offset, magic)| bytes.get(*offset..offset + magic.len()) == Some(*magic))
    };
    if let Some((_, mime)) = SIGNATURES.iter().find(|(parts, _)| matches(parts)) {
        return Some(mime);
    }
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let trimmed = &bytes[start..];
    HTML_PREFIXES
        .iter()
        .any(|prefix| trimmed.get(..prefix.len()).is_some_and(|head| head.eq_ignore_ascii_case(prefix)))
        .then_some("text/html")
}

/// Content type guessed from the file name, restricted to text formats.
fn from_extension(file_name: &str) -> Option<String> {
    let guess = mime_guess::from_path(Path::new(file_name)).first()?;
    is_textual(guess.essence_str()).then(|| guess.essence_str().to_string())
}

/// Classify a payload, see the module documentation for the order.
///
/// # Examples
///
/// ```
/// use cairn_address::classify;
///
/// assert_eq!(classify(b"\x89PNG\r\n\x1A\n....", "photo.txt", None), "image/png");
/// assert_eq!(classify(b"# Notes", "notes.txt", Some("application/pdf")), "text/plain");
/// assert_eq!(classify(b"\x00\x01", "blob", Some("application/x-thing")), "application/x-thing");
/// assert_eq!(classify(b"\x00\x01", "blob", None), "application/octet-stream");
/// ```
#[must_use]
pub fn classify(bytes: &[u8], file_name: &str, declared: Option<&str>) -> String {
    if let Some(mime) = sniff(bytes) {
        return mime.to_string();
    }
    if let Some(mime) = from_extension(file_name) {
        return mime;
    }
    declared
        .map(str::trim)
        .filter(|declared| !declared.is_empty())
        .unwrap_or(OCTET_STREAM)
        .to_string()
}

/// Whether a content type denotes human-readable text (parameters such as
/// `charset` are ignored).
#[must_use]
pub fn is_textual(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    essence.starts_with("text/")
        || essence.ends_with("+json")
        || essence.ends_with("+xml")
        || TEXTUAL.contains(&essence.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn tar_header() -> Vec<u8> {
        let mut header = vec![0u8; 512];
        header[..8].copy_from_slice(b"file.txt");
        header[257..262].copy_from_slice(b"ustar");
        header
    }

    #[rstest]
    #[case(b"\x89PNG\r\n\x1A\n\0\0\0\rIHDR", "image/png")]
    #[case(b"\xFF\xD8\xFF\xE0\0\x10JFIF", "image/jpeg")]
    #[case(b"GIF89a\x01\0\x01\0", "image/gif")]
    #[case(b"RIFF\x24\0\0\0WEBPVP8 ", "image/webp")]
    #[case(b"RIFF\x24\0\0\0WAVEfmt ", "audio/wav")]
    #[case(b"RIFF\x24\0\0\0AVI LIST", "video/x-msvideo")]
    #[case(b"%PDF-1.4\n", "application/pdf")]
    #[case(b"PK\x03\x04\x14\0", "application/zip")]
    #[case(b"\x1F\x8B\x08\0\0\0", "application/gzip")]
    #[case(b"\x28\xB5\x2F\xFD\x04", "application/zstd")]
    #[case(b"ID3\x04\0\0", "audio/mpeg")]
    #[case(b"\0\0\0\x20ftypisom", "video/mp4")]
    #[case(b"\0asm\x01\0\0\0", "application/wasm")]
    #[case(b"\x7FELF\x02\x01\x01", "application/x-elf")]
    #[case(b"SQLite format 3\0\x10\0", "application/vnd.sqlite3")]
    #[case(b"<?xml version=\"1.0\"?><a/>", "text/xml")]
    #[case(b"<!DOCTYPE html><html></html>", "text/html")]
    #[case(b"\n\t  <HTML lang=\"en\">", "text/html")]
    fn test_sniff(#[case] bytes: &[u8], #[case] expected: &str) {
        assert_eq!(sniff(bytes), Some(expected));
    }

    #[test]
    fn test_sniff_tar_at_offset() {
        assert_eq!(sniff(&tar_header()), Some("application/x-tar"));
        // Too short to reach the ustar marker.
        assert_eq!(sniff(&tar_header()[..260]), None);
    }

    #[rstest]
    #[case(b"")]
    #[case(b"hello")]
    #[case(b"RIFF\x24\0\0\0XXXX")]
    #[case(b"<htm")]
    #[case(b"\x89PN")]
    fn test_sniff_unknown(#[case] bytes: &[u8]) {
        assert_eq!(sniff(bytes), None);
    }

    #[test]
    fn test_signature_beats_extension_and_declared() {
        assert_eq!(classify(b"%PDF-1.4", "readme.txt", Some("text/plain")), "application/pdf");
    }

    #[rstest]
    #[case("notes.txt", "text/plain")]
    #[case("data.json", "application/json")]
    #[case("style.css", "text/css")]
    fn test_textual_extension(#[case] file_name: &str, #[case] expected: &str) {
        assert_eq!(classify(b"just some text", file_name, Some("application/x-declared")), expected);
    }

    #[test]
    fn test_binary_extension_is_not_trusted() {
        // No magic bytes, so the ".png" name alone doesn't make it an image.
        assert_eq!(classify(b"not an image", "fake.png", None), OCTET_STREAM);
        assert_eq!(classify(b"not an image", "fake.png", Some("image/png")), "image/png");
    }

    #[rstest]
    #[case(Some("  application/x-custom  "), "application/x-custom")]
    #[case(Some("   "), OCTET_STREAM)]
    #[case(Some(""), OCTET_STREAM)]
    #[case(None, OCTET_STREAM)]
    fn test_declared_fallback(#[case] declared: Option<&str>, #[case] expected: &str) {
        assert_eq!(classify(b"\x00\x01\x02", "no-extension", declared), expected);
    }

    #[rstest]
    #[case("text/plain", true)]
    #[case("text/markdown; charset=utf-8", true)]
    #[case("application/json", true)]
    #[case("application/ld+json", true)]
    #[case("image/svg+xml", true)]
    #[case("APPLICATION/XML", true)]
    #[case("application/pdf", false)]
    #[case("application/octet-stream", false)]
    #[case("", false)]
    fn test_is_textual(#[case] content_type: &str, #[case] expected: bool) {
        assert_eq!(is_textual(content_type), expected);
    }
}
