//! MIME type detection from magic bytes

use std::path::Path;

use tokio::io::AsyncReadExt;

pub const PDF_MIME: &str = "application/pdf";

/// Image types the OCR engines accept
pub const SUPPORTED_IMAGE_MIMES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/tiff",
    "image/bmp",
];

/// Bytes inspected when sniffing; PDF allows junk before the `%PDF-` header.
const SNIFF_WINDOW: usize = 1024;

/// Broad media category driving the extraction path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Pdf,
    Image,
}

impl MediaKind {
    pub fn classify(mime_type: &str) -> Option<Self> {
        let mime = normalize(mime_type);
        if mime == PDF_MIME {
            Some(Self::Pdf)
        } else if SUPPORTED_IMAGE_MIMES.contains(&mime.as_str()) {
            Some(Self::Image)
        } else {
            None
        }
    }
}

/// Strip parameters and case from a content type (`Image/JPEG; q=1` -> `image/jpeg`).
pub fn normalize(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Detect the MIME type of `bytes` from its signature.
pub fn sniff_bytes(bytes: &[u8]) -> Option<&'static str> {
    let window = &bytes[..bytes.len().min(SNIFF_WINDOW)];
    if window.windows(5).any(|w| w == b"%PDF-") {
        return Some(PDF_MIME);
    }

    image::guess_format(window)
        .ok()
        .map(|format| format.to_mime_type())
}

/// Detect the MIME type of a stored file from its leading bytes.
pub async fn sniff_file(path: &Path) -> std::io::Result<Option<&'static str>> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(SNIFF_WINDOW);
    file.take(SNIFF_WINDOW as u64).read_to_end(&mut head).await?;
    Ok(sniff_bytes(&head))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const JPEG_HEADER: &[u8] = b"\xFF\xD8\xFF\xE0\0\x10JFIF\0";

    #[test]
    fn test_sniff_signatures() {
        assert_eq!(sniff_bytes(b"%PDF-1.7\n%\xE2\xE3"), Some(PDF_MIME));
        assert_eq!(sniff_bytes(b"\r\n%PDF-1.4"), Some(PDF_MIME));
        assert_eq!(sniff_bytes(PNG_HEADER), Some("image/png"));
        assert_eq!(sniff_bytes(JPEG_HEADER), Some("image/jpeg"));
        assert_eq!(sniff_bytes(b"hello world"), None);
        assert_eq!(sniff_bytes(b""), None);
    }

    #[test]
    fn test_classify() {
        assert_eq!(MediaKind::classify("application/pdf"), Some(MediaKind::Pdf));
        assert_eq!(MediaKind::classify("Image/JPEG; charset=binary"), Some(MediaKind::Image));
        assert_eq!(MediaKind::classify("image/webp"), Some(MediaKind::Image));
        assert_eq!(MediaKind::classify("image/gif"), None);
        assert_eq!(MediaKind::classify("text/plain"), None);
    }

    #[tokio::test]
    async fn test_sniff_file_matches_sniff_bytes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("upload.bin");
        tokio::fs::write(&path, PNG_HEADER).await.unwrap();

        assert_eq!(sniff_file(&path).await.unwrap(), sniff_bytes(PNG_HEADER));
    }
}
