//! Content-type detection from leading bytes and file names

/// Magic-number signatures, checked in order
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\xFF\xD8\xFF", "image/jpeg"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"\x1A\x45\xDF\xA3", "video/webm"),
];

/// Sniff a content type from the first bytes of a payload
pub fn sniff_content_type(bytes: &[u8]) -> Option<&'static str> {
    if let Some((_, mime)) = SIGNATURES.iter().find(|(magic, _)| bytes.starts_with(magic)) {
        return Some(*mime);
    }

    // RIFF containers: WEBP images
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }

    // ISO base media: `....ftyp<brand>`
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        return Some(match &bytes[8..12] {
            b"heic" | b"heix" | b"mif1" | b"msf1" => "image/heic",
            b"avif" => "image/avif",
            b"qt  " => "video/quicktime",
            _ => "video/mp4",
        });
    }

    None
}

/// Content type from bytes first, then the file name, then a generic fallback
pub fn content_type_for(bytes: &[u8], file_name: Option<&str>) -> String {
    if let Some(mime) = sniff_content_type(bytes) {
        return mime.to_string();
    }
    file_name
        .and_then(|name| mime_guess::from_path(name).first())
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Preferred file extension for a content type
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    match essence {
        "image/jpeg" => Some("jpg"),
        "video/mp4" => Some("mp4"),
        "video/quicktime" => Some("mov"),
        _ => mime_guess::get_mime_extensions_str(essence).and_then(|exts| exts.first().copied()),
    }
}
