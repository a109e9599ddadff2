//! Filename helpers
//!
//! Project ids and stored filenames are restricted to ASCII so they are safe in
//! URLs and on every filesystem.

/// Split `name` into (stem, extension-with-dot)
///
/// A leading dot does not start an extension (".hidden" has none).
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    }
}

/// First `length` ASCII alphanumerics of `text`, or "xx" if there are none
pub fn ascii_prefix(text: &str, length: usize) -> String {
    let prefix: String = text
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(length)
        .collect();
    if prefix.is_empty() {
        "xx".to_string()
    } else {
        prefix
    }
}

/// Keep only ASCII alphanumerics, `_` and `-` in the name, preserving the extension
///
/// Directory components are discarded. Falls back to "file" when nothing survives.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    let (stem, ext) = split_extension(base);

    let mut sanitized: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if sanitized.is_empty() {
        sanitized = "file".to_string();
    }

    let ext: String = ext
        .chars()
        .skip(1)
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if !ext.is_empty() {
        sanitized.push('.');
        sanitized.push_str(&ext);
    }
    sanitized
}
