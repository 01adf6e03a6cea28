//! Output file names derived from user-supplied titles.

/// Characters rejected by Windows file systems.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Returns a file name stem that is safe on every common file system.
///
/// Leading and trailing whitespace is trimmed, inner spaces become `_`,
/// control characters are dropped and `<>:"/\|?*` become `_`. Trailing dots
/// and spaces are trimmed, and reserved device names such as `CON` or
/// `com1.txt` get a `_` prefix. Never returns an empty string.
///
/// ```
/// use segment_fetch::sanitize_filename;
///
/// assert_eq!(sanitize_filename("  Intro: Part 1?  "), "Intro__Part_1_");
/// assert_eq!(sanitize_filename("nul"), "_nul");
/// assert_eq!(sanitize_filename("..."), "unnamed");
/// ```
#[must_use]
pub fn sanitize_filename(title: &str) -> String {
    let sanitized: String = title
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            ' ' => '_',
            c if INVALID_CHARS.contains(&c) => '_',
            c => c,
        })
        .collect();

    let sanitized = sanitized.trim_end_matches(['.', ' ']);
    if sanitized.is_empty() {
        return "unnamed".to_string();
    }

    if is_reserved_device_name(sanitized) {
        format!("_{sanitized}")
    } else {
        sanitized.to_string()
    }
}

/// True for `CON`, `PRN`, `AUX`, `NUL`, `COM1`-`COM9` and `LPT1`-`LPT9`,
/// case-insensitively and with or without an extension.
fn is_reserved_device_name(name: &str) -> bool {
    let stem = name.split_once('.').map_or(name, |(stem, _)| stem);
    let upper = stem.to_ascii_uppercase();
    match upper.as_str() {
        "CON" | "PRN" | "AUX" | "NUL" => true,
        _ => {
            let bytes = upper.as_bytes();
            bytes.len() == 4
                && (upper.starts_with("COM") || upper.starts_with("LPT"))
                && matches!(bytes[3], b'1'..=b'9')
        }
    }
}
