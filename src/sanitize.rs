use std::path::Path;

/// Characters rejected by at least one mainstream filesystem.
pub const FORBIDDEN_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Default byte budget for a generated file name.
pub const MAX_FILENAME_LEN: usize = 240;

/// Room kept free at the end of a truncated stem for a ` (n)` collision suffix.
const COLLISION_SUFFIX_RESERVE: usize = 6;
const MAX_EXTENSION_LEN: usize = 5;
const MAX_COLLISION_PROBES: u32 = 9_999;
const FALLBACK_NAME: &str = "untitled";

const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

/// Drops forbidden and control characters and collapses every whitespace run into one space.
/// Leading and trailing whitespace is removed as a side effect.
pub(crate) fn strip_and_collapse(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if ch.is_control() || FORBIDDEN_CHARS.contains(&ch) {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(ch);
    }
    out
}

pub(crate) fn trim_edges(text: &str) -> &str {
    text.trim_matches(|c| c == '.' || c == ' ')
}

pub(crate) fn truncate_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn split_extension(name: &str) -> Option<(&str, &str)> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty()
        || ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some((stem, ext))
}

/// Produces a file name that is safe on Windows, macOS and Linux and at most `max_length`
/// bytes long. Only the stem is shortened; a recognizable extension is kept intact.
pub fn sanitize(text: &str, max_length: usize) -> String {
    if max_length == 0 {
        return String::new();
    }

    let cleaned = strip_and_collapse(text);
    let cleaned = trim_edges(&cleaned);

    let (stem, extension) = match split_extension(cleaned) {
        Some((stem, ext)) if ext.len() + 2 <= max_length => (stem, Some(ext)),
        _ => (cleaned, None),
    };

    let suffix_len = extension.map_or(0, |ext| ext.len() + 1);
    let available = max_length - suffix_len;
    let reserve = if available > COLLISION_SUFFIX_RESERVE * 2 {
        COLLISION_SUFFIX_RESERVE
    } else {
        0
    };
    let budget = available - reserve;

    let mut base = trim_edges(truncate_bytes(trim_edges(stem), budget)).to_owned();
    if base.is_empty() {
        base = truncate_bytes(FALLBACK_NAME, budget).to_owned();
    }
    if is_reserved_name(&base) {
        base = format!("{}_", truncate_bytes(&base, budget - 1));
    }

    match extension {
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    }
}

pub fn generate_chapter_filename(
    book_title: &str,
    chapter_number: u32,
    chapter_title: &str,
    format: crate::formats::AudioFormat,
) -> String {
    let chapter_title = strip_and_collapse(chapter_title);
    let book_title = strip_and_collapse(book_title);
    let label = [trim_edges(&chapter_title), trim_edges(&book_title)]
        .into_iter()
        .find(|label| !label.is_empty());

    let ext = format.extension();
    let composed = match label {
        Some(label) => format!("{chapter_number:03} - {label}.{ext}"),
        None => format!("{chapter_number:03}.{ext}"),
    };
    sanitize(&composed, MAX_FILENAME_LEN)
}

/// Returns `name` if nothing exists under it in `dir`, otherwise the first free
/// `stem (n).ext`. The check is not atomic with file creation.
pub fn generate_unique_filename(dir: &Path, name: &str) -> String {
    let taken = |candidate: &str| std::fs::symlink_metadata(dir.join(candidate)).is_ok();
    if !taken(name) {
        return name.to_owned();
    }

    let (stem, ext) = match split_extension(name) {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (name, None),
    };
    let compose = |tag: &str| match ext {
        Some(ext) => format!("{stem} ({tag}).{ext}"),
        None => format!("{stem} ({tag})"),
    };

    for n in 1..=MAX_COLLISION_PROBES {
        let candidate = compose(&n.to_string());
        if !taken(&candidate) {
            return candidate;
        }
    }

    tracing::warn!(dir = %dir.display(), name, "collision probes exhausted; using random suffix");
    compose(&uuid::Uuid::new_v4().simple().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::AudioFormat;
    use proptest::prelude::*;

    #[test]
    fn sanitize_strips_forbidden_characters() {
        assert_eq!(sanitize("a<b>c:d\"e/f\\g|h?i*j", 255), "abcdefghij");
        assert_eq!(sanitize("tab\there\nnew\u{7}line", 255), "tab here newline");
        assert_eq!(sanitize("  spaced   out  ", 255), "spaced out");
    }

    #[test]
    fn sanitize_renames_reserved_basenames() {
        assert_eq!(sanitize("con", 255), "con_");
        assert_eq!(sanitize("LPT1.mp3", 255), "LPT1_.mp3");
        assert_eq!(sanitize("Console.mp3", 255), "Console.mp3");
    }

    #[test]
    fn sanitize_truncates_stem_and_keeps_extension() {
        let long = format!("{}.m4b", "x".repeat(500));
        let out = sanitize(&long, 100);
        assert!(out.len() <= 100);
        assert!(out.ends_with(".m4b"));
        assert_eq!(out.len(), 100 - COLLISION_SUFFIX_RESERVE);
    }

    #[test]
    fn sanitize_never_splits_multibyte_characters() {
        let out = sanitize(&"é".repeat(50), 21);
        assert!(out.len() <= 21);
        assert!(out.chars().all(|c| c == 'é'));
    }

    #[test]
    fn sanitize_falls_back_for_empty_input() {
        assert_eq!(sanitize("???", 255), "untitled");
        assert_eq!(sanitize("...", 4), "unti");
        assert_eq!(sanitize("anything", 0), "");
    }

    #[test]
    fn chapter_filename_is_zero_padded() {
        assert_eq!(
            generate_chapter_filename("Book", 7, "The: Return?", AudioFormat::Mp3),
            "007 - The Return.mp3"
        );
        assert_eq!(
            generate_chapter_filename("Book", 12, "  ", AudioFormat::M4a),
            "012 - Book.m4a"
        );
        assert_eq!(
            generate_chapter_filename("", 1, "", AudioFormat::Flac),
            "001.flac"
        );
    }

    #[test]
    fn unique_filename_appends_counter_before_extension() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        assert_eq!(generate_unique_filename(temp.path(), "a.mp3"), "a.mp3");

        std::fs::write(temp.path().join("a.mp3"), b"x")?;
        assert_eq!(generate_unique_filename(temp.path(), "a.mp3"), "a (1).mp3");

        std::fs::write(temp.path().join("a (1).mp3"), b"x")?;
        assert_eq!(generate_unique_filename(temp.path(), "a.mp3"), "a (2).mp3");

        std::fs::create_dir(temp.path().join("notes"))?;
        assert_eq!(generate_unique_filename(temp.path(), "notes"), "notes (1)");
        Ok(())
    }

    proptest! {
        #[test]
        fn sanitize_respects_length_and_charset(text in any::<String>(), max in 0usize..300) {
            let out = sanitize(&text, max);
            prop_assert!(out.len() <= max);
            prop_assert!(!out.chars().any(|c| FORBIDDEN_CHARS.contains(&c) || c.is_control()));
        }

        #[test]
        fn unique_filename_never_collides(
            existing in proptest::collection::hash_set("[a-c]{1,2}( \\([1-3]\\))?\\.mp3", 0..12),
            name in "[a-c]{1,2}\\.mp3",
        ) {
            let temp = tempfile::TempDir::new().map_err(|e| TestCaseError::fail(e.to_string()))?;
            for file in &existing {
                std::fs::write(temp.path().join(file), b"x")
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
            }
            let unique = generate_unique_filename(temp.path(), &name);
            prop_assert!(!existing.contains(&unique));
            prop_assert!(!temp.path().join(&unique).exists());
        }
    }
}
