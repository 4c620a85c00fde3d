//! Object paths for uploads.
//!
//! Layout: `{resource_type}/{user_scope}/{timestamp_ms}-{suffix}-{filename}`.
//! Every segment is restricted to ASCII alphanumerics plus `_` and `-`, and
//! the filename additionally keeps a single `.` before its extension.

use rand::RngCore;

/// Shortest filename cap honoured; smaller caps are raised to this.
pub const MIN_FILENAME_LEN: usize = 8;
const MAX_EXTENSION_LEN: usize = 10;
const SUFFIX_BYTES: usize = 4;

/// Reduce a client-supplied filename to `[A-Za-z0-9_]+(\.[a-z0-9]+)?`,
/// at most `max_len` characters.
pub fn sanitize_filename(name: &str, max_len: usize) -> String {
    let max_len = max_len.max(MIN_FILENAME_LEN);
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let (stem, extension) = match base.rfind('.') {
        Some(dot) if dot > 0 => (&base[..dot], &base[dot + 1..]),
        _ => (base, ""),
    };

    let mut extension: String = extension
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if extension.len() > MAX_EXTENSION_LEN || extension.len() + 2 > max_len {
        extension.clear();
    }

    let mut stem: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if stem.is_empty() {
        stem.push_str("file");
    }

    let stem_cap = if extension.is_empty() {
        max_len
    } else {
        max_len - extension.len() - 1
    };
    stem.truncate(stem_cap);

    if extension.is_empty() {
        stem
    } else {
        format!("{stem}.{extension}")
    }
}

fn sanitize_segment(segment: &str, fallback: &str) -> String {
    let folded: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if folded.is_empty() {
        fallback.to_string()
    } else {
        folded
    }
}

/// Eight lowercase hex characters.
pub fn random_suffix() -> String {
    let mut bytes = [0u8; SUFFIX_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Assemble the storage path for a new upload.
pub fn build_upload_path(
    resource_type: &str,
    user_scope: Option<&str>,
    timestamp_ms: u64,
    suffix: &str,
    filename: &str,
    max_filename_len: usize,
) -> String {
    format!(
        "{}/{}/{}-{}-{}",
        sanitize_segment(resource_type, "uploads"),
        sanitize_segment(user_scope.unwrap_or(""), "anonymous"),
        timestamp_ms,
        sanitize_segment(suffix, "0"),
        sanitize_filename(filename, max_filename_len)
    )
}

/// Whether a path names an existing object safely: relative, no traversal,
/// segments drawn from the same alphabet the builder emits.
pub fn is_safe_object_path(path: &str) -> bool {
    !path.is_empty()
        && path.split('/').all(|segment| {
            !segment.is_empty()
                && segment != "."
                && segment != ".."
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_folds_and_keeps_extension() {
        assert_eq!(sanitize_filename("My House (front).JPG", 100), "My_House__front_.jpg");
        assert_eq!(sanitize_filename("../../etc/passwd", 100), "passwd");
        assert_eq!(sanitize_filename("C:\\photos\\a b.png", 100), "a_b.png");
        assert_eq!(sanitize_filename("archive.tar.gz", 100), "archive_tar.gz");
    }

    #[test]
    fn test_sanitize_edge_cases() {
        assert_eq!(sanitize_filename("", 100), "file");
        assert_eq!(sanitize_filename(".hidden", 100), "_hidden");
        assert_eq!(sanitize_filename("photo.", 100), "photo");
        assert_eq!(sanitize_filename("łódź.webp", 100), "__d_.webp");
    }

    #[test]
    fn test_sanitize_caps_length_keeping_extension() {
        let long = format!("{}.jpeg", "x".repeat(300));
        let out = sanitize_filename(&long, 100);
        assert_eq!(out.len(), 100);
        assert!(out.ends_with(".jpeg"));
    }

    #[test]
    fn test_build_upload_path() {
        let path = build_upload_path(
            "properties",
            Some("user-42"),
            1_700_000_000_000,
            "deadbeef",
            "front door.png",
            100,
        );
        assert_eq!(path, "properties/user-42/1700000000000-deadbeef-front_door.png");
        assert!(is_safe_object_path(&path));

        let anon = build_upload_path("properties", None, 1, "00000000", "a.png", 100);
        assert!(anon.starts_with("properties/anonymous/1-00000000-"));
    }

    #[test]
    fn test_random_suffix_shape() {
        let suffix = random_suffix();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_unsafe_paths() {
        assert!(!is_safe_object_path("../secret"));
        assert!(!is_safe_object_path("/abs/path.png"));
        assert!(!is_safe_object_path("a//b"));
        assert!(!is_safe_object_path("a/b c.png"));
        assert!(is_safe_object_path("properties/anonymous/1-ab-x.png"));
    }
}
