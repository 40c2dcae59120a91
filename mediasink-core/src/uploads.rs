//! Naming conventions for the uploads directory.
//!
//! The duplicate index relies on these conventions to tell in-flight
//! temporary files apart from finalized ones, so they are normative:
//! temporaries are `vid-<token>.tmp`, finalized files are
//! `YYYYMMDD_HHMMSSsss_<token>_<sanitized-original>`.

use chrono::{DateTime, Local};
use uuid::Uuid;

pub const TEMP_PREFIX: &str = "vid-";
pub const TEMP_SUFFIX: &str = ".tmp";

const TOKEN_LEN: usize = 8;
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S%3f";
const FALLBACK_NAME: &str = "unknown_file";

/// Opaque fragment used both in temp names and as the unique suffix of
/// the finalized name derived from them.
pub fn fresh_token() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..TOKEN_LEN].to_string()
}

pub fn temp_file_name(token: &str) -> String {
    format!("{TEMP_PREFIX}{token}{TEMP_SUFFIX}")
}

pub fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

/// Neutralizes a producer-supplied filename: every run of characters
/// outside `[A-Za-z0-9._-]` (path separators included) collapses to a
/// single underscore, and consecutive underscores collapse too, so no
/// path structure survives.
pub fn sanitize_file_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    let mut last_was_underscore = false;
    for ch in name.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-') {
            ch
        } else {
            '_'
        };
        if mapped == '_' {
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
        } else {
            last_was_underscore = false;
        }
        sanitized.push(mapped);
    }
    if sanitized.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        sanitized
    }
}

/// Finalized name for a completed upload. The timestamp is local wall
/// clock with millisecond precision; `token` keeps concurrent renames
/// of same-named uploads from colliding.
pub fn finalized_name(sanitized: &str, token: &str, at: DateTime<Local>) -> String {
    format!("{}_{}_{}", at.format(TIMESTAMP_FORMAT), token, sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_short_and_unique() {
        let a = fresh_token();
        let b = fresh_token();
        assert_eq!(a.len(), TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn temp_names_round_trip() {
        let name = temp_file_name("deadbeef");
        assert_eq!(name, "vid-deadbeef.tmp");
        assert!(is_temp_name(&name));
        assert!(!is_temp_name("20240101_123000123_deadbeef_clip.mp4"));
        assert!(!is_temp_name("vid-deadbeef.mp4"));
    }

    #[test]
    fn hidden_names_detected() {
        assert!(is_hidden_name(".DS_Store"));
        assert!(!is_hidden_name("clip.mp4"));
    }

    #[test]
    fn sanitize_keeps_safe_names() {
        assert_eq!(sanitize_file_name("hello.mp4"), "hello.mp4");
        assert_eq!(sanitize_file_name("clip-01_final.mov"), "clip-01_final.mov");
    }

    #[test]
    fn sanitize_neutralizes_traversal() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_file_name("..\\..\\boot.ini"), ".._.._boot.ini");
    }

    #[test]
    fn sanitize_collapses_runs() {
        assert_eq!(sanitize_file_name("my cool  video!!.mp4"), "my_cool_video_.mp4");
        assert_eq!(sanitize_file_name("a___b"), "a_b");
    }

    #[test]
    fn sanitize_empty_falls_back() {
        assert_eq!(sanitize_file_name(""), "unknown_file");
    }

    #[test]
    fn finalized_name_shape() {
        let at = Local::now();
        let name = finalized_name("hello.mp4", "deadbeef", at);
        let mut parts = name.splitn(3, '_');
        let date = parts.next().unwrap();
        let time = parts.next().unwrap();
        let rest = parts.next().unwrap();
        assert_eq!(date.len(), 8);
        assert!(date.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(time.len(), 9);
        assert!(time.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(rest, "deadbeef_hello.mp4");
    }
}
