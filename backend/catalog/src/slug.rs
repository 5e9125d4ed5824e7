use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

const SLUG_MAX_LEN: usize = 50;
const SUFFIX_LEN: usize = 6;

static UNDERSCORES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[_]").expect("valid regex"));
static UNSAFE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9\- ]").expect("valid regex"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" +").expect("valid regex"));
static DASHES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s\-]+").expect("valid regex"));

/// Lowercased, punctuation-free, single spaced.
pub fn sanitize(input: &str) -> String {
    let s = UNDERSCORES.replace_all(input, " ");
    let s = UNSAFE.replace_all(&s, "");

    SPACES.replace_all(s.trim(), " ").to_lowercase()
}

pub fn slugify(input: &str) -> String {
    let cleaned = sanitize(input);

    DASHES.replace_all(&cleaned, "-").trim_matches('-').to_string()
}

/// `slugify(name)` plus a random six character suffix, capped at 50 characters.
/// The base is shortened so the suffix always survives.
pub fn unique_slugify(name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let suffix = &suffix[..SUFFIX_LEN];

    let mut base = slugify(name);
    base.truncate(SLUG_MAX_LEN - SUFFIX_LEN - 1);
    let base = base.trim_end_matches('-');

    if base.is_empty() {
        suffix.to_string()
    } else {
        format!("{base}-{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::{sanitize, slugify, unique_slugify};

    #[test]
    fn test_basic() {
        assert_eq!(sanitize("hello_world"), "hello world");
        assert_eq!(sanitize("Rust-lang"), "rust-lang");
        assert_eq!(sanitize("clean-this_text!"), "clean-this text");
    }

    #[test]
    fn test_leading_trailing_spaces() {
        assert_eq!(sanitize("   hello   "), "hello");
        assert_eq!(sanitize("  multiple   spaces  "), "multiple spaces");
    }

    #[test]
    fn test_special_characters() {
        assert_eq!(sanitize("!@#$%^&*()"), "");
        assert_eq!(sanitize("abc123!@#"), "abc123");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Wireless Headphones"), "wireless-headphones");
        assert_eq!(slugify("  T-Shirt -- XL!! "), "t-shirt-xl");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_unique_slug_keeps_suffix() {
        let long = "a very long product name that keeps going well past the slug column limit";
        let slug = unique_slugify(long);

        assert!(slug.len() <= 50);
        assert_eq!(slug.rsplit('-').next().map(str::len), Some(6));
        assert_ne!(unique_slugify("Lamp"), unique_slugify("Lamp"));
        assert_eq!(unique_slugify("???").len(), 6);
    }
}
