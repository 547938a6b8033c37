//! Token escaping, identifier validation and remote path normalisation
//!
//! These are pure functions: they never fail, they only transform or reject.

/// Maximum length of a volume or container identifier
pub const MAX_IDENTIFIER_LEN: usize = 255;

/// Escape a string so a POSIX shell parses it back as exactly one token.
///
/// Strings made only of `[A-Za-z0-9_./-]` without `..` pass through
/// unchanged. Everything else is wrapped in single quotes, with each embedded
/// single quote written as `'\''` (close, escaped quote, reopen).
///
/// # Examples
///
/// ```
/// use volume_migrator::shell::escape;
///
/// assert_eq!(escape("my-volume_1"), "my-volume_1");
/// assert_eq!(escape("hello world"), "'hello world'");
/// assert_eq!(escape("it's"), "'it'\\''s'");
/// assert_eq!(escape(""), "''");
/// ```
pub fn escape(s: &str) -> String {
    if is_safe_token(s) {
        return s.to_string();
    }

    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    quoted.push_str(&s.replace('\'', "'\\''"));
    quoted.push('\'');
    quoted
}

fn is_safe_token(s: &str) -> bool {
    if s.is_empty() || s.contains("..") {
        return false;
    }

    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
}

/// Check a resource identifier (volume name) against the allow-list.
///
/// Identifiers also name on-disk archives, so callers must reject a failing
/// name rather than escape it.
pub fn validate_identifier(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN {
        return false;
    }

    if name.starts_with('-') || name.starts_with('.') {
        return false;
    }

    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return false;
    }

    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Normalise a remote path: drop every `..`, force a leading `/` and collapse
/// repeated slashes.
///
/// The result is not guaranteed to be a valid path and must still be escaped
/// before it is embedded in a command.
pub fn sanitize_remote_path(path: &str) -> String {
    let stripped = path.replace("..", "");

    let mut normalised = String::with_capacity(stripped.len() + 1);
    normalised.push('/');

    let mut previous_slash = true;
    for c in stripped.chars() {
        if c == '/' && previous_slash {
            continue;
        }
        previous_slash = c == '/';
        normalised.push(c);
    }
    normalised
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal POSIX single-token parser covering the quoting `escape` emits.
    fn shell_parse(token: &str) -> String {
        let mut out = String::new();
        let mut chars = token.chars();
        let mut in_single = false;
        while let Some(c) = chars.next() {
            match (c, in_single) {
                ('\'', _) => in_single = !in_single,
                ('\\', false) => {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                }
                (c, _) => out.push(c),
            }
        }
        assert!(!in_single, "unterminated quote in {token}");
        out
    }

    #[test]
    fn test_escape_safe_strings_unchanged() {
        for s in ["simple-name_123", "a", "/tmp/volume-migration-1", "v1.0", "A/b/C"] {
            assert_eq!(escape(s), s);
        }
    }

    #[test]
    fn test_escape_quotes_metacharacters() {
        assert_eq!(escape("hello world"), "'hello world'");
        assert_eq!(escape("test; rm -rf /"), "'test; rm -rf /'");
        assert_eq!(escape("`whoami`"), "'`whoami`'");
        assert_eq!(escape("$HOME/test"), "'$HOME/test'");
        assert_eq!(escape("vol:/data:ro"), "'vol:/data:ro'");
    }

    #[test]
    fn test_escape_single_quote() {
        assert_eq!(escape("it's working"), "'it'\\''s working'");
    }

    #[test]
    fn test_escape_traversal_is_never_safe() {
        assert_eq!(escape("../../../etc/passwd"), "'../../../etc/passwd'");
    }

    #[test]
    fn test_escape_empty() {
        assert_eq!(escape(""), "''");
    }

    #[test]
    fn test_escape_parses_back_to_original() {
        let inputs = [
            "it's a test",
            "",
            "''",
            "a'b'c",
            "$(reboot)",
            "line\nbreak",
            "tab\tand \\ backslash",
            "\"double\" 'single'",
            "ünïcödé name",
        ];
        for input in inputs {
            assert_eq!(shell_parse(&escape(input)), input, "input: {input:?}");
        }
    }

    #[test]
    fn test_validate_identifier_accepts() {
        for name in ["a", "my-volume", "v1.0", "my_volume", "MyVolume123", "project.data"] {
            assert!(validate_identifier(name), "{name} should be valid");
        }
        assert!(validate_identifier(&"a".repeat(255)));
    }

    #[test]
    fn test_validate_identifier_rejects() {
        let too_long = "a".repeat(256);
        let rejected = [
            "",
            "-x",
            ".x",
            "a/b",
            "a;b",
            "a\\b",
            "a..b",
            "vol name",
            "vol$(id)",
            "vol`id`",
            too_long.as_str(),
        ];
        for name in rejected {
            assert!(!validate_identifier(name), "{name:?} should be rejected");
        }
    }

    #[test]
    fn test_sanitize_remote_path() {
        assert_eq!(sanitize_remote_path("/tmp/test"), "/tmp/test");
        assert_eq!(sanitize_remote_path("tmp/test"), "/tmp/test");
        assert_eq!(sanitize_remote_path("/tmp//test"), "/tmp/test");
        assert_eq!(sanitize_remote_path("///tmp///test"), "/tmp/test");
        assert_eq!(sanitize_remote_path("/tmp/../etc/passwd"), "/tmp/etc/passwd");
        assert_eq!(sanitize_remote_path("/tmp/test/./path"), "/tmp/test/./path");
    }

    #[test]
    fn test_sanitize_remote_path_removes_traversal() {
        let sanitized = sanitize_remote_path("/tmp/../../etc/passwd");
        assert!(!sanitized.contains(".."));
        assert!(sanitized.starts_with('/'));
        assert_eq!(sanitized, "/tmp/etc/passwd");

        let sanitized = sanitize_remote_path("....//..");
        assert!(!sanitized.contains(".."));
        assert!(sanitized.starts_with('/'));
    }
}
