/// Shell-style filename match supporting `*` and `?`.
fn glob_match(name: &[u8], pattern: &[u8]) -> bool {
    match (pattern.first(), name.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(b'*'), _) => {
            glob_match(name, &pattern[1..])
                || (!name.is_empty() && glob_match(&name[1..], pattern))
        }
        (Some(b'?'), Some(_)) => glob_match(&name[1..], &pattern[1..]),
        (Some(&p), Some(&c)) => p == c && glob_match(&name[1..], &pattern[1..]),
        (Some(_), None) => false,
    }
}

/// Match a basename against an optional pattern.
///
/// With `wildcard` the pattern is a glob; without it the match is exact.
/// An empty pattern matches everything.
pub fn filename_match(basename: &str, pattern: Option<&str>, wildcard: bool) -> bool {
    match pattern {
        None | Some("") => true,
        Some(p) if wildcard => glob_match(basename.as_bytes(), p.as_bytes()),
        Some(p) => basename == p,
    }
}

/// Split a `volume:path` name into drive and path.
///
/// Paths without a volume prefix resolve to the default drive `DK`.
pub fn splitdrive(path: &str) -> (String, String) {
    match path.split_once(':') {
        Some((drive, rest)) => (drive.to_uppercase(), rest.to_string()),
        None => ("DK".to_string(), path.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_match() {
        assert!(filename_match("A.TXT", None, true));
        assert!(filename_match("A.TXT", Some("*.TXT"), true));
        assert!(filename_match("A.TXT", Some("?.TXT"), true));
        assert!(!filename_match("AB.TXT", Some("?.TXT"), true));
        assert!(!filename_match("A.DAT", Some("*.TXT"), true));
        assert!(filename_match("A.TXT", Some("A.TXT"), false));
        assert!(!filename_match("A.TXT", Some("*.TXT"), false));
    }

    #[test]
    fn test_splitdrive() {
        assert_eq!(
            splitdrive("sy:file.txt"),
            ("SY".to_string(), "file.txt".to_string())
        );
        assert_eq!(
            splitdrive("file.txt"),
            ("DK".to_string(), "file.txt".to_string())
        );
    }
}
