//! Strata UNIX
//!
//! Read-only drivers for the ancient UNIX disk layouts: version 1
//! (1971), version 6 and version 7. All three share the hierarchical
//! tree walk; the i-node shapes, mode bits and block addressing differ
//! per version.

pub use fs::{UnixFs, UnixVersion};
pub use inode::UnixInode;

mod fs;
mod inode;

/// Join two path components.
pub(crate) fn unix_join(a: &str, b: &str) -> String {
    if b.starts_with('/') {
        b.to_string()
    } else if a.is_empty() || a.ends_with('/') {
        format!("{}{}", a, b)
    } else {
        format!("{}/{}", a, b)
    }
}

/// Split a path into directory and basename.
pub(crate) fn unix_split(p: &str) -> (String, String) {
    match p.rfind('/') {
        Some(i) => {
            let head = &p[..i + 1];
            let tail = &p[i + 1..];
            let head = if head.chars().all(|c| c == '/') {
                head.to_string()
            } else {
                head.trim_end_matches('/').to_string()
            };
            (head, tail.to_string())
        }
        None => (String::new(), p.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_helpers() {
        assert_eq!(unix_join("/usr", "bin"), "/usr/bin");
        assert_eq!(unix_join("/", "bin"), "/bin");
        assert_eq!(unix_join("/usr", "/abs"), "/abs");
        assert_eq!(unix_split("/usr/bin"), ("/usr".to_string(), "bin".to_string()));
        assert_eq!(unix_split("/bin"), ("/".to_string(), "bin".to_string()));
        assert_eq!(unix_split("name"), ("".to_string(), "name".to_string()));
    }
}
