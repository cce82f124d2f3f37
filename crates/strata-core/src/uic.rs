use std::fmt;

use crate::{FsError, Result};

/// User Identification Code: `[group,user]` with octal components.
///
/// DOS-11 calls this a UIC, TSS/8 a project-programmer number; the packed
/// form is group in the high byte, user in the low byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uic {
    pub group: u8,
    pub user: u8,
}

impl Uic {
    pub const fn new(group: u8, user: u8) -> Self {
        Self { group, user }
    }

    /// Parse `[g,u]` (octal digits). Fails with `InvalidArg` otherwise.
    pub fn parse(code: &str) -> Result<Self> {
        let inner = code
            .split_once('[')
            .and_then(|(_, rest)| rest.split_once(']'))
            .map(|(inner, _)| inner)
            .ok_or_else(|| FsError::InvalidArg(format!("invalid UIC: {}", code)))?;
        let (group_str, user_str) = inner
            .split_once(',')
            .ok_or_else(|| FsError::InvalidArg(format!("invalid UIC: {}", code)))?;
        let group = u16::from_str_radix(group_str.trim(), 8)
            .map_err(|_| FsError::InvalidArg(format!("invalid UIC: {}", code)))?;
        let user = u16::from_str_radix(user_str.trim(), 8)
            .map_err(|_| FsError::InvalidArg(format!("invalid UIC: {}", code)))?;
        Ok(Self::new(group as u8, user as u8))
    }

    pub fn from_word(word: u16) -> Self {
        Self::new((word >> 8) as u8, (word & 0xFF) as u8)
    }

    pub fn to_word(self) -> u16 {
        ((self.group as u16) << 8) | self.user as u16
    }

    /// Leading `[g,u]` prefix of a path, if present, and the remainder.
    pub fn split_path(path: &str) -> (Option<&str>, &str) {
        if let Some(end) = path.strip_prefix('[').and_then(|rest| rest.find(']')) {
            (Some(&path[..end + 2]), &path[end + 2..])
        } else {
            (None, path)
        }
    }

    pub fn to_wide_string(self) -> String {
        format!("[{:>3o},{:<3o}]", self.group, self.user)
    }
}

impl fmt::Display for Uic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:o},{:o}]", self.group, self.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format() {
        let uic = Uic::parse("[100,100]").unwrap();
        assert_eq!(uic, Uic::new(0o100, 0o100));
        assert_eq!(uic.to_string(), "[100,100]");
        assert_eq!(uic.to_wide_string(), "[100,100]");
    }

    #[test]
    fn test_word_roundtrip() {
        let uic = Uic::new(0o10, 0o20);
        assert_eq!(Uic::from_word(uic.to_word()), uic);
    }

    #[test]
    fn test_split_path() {
        assert_eq!(
            Uic::split_path("[1,2]FILE.TXT"),
            (Some("[1,2]"), "FILE.TXT")
        );
        assert_eq!(Uic::split_path("FILE.TXT"), (None, "FILE.TXT"));
    }

    #[test]
    fn test_invalid() {
        assert!(Uic::parse("100,100").is_err());
        assert!(Uic::parse("[100]").is_err());
    }
}
