//! The drive-letter namespace: logical names (`AB:`) bound to mounted
//! filesystems, with `DK:` as the default alias and `LAST:` naming the
//! most recent mount.
//!
//! A `Volumes` value is passed explicitly to whoever needs it; drivers
//! never see it.

use strata_core::{Filesystem, FsError, Result};

pub struct Volumes {
    /// Mount order is preserved so `LAST:` can resolve.
    volumes: Vec<(String, Box<dyn Filesystem>)>,
    /// The volume `DK:` aliases.
    default_volume: Option<String>,
}

impl Default for Volumes {
    fn default() -> Self {
        Self::new()
    }
}

impl Volumes {
    pub fn new() -> Self {
        Self {
            volumes: Vec::new(),
            default_volume: None,
        }
    }

    fn canonical(volume_id: &str) -> String {
        volume_id.trim_end_matches(':').to_uppercase()
    }

    /// Resolve a logical name (`AB`, `AB:`, `DK:`, `LAST:`) to its
    /// filesystem.
    pub fn get(&mut self, volume_id: Option<&str>) -> Result<&mut dyn Filesystem> {
        let mut name = Self::canonical(volume_id.unwrap_or("DK"));
        if name == "DK" {
            name = self
                .default_volume
                .clone()
                .ok_or_else(|| FsError::InvalidArg("illegal volume DK:".to_string()))?;
        }
        if name == "LAST" {
            name = self
                .last()
                .ok_or_else(|| FsError::InvalidArg("illegal volume LAST:".to_string()))?;
        }
        self.volumes
            .iter_mut()
            .find(|(id, _)| *id == name)
            .map(|(_, fs)| fs.as_mut() as &mut dyn Filesystem)
            .ok_or_else(|| FsError::InvalidArg(format!("illegal volume {}:", name)))
    }

    /// Bind a mounted filesystem to a logical name.
    pub fn mount(&mut self, logical: &str, fs: Box<dyn Filesystem>) -> Result<()> {
        let logical = Self::canonical(logical);
        if logical.is_empty() || logical == "DK" || logical == "SY" || logical == "LAST" {
            return Err(FsError::InvalidArg(format!(
                "illegal volume {}:",
                logical
            )));
        }
        if self.volumes.iter().any(|(id, _)| *id == logical) {
            return Err(FsError::InvalidArg(format!(
                "volume {}: is already mounted",
                logical
            )));
        }
        if self.default_volume.is_none() {
            self.default_volume = Some(logical.clone());
        }
        self.volumes.push((logical, fs));
        Ok(())
    }

    pub fn dismount(&mut self, logical: &str) -> Result<()> {
        let logical = Self::canonical(logical);
        let position = self
            .volumes
            .iter()
            .position(|(id, _)| *id == logical)
            .ok_or_else(|| FsError::InvalidArg(format!("illegal volume {}:", logical)))?;
        let (_, mut fs) = self.volumes.remove(position);
        fs.close()?;
        if self.default_volume.as_deref() == Some(&logical) {
            self.default_volume = self.volumes.last().map(|(id, _)| id.clone());
        }
        Ok(())
    }

    /// The most recently mounted volume.
    pub fn last(&self) -> Option<String> {
        self.volumes.last().map(|(id, _)| id.clone())
    }

    pub fn set_default_volume(&mut self, volume_id: &str) -> Result<()> {
        let mut name = Self::canonical(volume_id);
        if name == "LAST" {
            name = self
                .last()
                .ok_or_else(|| FsError::InvalidArg("invalid volume".to_string()))?;
        }
        if name != "DK" && self.volumes.iter().any(|(id, _)| *id == name) {
            self.default_volume = Some(name);
            Ok(())
        } else {
            Err(FsError::InvalidArg("invalid volume".to_string()))
        }
    }

    /// Change volume and directory: `AB:[1,2]` selects the volume and
    /// its directory context.
    pub fn chdir(&mut self, path: &str) -> bool {
        let (volume_id, fullname) = strata_common::splitdrive(path);
        let Ok(fs) = self.get(Some(&volume_id)) else {
            return false;
        };
        if !fullname.is_empty() && !fs.chdir(&fullname) {
            return false;
        }
        if volume_id != "DK" {
            self.set_default_volume(&volume_id).is_ok()
        } else {
            true
        }
    }

    pub fn pwd(&mut self) -> String {
        let default = self.default_volume.clone().unwrap_or_else(|| "DK".to_string());
        match self.get(Some(&default)) {
            Ok(fs) => format!("{}:{}", default, fs.pwd()),
            Err(_) => format!("{}:???", default),
        }
    }

    pub fn mounted(&self) -> impl Iterator<Item = (&str, &dyn Filesystem)> {
        self.volumes
            .iter()
            .map(|(id, fs)| (id.as_str(), fs.as_ref()))
    }

    pub fn is_default(&self, volume_id: &str) -> bool {
        self.default_volume.as_deref() == Some(&Self::canonical(volume_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_io::{BLOCK_SIZE, ByteFile};

    fn rt11() -> Box<dyn Filesystem> {
        crate::initialize("rt11", ByteFile::with_size(BLOCK_SIZE * 512)).unwrap()
    }

    #[test]
    fn test_mount_resolve_dismount() {
        let mut volumes = Volumes::new();
        volumes.mount("AB", rt11()).unwrap();
        assert_eq!(volumes.get(Some("AB:")).unwrap().fs_name(), "rt11");
        // First mount becomes the default.
        assert_eq!(volumes.get(None).unwrap().fs_name(), "rt11");
        assert_eq!(volumes.get(Some("LAST:")).unwrap().fs_name(), "rt11");
        volumes.dismount("AB:").unwrap();
        assert!(volumes.get(Some("AB:")).is_err());
    }

    #[test]
    fn test_reserved_names_rejected() {
        let mut volumes = Volumes::new();
        assert!(volumes.mount("DK", rt11()).is_err());
        assert!(volumes.mount("SY:", rt11()).is_err());
    }

    #[test]
    fn test_last_tracks_mount_order() {
        let mut volumes = Volumes::new();
        volumes.mount("AA", rt11()).unwrap();
        volumes.mount("BB", rt11()).unwrap();
        assert_eq!(volumes.last().as_deref(), Some("BB"));
        volumes.dismount("BB").unwrap();
        assert_eq!(volumes.last().as_deref(), Some("AA"));
    }

    #[test]
    fn test_chdir_sets_default() {
        let mut volumes = Volumes::new();
        volumes.mount("AA", rt11()).unwrap();
        volumes.mount("BB", rt11()).unwrap();
        assert!(volumes.chdir("BB:"));
        assert!(volumes.is_default("BB"));
        assert!(volumes.pwd().starts_with("BB:"));
    }
}
