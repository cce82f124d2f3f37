//! Filesystem-type registry: the `/fstype` tag names map to mount and
//! initialize factories.

use strata_core::{Filesystem, FsError, Result};
use strata_io::ByteFile;
use strata_nova::{DgdosDumpFs, DgdosMagTapeFs};
use strata_pdp7::{DecsysFs, Unix0Fs};
use strata_pdp8::{DmsFs, Os8Fs, Tss8Fs};
use strata_pdp11::{Caps11Fs, Dos11Fs, Dos11MagTapeFs, Rt11Fs, SoloFs};
use strata_unix::{UnixFs, UnixVersion};

/// The filesystem tags accepted by `/fstype`.
pub fn fs_types() -> &'static [&'static str] {
    &[
        "rt11", "dos11", "dos11mt", "caps11", "solo", "decsys", "dms", "os8", "tss8", "unix0",
        "unix1", "unix6", "unix7", "dump", "dgdosmt",
    ]
}

/// Mount an image with the driver named by `fstype`.
pub fn mount(fstype: &str, file: ByteFile) -> Result<Box<dyn Filesystem>> {
    let fs: Box<dyn Filesystem> = match fstype.to_lowercase().as_str() {
        "rt11" => Box::new(Rt11Fs::mount(file)?),
        "dos11" | "xxdp" => Box::new(Dos11Fs::mount(file)?),
        "dos11mt" => Box::new(Dos11MagTapeFs::mount(file)?),
        "caps11" => Box::new(Caps11Fs::mount(file)?),
        "solo" => Box::new(SoloFs::mount(file)?),
        "decsys" => Box::new(DecsysFs::mount(file)?),
        "dms" => Box::new(DmsFs::mount(file)?),
        "os8" => Box::new(Os8Fs::mount(file)?),
        "tss8" => Box::new(Tss8Fs::mount(file)?),
        "unix0" => Box::new(Unix0Fs::mount(file)?),
        "unix1" => Box::new(UnixFs::mount(file, UnixVersion::V1)?),
        "unix6" => Box::new(UnixFs::mount(file, UnixVersion::V6)?),
        "unix7" => Box::new(UnixFs::mount(file, UnixVersion::V7)?),
        "dump" => Box::new(DgdosDumpFs::mount(file)?),
        "dgdosmt" => Box::new(DgdosMagTapeFs::mount(file)?),
        other => {
            return Err(FsError::InvalidArg(format!(
                "unknown filesystem type: {}",
                other
            )));
        }
    };
    log::debug!("mounted {} filesystem", fs.fs_name());
    Ok(fs)
}

/// Write an empty filesystem of the named type onto the image, returning
/// it mounted. Read-only formats refuse.
pub fn initialize(fstype: &str, file: ByteFile) -> Result<Box<dyn Filesystem>> {
    match fstype.to_lowercase().as_str() {
        "rt11" => {
            let mut fs = Rt11Fs::mount(file)?;
            fs.initialize()?;
            Ok(Box::new(fs))
        }
        "dos11mt" => {
            let mut fs = Dos11MagTapeFs::mount(file)?;
            fs.initialize()?;
            Ok(Box::new(fs))
        }
        "caps11" => {
            let mut fs = Caps11Fs::mount_strict(file, false)?;
            fs.initialize()?;
            Ok(Box::new(fs))
        }
        "solo" => {
            let mut fs = SoloFs::open_uninitialized(file)?;
            fs.initialize()?;
            Ok(Box::new(fs))
        }
        "decsys" => {
            let mut fs = DecsysFs::mount(file)?;
            fs.initialize()?;
            Ok(Box::new(fs))
        }
        "dms" => {
            let mut fs = DmsFs::mount_strict(file, false)?;
            fs.initialize()?;
            Ok(Box::new(fs))
        }
        "os8" => {
            let mut fs = Os8Fs::mount(file)?;
            fs.initialize()?;
            Ok(Box::new(fs))
        }
        "tss8" => {
            let mut fs = Tss8Fs::open_uninitialized(file)?;
            fs.initialize()?;
            Ok(Box::new(fs))
        }
        "dgdosmt" => {
            let mut fs = DgdosMagTapeFs::mount_strict(file, false)?;
            fs.initialize()?;
            Ok(Box::new(fs))
        }
        "dos11" | "unix0" | "unix1" | "unix6" | "unix7" | "dump" => Err(FsError::ReadOnlyFs),
        other => Err(FsError::InvalidArg(format!(
            "unknown filesystem type: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_io::BLOCK_SIZE;

    #[test]
    fn test_unknown_type() {
        let file = ByteFile::with_size(BLOCK_SIZE * 16);
        assert!(matches!(
            mount("vms", file),
            Err(FsError::InvalidArg(_))
        ));
    }

    #[test]
    fn test_initialize_then_mount_rt11() {
        let file = ByteFile::with_size(BLOCK_SIZE * 512);
        let mut fs = initialize("rt11", file).unwrap();
        assert_eq!(fs.fs_name(), "rt11");
        fs.write_bytes("A.TXT", b"hello", None, None, None).unwrap();
        assert!(fs.exists("A.TXT"));
    }

    #[test]
    fn test_initialize_read_only_format() {
        let file = ByteFile::with_size(BLOCK_SIZE * 512);
        assert!(matches!(
            initialize("unix6", file),
            Err(FsError::ReadOnlyFs)
        ));
    }

    #[test]
    fn test_fs_types_all_mountable_names() {
        assert_eq!(fs_types().len(), 15);
    }
}
