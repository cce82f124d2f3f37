//! Strata PDP-8
//!
//! Drivers for the 12-bit PDP-8 family: the 4k Disk Monitor System (DMS),
//! OS/8 and TSS/8. All three see the disk as blocks of 12-bit words
//! through [`strata_io::WordBlockDevice`] or, for DMS, the 129-word
//! monitor block layout.

pub use dms::DmsFs;
pub use os8::Os8Fs;
pub use tss8::Tss8Fs;

pub mod dms;
pub mod os8;
pub mod tss8;
