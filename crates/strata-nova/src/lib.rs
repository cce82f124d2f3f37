//! Strata Nova
//!
//! Drivers for Data General DOS/RDOS archive media: the DUMP streaming
//! archive format and the fixed-block magtape layout.

pub use dgdosmt::DgdosMagTapeFs;
pub use dump::DgdosDumpFs;

pub mod dgdosmt;
pub mod dump;

use chrono::{Days, NaiveDate};

bitflags::bitflags! {
    /// RDOS file attribute word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RdosAttributes: u16 {
        /// Read-protected.
        const RP  = 0o100000;
        /// Attribute-change protected.
        const CHA = 0o040000;
        /// Save file.
        const SAV = 0o020000;
        /// Partition.
        const PAR = 0o010000;
        /// Directory.
        const DIR = 0o004000;
        /// Link entry.
        const LNK = 0o002000;
        /// Permanent.
        const PER = 0o000040;
        /// Write-protected.
        const WP  = 0o000020;
        /// Contiguous organization.
        const CON = 0o000002;
        /// Random organization.
        const RAN = 0o000001;
    }
}

/// `LIST`-style attribute letters.
pub fn format_attr(attributes: RdosAttributes) -> String {
    const LETTERS: &[(RdosAttributes, char)] = &[
        (RdosAttributes::RP, 'R'),
        (RdosAttributes::WP, 'W'),
        (RdosAttributes::CHA, 'A'),
        (RdosAttributes::PER, 'P'),
        (RdosAttributes::SAV, 'S'),
        (RdosAttributes::CON, 'C'),
        (RdosAttributes::RAN, 'N'),
        (RdosAttributes::DIR, 'Y'),
        (RdosAttributes::PAR, 'Q'),
        (RdosAttributes::LNK, 'L'),
    ];
    LETTERS
        .iter()
        .filter(|(flag, _)| attributes.contains(*flag))
        .map(|&(_, ch)| ch)
        .collect()
}

/// RDOS dates count days from 1967-12-31; zero means no date.
pub fn rdos_to_date(days: u16) -> Option<NaiveDate> {
    if days == 0 {
        return None;
    }
    NaiveDate::from_ymd_opt(1967, 12, 31)?.checked_add_days(Days::new(days as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_attr() {
        assert_eq!(
            format_attr(RdosAttributes::DIR | RdosAttributes::PER),
            "PY"
        );
        assert_eq!(format_attr(RdosAttributes::empty()), "");
    }

    #[test]
    fn test_rdos_date() {
        assert_eq!(rdos_to_date(0), None);
        assert_eq!(
            rdos_to_date(1),
            NaiveDate::from_ymd_opt(1968, 1, 1)
        );
    }
}
