use crate::package::PackageRecord;

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
#[error("archive checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
pub struct ChecksumMismatch {
    pub stored: u32,
    pub computed: u32,
}

/// CRC-32/ISO-HDLC over the full archive content. The producer wraps its
/// tar stream in a CRC writer with the same polynomial; if real producer
/// output ever disagrees, this is the place to revisit.
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Compares the stored `crc` against a fresh checksum of `bytes`.
pub fn verify_archive(record: &PackageRecord, bytes: &[u8]) -> Result<(), ChecksumMismatch> {
    let computed = crc32(bytes);
    if computed != record.crc {
        return Err(ChecksumMismatch {
            stored: record.crc,
            computed,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::PackageRecord;

    fn record_with_crc(crc: u32) -> PackageRecord {
        PackageRecord {
            id: 1,
            name: "editor".to_string(),
            description: None,
            version: "1.0.0".to_string(),
            image_url: None,
            archive_path: "editor.tar.gz".to_string(),
            executable_path: None,
            crc,
            has_installer: false,
            add_to_path: false,
        }
    }

    #[test]
    fn known_answer_check_digits() {
        // CRC-32/ISO-HDLC check value
        assert_eq!(crc32(b"123456789"), 0xcbf4_3926);
    }

    #[test]
    fn matching_archive_verifies() {
        let bytes = b"archive contents";
        let record = record_with_crc(crc32(bytes));
        assert_eq!(verify_archive(&record, bytes), Ok(()));
    }

    #[test]
    fn mismatch_reports_both_values() {
        let bytes = b"archive contents";
        let record = record_with_crc(0x1234_5678);
        let err = verify_archive(&record, bytes).unwrap_err();
        assert_eq!(err.stored, 0x1234_5678);
        assert_eq!(err.computed, crc32(bytes));
    }

    #[test]
    fn full_range_crc_survives() {
        let record = record_with_crc(u32::MAX);
        let err = verify_archive(&record, b"").unwrap_err();
        assert_eq!(err.stored, u32::MAX);
    }
}
