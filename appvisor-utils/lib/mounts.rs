//! Parsing of the kernel's live mount table.

use std::{fs, path::PathBuf};

use crate::{UtilsError, UtilsResult, PROC_MOUNTS_PATH};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A single entry of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// The mounted device or pseudo-filesystem name.
    pub source: String,

    /// The mount point.
    pub target: PathBuf,

    /// The filesystem type.
    pub fs_type: String,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reads and parses the live mount table of the calling process.
pub fn read_mount_table() -> UtilsResult<Vec<MountEntry>> {
    let contents =
        fs::read_to_string(PROC_MOUNTS_PATH).map_err(|e| UtilsError::path_io(PROC_MOUNTS_PATH, e))?;

    Ok(parse_mount_table(&contents))
}

/// Parses the contents of a `/proc/mounts` style table.
///
/// Lines with fewer than three fields are skipped. The kernel escapes whitespace and
/// backslashes in the path fields as three digit octal sequences, which are decoded here.
pub fn parse_mount_table(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let fs_type = fields.next()?;

            Some(MountEntry {
                source: unescape_octal(source),
                target: PathBuf::from(unescape_octal(target)),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_triplet(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal_triplet(bytes: &[u8]) -> bool {
    bytes.len() == 3 && bytes[0] <= b'3' && bytes.iter().all(|b| (b'0'..=b'7').contains(b))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
