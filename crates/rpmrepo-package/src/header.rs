//! Minimal RPM header reader.
//!
//! An RPM file starts with a 96-byte lead, followed by the signature header
//! (padded to a multiple of 8 bytes) and the main header. Both headers share
//! one layout: an 8-byte magic, a 4-byte entry count, a 4-byte data size,
//! the index entries (16 bytes each) and the data store.

use std::io::Read;

use tracing::trace;

use crate::error::{PackageError, Result};

/// Magic bytes at the start of the lead.
pub const LEAD_MAGIC: [u8; 4] = [0xed, 0xab, 0xee, 0xdb];

/// Magic bytes (plus header version 1) opening every header structure.
pub const HEADER_MAGIC: [u8; 4] = [0x8e, 0xad, 0xe8, 0x01];

pub const LEAD_SIZE: usize = 96;

pub const TAG_NAME: u32 = 1000;
pub const TAG_VERSION: u32 = 1001;
pub const TAG_RELEASE: u32 = 1002;
pub const TAG_EPOCH: u32 = 1003;
pub const TAG_ARCH: u32 = 1022;
pub const TAG_SOURCERPM: u32 = 1044;

pub const TYPE_INT32: u32 = 4;
pub const TYPE_STRING: u32 = 6;
pub const TYPE_STRING_ARRAY: u32 = 8;
pub const TYPE_I18NSTRING: u32 = 9;

// Upper bounds keep garbage input from triggering huge allocations.
const MAX_ENTRIES: u32 = 0x1_0000;
const MAX_DATA_SIZE: u32 = 256 * 1024 * 1024;

/// Identifying tags of an RPM package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpmHeader {
    pub name: String,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub epoch: Option<u32>,
    pub source_rpm: Option<String>,
}

impl RpmHeader {
    /// Binary packages record the source package they were built from.
    pub fn is_source(&self) -> bool {
        self.source_rpm.is_none()
    }
}

struct IndexEntry {
    tag: u32,
    kind: u32,
    offset: u32,
}

struct HeaderBlock {
    entries: Vec<IndexEntry>,
    store: Vec<u8>,
}

impl HeaderBlock {
    fn entry(&self, tag: u32) -> Option<&IndexEntry> {
        self.entries.iter().find(|entry| entry.tag == tag)
    }

    fn string(&self, tag: u32) -> Result<Option<String>> {
        let Some(entry) = self.entry(tag) else {
            return Ok(None);
        };
        if !matches!(
            entry.kind,
            TYPE_STRING | TYPE_STRING_ARRAY | TYPE_I18NSTRING
        ) {
            return Err(PackageError::InvalidHeader(format!(
                "tag {tag} has type {} instead of a string",
                entry.kind
            )));
        }

        let start = entry.offset as usize;
        let tail = self.store.get(start..).ok_or_else(|| {
            PackageError::InvalidHeader(format!("tag {tag} points outside the data store"))
        })?;
        let end = tail.iter().position(|&b| b == 0).ok_or_else(|| {
            PackageError::InvalidHeader(format!("tag {tag} is not NUL terminated"))
        })?;
        let value = std::str::from_utf8(&tail[..end]).map_err(|_| {
            PackageError::InvalidHeader(format!("tag {tag} is not valid UTF-8"))
        })?;
        Ok(Some(value.to_string()))
    }

    fn int32(&self, tag: u32) -> Result<Option<u32>> {
        let Some(entry) = self.entry(tag) else {
            return Ok(None);
        };
        if entry.kind != TYPE_INT32 {
            return Err(PackageError::InvalidHeader(format!(
                "tag {tag} has type {} instead of INT32",
                entry.kind
            )));
        }
        let start = entry.offset as usize;
        let bytes = self
            .store
            .get(start..start + 4)
            .ok_or_else(|| {
                PackageError::InvalidHeader(format!("tag {tag} points outside the data store"))
            })?;
        Ok(Some(u32::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ])))
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|err| {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                PackageError::InvalidHeader(format!("truncated while reading {what}"))
            }
            _ => {
                PackageError::IoError {
                    action: format!("reading {what}"),
                    source: err,
                }
            }
        }
    })
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Reads one header structure, returning it with its size on disk.
fn read_block<R: Read>(reader: &mut R, what: &str) -> Result<(HeaderBlock, usize)> {
    let mut intro = [0u8; 16];
    read_exact(reader, &mut intro, what)?;
    if intro[..4] != HEADER_MAGIC {
        return Err(PackageError::InvalidHeader(format!("bad {what} magic")));
    }

    let count = be_u32(&intro[8..12]);
    let size = be_u32(&intro[12..16]);
    if count > MAX_ENTRIES || size > MAX_DATA_SIZE {
        return Err(PackageError::InvalidHeader(format!(
            "{what} declares {count} entries and {size} bytes of data"
        )));
    }

    let mut index = vec![0u8; count as usize * 16];
    read_exact(reader, &mut index, what)?;
    let mut store = vec![0u8; size as usize];
    read_exact(reader, &mut store, what)?;

    let entries = index
        .chunks_exact(16)
        .map(|raw| {
            IndexEntry {
                tag: be_u32(&raw[0..4]),
                kind: be_u32(&raw[4..8]),
                offset: be_u32(&raw[8..12]),
            }
        })
        .collect();

    Ok((
        HeaderBlock { entries, store },
        16 + index.len() + size as usize,
    ))
}

/// Reads the lead, skips the signature header and extracts the identifying
/// tags from the main header.
///
/// # Errors
///
/// * [`PackageError::InvalidHeader`] for truncated or malformed input.
/// * [`PackageError::MissingTag`] when NAME, VERSION, RELEASE or ARCH is absent.
/// * [`PackageError::IoError`] when the reader itself fails.
pub fn read_header<R: Read>(reader: &mut R) -> Result<RpmHeader> {
    let mut lead = [0u8; LEAD_SIZE];
    read_exact(reader, &mut lead, "lead")?;
    if lead[..4] != LEAD_MAGIC {
        return Err(PackageError::InvalidHeader("not an RPM file".into()));
    }

    let (_, signature_size) = read_block(reader, "signature header")?;
    let padding = (8 - signature_size % 8) % 8;
    let mut pad = [0u8; 8];
    read_exact(reader, &mut pad[..padding], "signature padding")?;

    let (main, _) = read_block(reader, "main header")?;
    trace!(entries = main.entries.len(), "parsed RPM header");

    let name = main.string(TAG_NAME)?.ok_or(PackageError::MissingTag("NAME"))?;
    let version = main
        .string(TAG_VERSION)?
        .ok_or(PackageError::MissingTag("VERSION"))?;
    let release = main
        .string(TAG_RELEASE)?
        .ok_or(PackageError::MissingTag("RELEASE"))?;
    let epoch = main.int32(TAG_EPOCH)?;
    let source_rpm = main.string(TAG_SOURCERPM)?;

    let arch = if source_rpm.is_none() {
        "src".to_string()
    } else {
        main.string(TAG_ARCH)?.ok_or(PackageError::MissingTag("ARCH"))?
    };

    Ok(RpmHeader {
        name,
        version,
        release,
        arch,
        epoch,
        source_rpm,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::RpmBuilder;

    #[test]
    fn test_read_binary_header() {
        let bytes = RpmBuilder::new("demo", "1.0.0", "1.el8")
            .arch("x86_64")
            .build();
        let header = read_header(&mut bytes.as_slice()).unwrap();

        assert_eq!(header.name, "demo");
        assert_eq!(header.version, "1.0.0");
        assert_eq!(header.release, "1.el8");
        assert_eq!(header.arch, "x86_64");
        assert_eq!(header.epoch, None);
        assert_eq!(header.source_rpm.as_deref(), Some("demo-1.0.0-1.el8.src.rpm"));
        assert!(!header.is_source());
    }

    #[test]
    fn test_read_epoch() {
        let bytes = RpmBuilder::new("demo", "2.1", "3.fc39").epoch(2).build();
        let header = read_header(&mut bytes.as_slice()).unwrap();
        assert_eq!(header.epoch, Some(2));
    }

    #[test]
    fn test_source_package_reports_src_arch() {
        let bytes = RpmBuilder::new("demo", "1.0.0", "1.el8")
            .arch("x86_64")
            .source()
            .build();
        let header = read_header(&mut bytes.as_slice()).unwrap();
        assert!(header.is_source());
        assert_eq!(header.arch, "src");
    }

    #[test]
    fn test_rejects_non_rpm() {
        let err = read_header(&mut b"hello world".as_slice()).unwrap_err();
        assert!(matches!(err, PackageError::InvalidHeader(_)));

        let mut lead = vec![0u8; LEAD_SIZE];
        lead[..4].copy_from_slice(b"\x7fELF");
        let err = read_header(&mut lead.as_slice()).unwrap_err();
        assert!(matches!(err, PackageError::InvalidHeader(_)));
    }

    #[test]
    fn test_rejects_truncated_file() {
        let bytes = RpmBuilder::new("demo", "1.0.0", "1.el8")
            .payload(Vec::new())
            .build();
        for cut in [LEAD_SIZE, LEAD_SIZE + 20, bytes.len() - 1] {
            let err = read_header(&mut &bytes[..cut]).unwrap_err();
            assert!(
                matches!(err, PackageError::InvalidHeader(_)),
                "cut at {cut}: {err}"
            );
        }
    }

    #[test]
    fn test_rejects_oversized_declarations() {
        let mut bytes = RpmBuilder::new("demo", "1.0.0", "1.el8").build();
        // Entry count of the signature header.
        bytes[LEAD_SIZE + 8..LEAD_SIZE + 12].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            read_header(&mut bytes.as_slice()),
            Err(PackageError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_missing_name_tag() {
        let bytes = RpmBuilder::new("demo", "1.0.0", "1.el8")
            .omit_tag(TAG_NAME)
            .build();
        assert!(matches!(
            read_header(&mut bytes.as_slice()),
            Err(PackageError::MissingTag("NAME"))
        ));
    }
}
