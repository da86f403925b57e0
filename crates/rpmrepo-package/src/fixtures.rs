//! Synthetic RPM files for tests.
//!
//! The output carries a valid lead, a signature header and a main header
//! with the identifying tags, followed by an opaque payload. That is enough
//! for the header reader and for fake indexing tools, not for `rpm -i`.

use crate::header::{
    HEADER_MAGIC, LEAD_MAGIC, LEAD_SIZE, TAG_ARCH, TAG_EPOCH, TAG_NAME, TAG_RELEASE,
    TAG_SOURCERPM, TAG_VERSION, TYPE_INT32, TYPE_STRING,
};

const SIGTAG_SIZE: u32 = 1000;

enum Value {
    Str(String),
    Int(u32),
}

/// Builder for synthetic RPM files.
#[derive(Debug, Clone)]
pub struct RpmBuilder {
    name: String,
    version: String,
    release: String,
    arch: String,
    epoch: Option<u32>,
    source: bool,
    payload: Option<Vec<u8>>,
    omitted: Vec<u32>,
}

impl RpmBuilder {
    pub fn new(name: &str, version: &str, release: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            release: release.to_string(),
            arch: "x86_64".to_string(),
            epoch: None,
            source: false,
            payload: None,
            omitted: Vec::new(),
        }
    }

    pub fn arch(mut self, arch: &str) -> Self {
        self.arch = arch.to_string();
        self
    }

    pub fn epoch(mut self, epoch: u32) -> Self {
        self.epoch = Some(epoch);
        self
    }

    /// Builds a source package (no SOURCERPM tag).
    pub fn source(mut self) -> Self {
        self.source = true;
        self
    }

    /// Bytes appended after the headers. Distinct payloads give packages
    /// with the same name different content.
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Leaves `tag` out of the main header.
    pub fn omit_tag(mut self, tag: u32) -> Self {
        self.omitted.push(tag);
        self
    }

    /// File name rpmbuild would give this package.
    pub fn file_name(&self) -> String {
        let arch = if self.source { "src" } else { &self.arch };
        format!("{}-{}-{}.{arch}.rpm", self.name, self.version, self.release)
    }

    pub fn build(&self) -> Vec<u8> {
        let payload = self.payload.clone().unwrap_or_else(|| {
            format!("payload:{}-{}-{}", self.name, self.version, self.release).into_bytes()
        });

        let mut out = Vec::new();
        out.extend_from_slice(&self.lead());

        let signature = header_block(&[(SIGTAG_SIZE, Value::Int(payload.len() as u32))]);
        out.extend_from_slice(&signature);
        out.resize(out.len() + (8 - signature.len() % 8) % 8, 0);

        let mut tags = vec![
            (TAG_NAME, Value::Str(self.name.clone())),
            (TAG_VERSION, Value::Str(self.version.clone())),
            (TAG_RELEASE, Value::Str(self.release.clone())),
        ];
        if let Some(epoch) = self.epoch {
            tags.push((TAG_EPOCH, Value::Int(epoch)));
        }
        tags.push((TAG_ARCH, Value::Str(self.arch.clone())));
        if !self.source {
            tags.push((
                TAG_SOURCERPM,
                Value::Str(format!(
                    "{}-{}-{}.src.rpm",
                    self.name, self.version, self.release
                )),
            ));
        }
        tags.retain(|(tag, _)| !self.omitted.contains(tag));

        out.extend_from_slice(&header_block(&tags));
        out.extend_from_slice(&payload);
        out
    }

    fn lead(&self) -> [u8; LEAD_SIZE] {
        let mut lead = [0u8; LEAD_SIZE];
        lead[..4].copy_from_slice(&LEAD_MAGIC);
        lead[4] = 3;
        lead[6..8].copy_from_slice(&u16::from(self.source).to_be_bytes());
        lead[8..10].copy_from_slice(&1u16.to_be_bytes());

        let nevr = format!("{}-{}-{}", self.name, self.version, self.release);
        let len = nevr.len().min(65);
        lead[10..10 + len].copy_from_slice(&nevr.as_bytes()[..len]);

        lead[76..78].copy_from_slice(&1u16.to_be_bytes());
        lead[78..80].copy_from_slice(&5u16.to_be_bytes());
        lead
    }
}

fn header_block(tags: &[(u32, Value)]) -> Vec<u8> {
    let mut index = Vec::new();
    let mut store: Vec<u8> = Vec::new();

    for (tag, value) in tags {
        let (kind, offset) = match value {
            Value::Str(s) => {
                let offset = store.len();
                store.extend_from_slice(s.as_bytes());
                store.push(0);
                (TYPE_STRING, offset)
            }
            Value::Int(n) => {
                store.resize(store.len().div_ceil(4) * 4, 0);
                let offset = store.len();
                store.extend_from_slice(&n.to_be_bytes());
                (TYPE_INT32, offset)
            }
        };
        index.extend_from_slice(&tag.to_be_bytes());
        index.extend_from_slice(&kind.to_be_bytes());
        index.extend_from_slice(&(offset as u32).to_be_bytes());
        index.extend_from_slice(&1u32.to_be_bytes());
    }

    let mut block = Vec::with_capacity(16 + index.len() + store.len());
    block.extend_from_slice(&HEADER_MAGIC);
    block.extend_from_slice(&[0u8; 4]);
    block.extend_from_slice(&(tags.len() as u32).to_be_bytes());
    block.extend_from_slice(&(store.len() as u32).to_be_bytes());
    block.extend_from_slice(&index);
    block.extend_from_slice(&store);
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name() {
        let builder = RpmBuilder::new("demo", "1.0.0", "1.el8");
        assert_eq!(builder.file_name(), "demo-1.0.0-1.el8.x86_64.rpm");
        assert_eq!(builder.source().file_name(), "demo-1.0.0-1.el8.src.rpm");
    }

    #[test]
    fn test_payload_changes_content_only() {
        let a = RpmBuilder::new("demo", "1.0.0", "1.el8").payload("a").build();
        let b = RpmBuilder::new("demo", "1.0.0", "1.el8").payload("b").build();
        assert_ne!(a, b);
        assert_eq!(a.len(), b.len());
        assert_eq!(&a[..4], &LEAD_MAGIC);
    }

    #[test]
    fn test_signature_is_padded() {
        let bytes = RpmBuilder::new("demo", "1.0.0", "1.el8").build();
        // One INT32 entry: 16 + 16 + 4 = 36 bytes, padded to 40.
        assert_eq!(&bytes[LEAD_SIZE + 40..LEAD_SIZE + 44], &HEADER_MAGIC);
    }
}
