//! File and instance identifiers.

use std::fmt;
use std::str::FromStr;

use godfs_constants::FILE_ID_LEN;
use godfs_constants::INSTANCE_ID_LEN;
use godfs_constants::store::SHARD_HEX_DIGITS;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Deserialize;
use serde::Serialize;

use crate::error::TypeError;

/// Identifier of a stored file.
///
/// A file id is the content address of the file: `cc/dd/<md5>` where `ccdd`
/// are the trailing hex digits of the CRC32 of the content and `<md5>` is the
/// lowercase hex MD5 digest. Identical content therefore always has the same id
/// on every node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileId(String);

impl FileId {
    /// Build a file id from a CRC32 checksum and an MD5 digest.
    pub fn from_digests(crc32: u32, md5: [u8; 16]) -> Self {
        let crc_hex = format!("{crc32:08x}");
        let shard = &crc_hex[crc_hex.len() - SHARD_HEX_DIGITS..];
        Self(format!("{}/{}/{}", &shard[..2], &shard[2..], hex::encode(md5)))
    }

    /// Parse and validate a file id.
    pub fn parse(value: &str) -> Result<Self, TypeError> {
        let invalid = |reason: &str| TypeError::InvalidFileId {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        if value.len() != FILE_ID_LEN {
            return Err(invalid("wrong length"));
        }
        let bytes = value.as_bytes();
        if bytes[2] != b'/' || bytes[5] != b'/' {
            return Err(invalid("missing shard separators"));
        }
        let hex_ok = bytes
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 2 && *i != 5)
            .all(|(_, b)| b.is_ascii_digit() || (b'a'..=b'f').contains(b));
        if !hex_ok {
            return Err(invalid("expected lowercase hex digits"));
        }
        Ok(Self(value.to_string()))
    }

    /// The first shard directory component.
    pub fn shard_outer(&self) -> &str {
        &self.0[..2]
    }

    /// The second shard directory component.
    pub fn shard_inner(&self) -> &str {
        &self.0[3..5]
    }

    /// The MD5 identity name.
    pub fn md5_hex(&self) -> &str {
        &self.0[6..]
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id as the fixed-width bytes stored in a binlog record.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FileId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FileId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FileId> for String {
    fn from(id: FileId) -> Self {
        id.0
    }
}

/// Stable identifier of a cluster participant.
///
/// Eight ASCII alphanumerics, generated once at first boot and persisted by the
/// node. The fixed width lets the id be embedded in binlog records.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceId([u8; INSTANCE_ID_LEN]);

impl InstanceId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; INSTANCE_ID_LEN];
        let mut rng = rand::thread_rng();
        for (slot, ch) in bytes.iter_mut().zip((&mut rng).sample_iter(&Alphanumeric)) {
            *slot = ch;
        }
        Self(bytes)
    }

    /// Parse and validate an id.
    pub fn parse(value: &str) -> Result<Self, TypeError> {
        Self::from_bytes(value.as_bytes()).ok_or_else(|| TypeError::InvalidInstanceId {
            value: value.to_string(),
        })
    }

    /// Build an id from its fixed-width encoding.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != INSTANCE_ID_LEN || !bytes.iter().all(u8::is_ascii_alphanumeric) {
            return None;
        }
        let mut out = [0u8; INSTANCE_ID_LEN];
        out.copy_from_slice(bytes);
        Some(Self(out))
    }

    /// The fixed-width encoding.
    pub fn as_bytes(&self) -> &[u8; INSTANCE_ID_LEN] {
        &self.0
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        // Construction only admits ASCII alphanumerics.
        std::str::from_utf8(&self.0).unwrap_or("????????")
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.as_str())
    }
}

impl FromStr for InstanceId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for InstanceId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<InstanceId> for String {
    fn from(id: InstanceId) -> Self {
        id.as_str().to_string()
    }
}
