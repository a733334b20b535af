//! Binary note container.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! +--------+---------+----------+----------+----------+--------+-------+
//! | "HYPN" | version | meta_len | metadata | body_len |  body  | crc32 |
//! | 4 B    | 1 B     | u32      | JSON     | u64      | opaque | u32   |
//! +--------+---------+----------+----------+----------+--------+-------+
//! ```
//!
//! The CRC-32 (IEEE) is computed over the metadata bytes followed by the body
//! bytes, and is verified before the metadata JSON is parsed.

use crate::note::NoteMeta;
use thiserror::Error;

pub const MAGIC: [u8; 4] = *b"HYPN";
pub const FORMAT_VERSION: u8 = 1;

const HEADER_LEN: usize = MAGIC.len() + 1 + 4;
const BODY_LEN_FIELD: usize = 8;
const CHECKSUM_LEN: usize = 4;

/// Smallest well-formed container: empty metadata and empty body.
pub const MIN_CONTAINER_LEN: usize = HEADER_LEN + BODY_LEN_FIELD + CHECKSUM_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContainerError {
    #[error("Invalid container: too short ({0} bytes)")]
    TooShort(usize),
    #[error("Invalid container: bad magic")]
    BadMagic,
    #[error("Unsupported container version: {0}")]
    UnsupportedVersion(u8),
    #[error("Invalid container: metadata overflow")]
    MetadataOverflow,
    #[error("Invalid container: malformed metadata: {0}")]
    MalformedMetadata(String),
    #[error("Invalid container: missing body length")]
    MissingBodyLength,
    #[error("Invalid container: body overflow")]
    BodyOverflow,
    #[error("Invalid container: checksum mismatch (expected {expected:#010x}, got {actual:#010x})")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("Metadata too large: {0} bytes")]
    MetadataTooLarge(usize),
    #[error("Failed to encode metadata: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, ContainerError>;

/// Fully decoded container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedContainer {
    pub meta: NoteMeta,
    pub body: Vec<u8>,
}

/// Offsets of the regions inside a structurally valid container.
struct Layout {
    metadata: std::ops::Range<usize>,
    body: std::ops::Range<usize>,
    checksum_at: usize,
}

pub fn encode(meta: &NoteMeta, body: &[u8]) -> Result<Vec<u8>> {
    let metadata = serde_json::to_vec(meta).map_err(|e| ContainerError::Encode(e.to_string()))?;
    let metadata_len =
        u32::try_from(metadata.len()).map_err(|_| ContainerError::MetadataTooLarge(metadata.len()))?;

    let mut out = Vec::with_capacity(MIN_CONTAINER_LEN + metadata.len() + body.len());
    out.extend_from_slice(&MAGIC);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&metadata_len.to_be_bytes());
    out.extend_from_slice(&metadata);
    out.extend_from_slice(&(body.len() as u64).to_be_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(&checksum(&metadata, body).to_be_bytes());
    Ok(out)
}

/// Read only the metadata. Body and checksum are not inspected.
pub fn decode_metadata(bytes: &[u8]) -> Result<NoteMeta> {
    let metadata = read_header(bytes)?;
    parse_metadata(&bytes[metadata])
}

pub fn decode(bytes: &[u8]) -> Result<DecodedContainer> {
    let layout = read_layout(bytes)?;

    let metadata = &bytes[layout.metadata];
    let body = &bytes[layout.body];
    let expected = read_u32(bytes, layout.checksum_at);
    let actual = checksum(metadata, body);
    if expected != actual {
        return Err(ContainerError::ChecksumMismatch { expected, actual });
    }

    Ok(DecodedContainer {
        meta: parse_metadata(metadata)?,
        body: body.to_vec(),
    })
}

fn read_header(bytes: &[u8]) -> Result<std::ops::Range<usize>> {
    if bytes.len() < MIN_CONTAINER_LEN {
        return Err(ContainerError::TooShort(bytes.len()));
    }
    if bytes[..MAGIC.len()] != MAGIC {
        return Err(ContainerError::BadMagic);
    }
    let version = bytes[MAGIC.len()];
    if version != FORMAT_VERSION {
        return Err(ContainerError::UnsupportedVersion(version));
    }

    let metadata_len = read_u32(bytes, MAGIC.len() + 1) as usize;
    let metadata_end = HEADER_LEN
        .checked_add(metadata_len)
        .ok_or(ContainerError::MetadataOverflow)?;
    if metadata_end > bytes.len() {
        return Err(ContainerError::MetadataOverflow);
    }
    Ok(HEADER_LEN..metadata_end)
}

fn read_layout(bytes: &[u8]) -> Result<Layout> {
    let metadata = read_header(bytes)?;

    let body_len_at = metadata.end;
    if body_len_at + BODY_LEN_FIELD > bytes.len() {
        return Err(ContainerError::MissingBodyLength);
    }
    let mut len = [0u8; BODY_LEN_FIELD];
    len.copy_from_slice(&bytes[body_len_at..body_len_at + BODY_LEN_FIELD]);
    let body_len = usize::try_from(u64::from_be_bytes(len)).map_err(|_| ContainerError::BodyOverflow)?;

    let body_start = body_len_at + BODY_LEN_FIELD;
    let body_end = body_start
        .checked_add(body_len)
        .ok_or(ContainerError::BodyOverflow)?;
    match body_end.checked_add(CHECKSUM_LEN) {
        Some(end) if end <= bytes.len() => {}
        _ => return Err(ContainerError::BodyOverflow),
    }

    Ok(Layout {
        metadata,
        body: body_start..body_end,
        checksum_at: body_end,
    })
}

fn parse_metadata(bytes: &[u8]) -> Result<NoteMeta> {
    serde_json::from_slice(bytes).map_err(|e| ContainerError::MalformedMetadata(e.to_string()))
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_be_bytes(buf)
}

fn checksum(metadata: &[u8], body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(metadata);
    hasher.update(body);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> NoteMeta {
        NoteMeta {
            id: "note-1".to_string(),
            title: "Alpha".to_string(),
            created_at: 1_700_000_000_000,
            updated_at: 1_700_000_000_500,
            deleted_at: None,
            body: None,
        }
    }

    fn sample_container() -> Vec<u8> {
        encode(&sample_meta(), &[1, 2, 3, 4, 5]).unwrap()
    }

    // ==================== Layout ====================

    #[test]
    fn test_crc32_known_vector() {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(b"123456789");
        assert_eq!(hasher.finalize(), 0xCBF4_3926);
    }

    #[test]
    fn test_header_layout() {
        let bytes = sample_container();
        assert_eq!(&bytes[..4], &[0x48, 0x59, 0x50, 0x4E]);
        assert_eq!(bytes[4], FORMAT_VERSION);

        let metadata_len = read_u32(&bytes, 5) as usize;
        let metadata = serde_json::to_vec(&sample_meta()).unwrap();
        assert_eq!(metadata_len, metadata.len());
        assert_eq!(bytes.len(), MIN_CONTAINER_LEN + metadata.len() + 5);
    }

    #[test]
    fn test_round_trip() {
        let meta = sample_meta();
        let decoded = decode(&encode(&meta, b"crdt-state").unwrap()).unwrap();
        assert_eq!(decoded.meta, meta);
        assert_eq!(decoded.body, b"crdt-state");
    }

    #[test]
    fn test_round_trip_empty_body() {
        let decoded = decode(&encode(&sample_meta(), &[]).unwrap()).unwrap();
        assert!(decoded.body.is_empty());
    }

    #[test]
    fn test_decode_metadata_ignores_checksum() {
        let mut bytes = sample_container();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        assert_eq!(decode_metadata(&bytes).unwrap(), sample_meta());
        assert!(matches!(
            decode(&bytes),
            Err(ContainerError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_are_tolerated() {
        let mut bytes = sample_container();
        bytes.extend_from_slice(b"junk");
        assert_eq!(decode(&bytes).unwrap().meta, sample_meta());
    }

    // ==================== Tamper detection ====================

    #[test]
    fn test_every_bit_flip_after_header_is_detected() {
        let clean = sample_container();
        let metadata_len = read_u32(&clean, 5) as usize;
        let metadata = HEADER_LEN..HEADER_LEN + metadata_len;
        let body_start = metadata.end + BODY_LEN_FIELD;
        let tail = body_start..clean.len();

        for index in metadata.chain(tail) {
            for bit in 0..8 {
                let mut bytes = clean.clone();
                bytes[index] ^= 1 << bit;
                assert!(
                    matches!(decode(&bytes), Err(ContainerError::ChecksumMismatch { .. })),
                    "flip at byte {index} bit {bit} not detected"
                );
            }
        }
    }

    #[test]
    fn test_title_tamper_is_detected() {
        let mut bytes = sample_container();
        let metadata_len = read_u32(&bytes, 5) as usize;
        let region = HEADER_LEN..HEADER_LEN + metadata_len;
        let text = String::from_utf8(bytes[region.clone()].to_vec()).unwrap();
        let tampered = text.replace("Alpha", "Bravo");
        bytes[region].copy_from_slice(tampered.as_bytes());

        assert!(matches!(
            decode(&bytes),
            Err(ContainerError::ChecksumMismatch { .. })
        ));
    }

    // ==================== Structural errors ====================

    #[test]
    fn test_too_short() {
        assert_eq!(decode(&[0u8; 20]), Err(ContainerError::TooShort(20)));
        assert_eq!(decode_metadata(b"HYPN"), Err(ContainerError::TooShort(4)));
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample_container();
        bytes[0] = b'X';
        assert_eq!(decode(&bytes), Err(ContainerError::BadMagic));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = sample_container();
        bytes[4] = 2;
        assert_eq!(decode(&bytes), Err(ContainerError::UnsupportedVersion(2)));
    }

    #[test]
    fn test_metadata_overflow() {
        let mut bytes = sample_container();
        bytes[5..9].copy_from_slice(&u32::MAX.to_be_bytes());
        assert_eq!(decode(&bytes), Err(ContainerError::MetadataOverflow));
    }

    #[test]
    fn test_missing_body_length() {
        // Metadata length claims everything up to the last 4 bytes
        let mut bytes = sample_container();
        let claimed = (bytes.len() - HEADER_LEN - 4) as u32;
        bytes[5..9].copy_from_slice(&claimed.to_be_bytes());
        assert_eq!(decode(&bytes), Err(ContainerError::MissingBodyLength));
    }

    #[test]
    fn test_body_overflow() {
        let mut bytes = sample_container();
        let metadata_len = read_u32(&bytes, 5) as usize;
        let at = HEADER_LEN + metadata_len;
        bytes[at..at + 8].copy_from_slice(&1_000u64.to_be_bytes());
        assert_eq!(decode(&bytes), Err(ContainerError::BodyOverflow));
    }

    #[test]
    fn test_malformed_metadata() {
        // Valid layout and checksum around metadata that is not a NoteMeta
        let metadata = br#"{"id":1}"#;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.push(FORMAT_VERSION);
        bytes.extend_from_slice(&(metadata.len() as u32).to_be_bytes());
        bytes.extend_from_slice(metadata);
        bytes.extend_from_slice(&0u64.to_be_bytes());
        bytes.extend_from_slice(&checksum(metadata, &[]).to_be_bytes());

        assert!(matches!(
            decode(&bytes),
            Err(ContainerError::MalformedMetadata(_))
        ));
        assert!(matches!(
            decode_metadata(&bytes),
            Err(ContainerError::MalformedMetadata(_))
        ));
    }
}
