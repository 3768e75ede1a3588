//! GGUF model files: acceptance check, import, and chat-template lookup.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::core::error::ModelFileError;

pub const GGUF_MAGIC: [u8; 4] = [0x47, 0x47, 0x55, 0x46];

const CHAT_TEMPLATE_KEY: &str = "tokenizer.chat_template";

/// Refuse absurd lengths from corrupt headers before allocating.
const MAX_STRING_LEN: u64 = 16 * 1024 * 1024;

/// Deepest array-of-array nesting accepted in metadata.
const MAX_ARRAY_DEPTH: usize = 8;

/// Accepts the file only if it starts with the GGUF magic bytes.
pub fn check_magic(path: &Path) -> Result<(), ModelFileError> {
    let mut file = File::open(path)?;
    let mut magic = Vec::with_capacity(4);
    file.by_ref().take(4).read_to_end(&mut magic)?;
    if magic != GGUF_MAGIC {
        return Err(ModelFileError::BadMagic(magic));
    }
    Ok(())
}

/// Validates `src` and copies it into `models_dir`, returning the new path.
/// Nothing is copied when validation fails.
pub async fn import_model(src: &Path, models_dir: &Path) -> Result<PathBuf, ModelFileError> {
    check_magic(src)?;

    let file_name = src
        .file_name()
        .ok_or_else(|| ModelFileError::Io(format!("{} has no file name", src.display())))?;
    tokio::fs::create_dir_all(models_dir).await?;
    let dest = models_dir.join(file_name);
    tokio::fs::copy(src, &dest).await?;

    tracing::info!(from = %src.display(), to = %dest.display(), "imported model file");
    Ok(dest)
}

/// Reads `tokenizer.chat_template` from the file's metadata, if present.
pub fn read_chat_template(path: &Path) -> Result<Option<String>, ModelFileError> {
    let reader = BufReader::new(File::open(path)?);
    read_chat_template_from(reader)
}

pub fn read_chat_template_from<R: Read>(mut reader: R) -> Result<Option<String>, ModelFileError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != GGUF_MAGIC {
        return Err(ModelFileError::BadMagic(magic.to_vec()));
    }

    let version = read_u32(&mut reader)?;
    if version < 2 {
        return Err(ModelFileError::Metadata(format!(
            "unsupported GGUF version {version}"
        )));
    }
    let _tensor_count = read_u64(&mut reader)?;
    let kv_count = read_u64(&mut reader)?;

    for _ in 0..kv_count {
        let key = read_string(&mut reader)?;
        let value_type = ValueType::from_u32(read_u32(&mut reader)?)?;
        if key == CHAT_TEMPLATE_KEY && value_type == ValueType::String {
            return Ok(Some(read_string(&mut reader)?));
        }
        skip_value(&mut reader, value_type, 0)?;
    }

    Ok(None)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    Bool,
    String,
    Array,
    U64,
    I64,
    F64,
}

impl ValueType {
    fn from_u32(raw: u32) -> Result<Self, ModelFileError> {
        Ok(match raw {
            0 => Self::U8,
            1 => Self::I8,
            2 => Self::U16,
            3 => Self::I16,
            4 => Self::U32,
            5 => Self::I32,
            6 => Self::F32,
            7 => Self::Bool,
            8 => Self::String,
            9 => Self::Array,
            10 => Self::U64,
            11 => Self::I64,
            12 => Self::F64,
            other => {
                return Err(ModelFileError::Metadata(format!(
                    "unknown value type {other}"
                )))
            }
        })
    }

    /// Width in bytes of fixed-size types.
    fn fixed_size(self) -> Option<u64> {
        match self {
            Self::U8 | Self::I8 | Self::Bool => Some(1),
            Self::U16 | Self::I16 => Some(2),
            Self::U32 | Self::I32 | Self::F32 => Some(4),
            Self::U64 | Self::I64 | Self::F64 => Some(8),
            Self::String | Self::Array => None,
        }
    }
}

fn skip_value<R: Read>(
    reader: &mut R,
    value_type: ValueType,
    depth: usize,
) -> Result<(), ModelFileError> {
    match value_type {
        ValueType::String => {
            let len = read_u64(reader)?;
            skip_bytes(reader, len)
        }
        ValueType::Array => {
            if depth >= MAX_ARRAY_DEPTH {
                return Err(ModelFileError::Metadata(format!(
                    "arrays nested deeper than {MAX_ARRAY_DEPTH}"
                )));
            }
            let elem_type = ValueType::from_u32(read_u32(reader)?)?;
            let count = read_u64(reader)?;
            match elem_type.fixed_size() {
                Some(size) => {
                    let total = count.checked_mul(size).ok_or_else(|| {
                        ModelFileError::Metadata("array length overflow".into())
                    })?;
                    skip_bytes(reader, total)
                }
                None => {
                    for _ in 0..count {
                        skip_value(reader, elem_type, depth + 1)?;
                    }
                    Ok(())
                }
            }
        }
        fixed => skip_bytes(reader, fixed.fixed_size().unwrap_or(0)),
    }
}

fn skip_bytes<R: Read>(reader: &mut R, len: u64) -> Result<(), ModelFileError> {
    let skipped = std::io::copy(&mut reader.by_ref().take(len), &mut std::io::sink())?;
    if skipped != len {
        return Err(ModelFileError::Metadata("unexpected end of file".into()));
    }
    Ok(())
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, ModelFileError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64, ModelFileError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_string<R: Read>(reader: &mut R) -> Result<String, ModelFileError> {
    let len = read_u64(reader)?;
    if len > MAX_STRING_LEN {
        return Err(ModelFileError::Metadata(format!("string of {len} bytes")));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| ModelFileError::Metadata(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn put_string(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    /// Header with a u32 kv, a string-array kv, then the template.
    fn sample_header(template: Option<&str>) -> Vec<u8> {
        let mut buf = GGUF_MAGIC.to_vec();
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        let kv_count: u64 = if template.is_some() { 3 } else { 2 };
        buf.extend_from_slice(&kv_count.to_le_bytes());

        put_string(&mut buf, "general.quantization_version");
        buf.extend_from_slice(&4u32.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes());

        put_string(&mut buf, "tokenizer.ggml.tokens");
        buf.extend_from_slice(&9u32.to_le_bytes());
        buf.extend_from_slice(&8u32.to_le_bytes());
        buf.extend_from_slice(&2u64.to_le_bytes());
        put_string(&mut buf, "<s>");
        put_string(&mut buf, "</s>");

        if let Some(t) = template {
            put_string(&mut buf, CHAT_TEMPLATE_KEY);
            buf.extend_from_slice(&8u32.to_le_bytes());
            put_string(&mut buf, t);
        }
        buf
    }

    #[test]
    fn finds_chat_template_after_other_keys() {
        let header = sample_header(Some("{{ messages }}"));
        let template = read_chat_template_from(Cursor::new(header)).unwrap();
        assert_eq!(template.as_deref(), Some("{{ messages }}"));
    }

    #[test]
    fn missing_chat_template_is_none() {
        let header = sample_header(None);
        assert_eq!(read_chat_template_from(Cursor::new(header)).unwrap(), None);
    }

    #[test]
    fn truncated_header_is_an_error() {
        let mut header = sample_header(Some("tmpl"));
        header.truncate(40);
        assert!(read_chat_template_from(Cursor::new(header)).is_err());
    }

    #[test]
    fn deeply_nested_arrays_are_rejected() {
        let mut buf = GGUF_MAGIC.to_vec();
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&1u64.to_le_bytes());
        put_string(&mut buf, "general.nested");
        buf.extend_from_slice(&9u32.to_le_bytes());
        // Each level declares one element of type array.
        for _ in 0..100_000 {
            buf.extend_from_slice(&9u32.to_le_bytes());
            buf.extend_from_slice(&1u64.to_le_bytes());
        }

        let err = read_chat_template_from(Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, ModelFileError::Metadata(ref m) if m.contains("nested")));
    }

    #[test]
    fn shallow_nested_arrays_are_skipped() {
        let mut buf = GGUF_MAGIC.to_vec();
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&2u64.to_le_bytes());
        put_string(&mut buf, "general.pairs");
        buf.extend_from_slice(&9u32.to_le_bytes());
        buf.extend_from_slice(&9u32.to_le_bytes());
        buf.extend_from_slice(&1u64.to_le_bytes());
        buf.extend_from_slice(&4u32.to_le_bytes());
        buf.extend_from_slice(&2u64.to_le_bytes());
        buf.extend_from_slice(&7u32.to_le_bytes());
        buf.extend_from_slice(&9u32.to_le_bytes());
        put_string(&mut buf, CHAT_TEMPLATE_KEY);
        buf.extend_from_slice(&8u32.to_le_bytes());
        put_string(&mut buf, "tmpl");

        let template = read_chat_template_from(Cursor::new(buf)).unwrap();
        assert_eq!(template.as_deref(), Some("tmpl"));
    }

    #[test]
    fn check_magic_accepts_gguf_and_rejects_others() {
        let tmp = tempfile::tempdir().unwrap();
        let good = tmp.path().join("good.gguf");
        let bad = tmp.path().join("bad.bin");
        let short = tmp.path().join("short.bin");
        std::fs::write(&good, sample_header(None)).unwrap();
        std::fs::write(&bad, b"PK\x03\x04rest").unwrap();
        std::fs::write(&short, b"GG").unwrap();

        assert!(check_magic(&good).is_ok());
        assert!(matches!(check_magic(&bad), Err(ModelFileError::BadMagic(_))));
        assert!(matches!(check_magic(&short), Err(ModelFileError::BadMagic(_))));
    }

    #[tokio::test]
    async fn import_rejects_before_copying() {
        let tmp = tempfile::tempdir().unwrap();
        let models = tmp.path().join("models");
        let bad = tmp.path().join("notes.txt");
        std::fs::write(&bad, b"hello world").unwrap();

        assert!(import_model(&bad, &models).await.is_err());
        assert!(!models.join("notes.txt").exists());
    }

    #[tokio::test]
    async fn import_copies_valid_file() {
        let tmp = tempfile::tempdir().unwrap();
        let models = tmp.path().join("models");
        let src = tmp.path().join("tiny.gguf");
        std::fs::write(&src, sample_header(Some("t"))).unwrap();

        let dest = import_model(&src, &models).await.unwrap();
        assert_eq!(dest, models.join("tiny.gguf"));
        assert_eq!(read_chat_template(&dest).unwrap().as_deref(), Some("t"));
    }
}
