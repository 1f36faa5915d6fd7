//! Binary persistence for transformed numeric arrays.
//!
//! Layout: the 6-byte magic `NSARR1`, row count and column count as
//! little-endian `u64`, then the values row-major as little-endian `f64`.

use crate::error::MlError;
use ndarray::Array2;
use std::path::Path;

const MAGIC: &[u8; 6] = b"NSARR1";
const HEADER_LEN: usize = MAGIC.len() + 16;

pub fn encode_array(array: &Array2<f64>) -> Vec<u8> {
    let (rows, cols) = array.dim();
    let mut out = Vec::with_capacity(HEADER_LEN + rows * cols * 8);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(rows as u64).to_le_bytes());
    out.extend_from_slice(&(cols as u64).to_le_bytes());
    for value in array.iter() {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_array(bytes: &[u8]) -> Result<Array2<f64>, MlError> {
    if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err(MlError::transformation("not a transformed array file"));
    }
    let read_u64 = |at: usize| -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[at..at + 8]);
        u64::from_le_bytes(buf)
    };
    let rows = read_u64(MAGIC.len()) as usize;
    let cols = read_u64(MAGIC.len() + 8) as usize;
    let body = &bytes[HEADER_LEN..];
    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(8))
        .ok_or_else(|| MlError::transformation("array dimensions overflow"))?;
    if body.len() != expected {
        return Err(MlError::transformation(format!(
            "array body is {} bytes, expected {expected} for {rows}x{cols}",
            body.len()
        )));
    }
    let values: Vec<f64> = body
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            f64::from_le_bytes(buf)
        })
        .collect();
    Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| MlError::transformation(format!("bad array shape: {e}")))
}

/// Write an array, creating parent directories.
pub fn save_array(path: &Path, array: &Array2<f64>) -> Result<(), MlError> {
    crate::persistence::write_artifact(path, &encode_array(array))
}

pub fn load_array(path: &Path) -> Result<Array2<f64>, MlError> {
    let bytes = std::fs::read(path)?;
    decode_array(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("t").join("train.arr");
        let a = array![[1.0, -1.0, 0.5], [0.0, 2.0, 1.0]];
        save_array(&path, &a).unwrap();
        assert_eq!(load_array(&path).unwrap(), a);
    }

    #[test]
    fn test_truncated_body_rejected() {
        let mut bytes = encode_array(&array![[1.0, 2.0]]);
        bytes.pop();
        assert!(decode_array(&bytes).is_err());
        assert!(decode_array(b"garbage").is_err());
    }
}
