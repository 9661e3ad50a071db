//! Vector file format
//!
//! ```text
//! magic   "QMVX"
//! u32     version (1)
//! u32     metric  (0 = inner product, 1 = cosine)
//! u32     dimension
//! u64     count
//! f32 * count * dimension, row-major
//! ```
//! All integers and floats are little-endian.

use crate::index::{IndexError, Metric};
use ndarray::Array2;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 4] = b"QMVX";
const VERSION: u32 = 1;
/// magic + version + metric + dimension + count
const HEADER_LEN: u64 = 4 + 4 + 4 + 4 + 8;

/// Decoded vector file
#[derive(Debug, Clone)]
pub struct VectorFile {
    pub metric: Metric,
    /// One row per passage
    pub vectors: Array2<f32>,
}

pub fn read_vector_file(path: &Path) -> Result<VectorFile, IndexError> {
    if !path.exists() {
        return Err(IndexError::IndexNotFound(path.display().to_string()));
    }

    let file = std::fs::File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(IndexError::Malformed(format!(
            "bad magic {:?} in {}",
            magic,
            path.display()
        )));
    }

    let version = read_u32(&mut reader)?;
    if version != VERSION {
        return Err(IndexError::Malformed(format!(
            "unsupported version {}",
            version
        )));
    }

    let metric = match read_u32(&mut reader)? {
        0 => Metric::InnerProduct,
        1 => Metric::Cosine,
        other => {
            return Err(IndexError::Malformed(format!("unknown metric {}", other)));
        }
    };

    let dimension = read_u32(&mut reader)?;
    let count = read_u64(&mut reader)?;
    if dimension == 0 {
        return Err(IndexError::Malformed("dimension is 0".to_string()));
    }

    // Check the claimed size against the file before allocating for it
    let overflow = || IndexError::Malformed("vector count overflows".to_string());
    let payload_len = count
        .checked_mul(u64::from(dimension))
        .and_then(|values| values.checked_mul(4))
        .ok_or_else(overflow)?;
    let expected_len = payload_len.checked_add(HEADER_LEN).ok_or_else(overflow)?;
    if expected_len != file_len {
        return Err(IndexError::Malformed(format!(
            "header describes {} bytes but {} holds {}",
            expected_len,
            path.display(),
            file_len
        )));
    }

    let count = usize::try_from(count).map_err(|_| overflow())?;
    let dimension = dimension as usize;
    let payload_len = usize::try_from(payload_len).map_err(|_| overflow())?;

    let mut bytes = vec![0u8; payload_len];
    reader.read_exact(&mut bytes)?;

    let data: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    let vectors = Array2::from_shape_vec((count, dimension), data)
        .map_err(|e| IndexError::Malformed(e.to_string()))?;

    Ok(VectorFile { metric, vectors })
}

/// Write a vector file. Index construction happens upstream; this exists for
/// tooling and fixtures.
pub fn write_vector_file(
    path: &Path,
    vectors: &Array2<f32>,
    metric: Metric,
) -> Result<(), IndexError> {
    let mut writer = BufWriter::new(std::fs::File::create(path)?);

    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;
    let metric_tag: u32 = match metric {
        Metric::InnerProduct => 0,
        Metric::Cosine => 1,
    };
    writer.write_all(&metric_tag.to_le_bytes())?;
    writer.write_all(&(vectors.ncols() as u32).to_le_bytes())?;
    writer.write_all(&(vectors.nrows() as u64).to_le_bytes())?;

    for value in vectors.iter() {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()?;

    Ok(())
}

fn read_u32(reader: &mut impl Read) -> Result<u32, IndexError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(reader: &mut impl Read) -> Result<u64, IndexError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
