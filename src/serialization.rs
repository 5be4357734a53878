//! Binary codec for the on-disk part format.
//!
//! Every integer and length prefix is a little-endian `u64`; byte strings
//! are a `u64` length followed by the raw bytes. A granule is stored as
//! one file per column:
//!
//! ```text
//! granule_<i>_keys.bin        u64 count, then count length-prefixed strings
//! granule_<i>_values.bin      u64 count, then count length-prefixed strings
//! granule_<i>_timestamps.bin  u64 count, then count u64 values
//! ```
//!
//! The three files of a granule must agree on `count`. Decoding is
//! bounds-checked: a length prefix that runs past the end of the file is
//! a [`Error::Decode`], never an allocation.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::granule::{Granule, GRANULE_SIZE};
use crate::row::Row;

pub fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<()> {
    writer.write_u64::<LittleEndian>(value)?;
    Ok(())
}

pub fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    writer.write_u64::<LittleEndian>(bytes.len() as u64)?;
    writer.write_all(bytes)?;
    Ok(())
}

pub fn read_u64(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<u64> {
    cursor
        .read_u64::<LittleEndian>()
        .map_err(|e| Error::Decode(field, e.to_string()))
}

pub fn read_bytes(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<Vec<u8>> {
    let len = read_u64(cursor, field)? as usize;
    let start = cursor.position() as usize;
    let data = *cursor.get_ref();

    let end = start
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| {
            Error::Decode(field, format!("length prefix {len} exceeds remaining bytes"))
        })?;

    cursor.set_position(end as u64);
    Ok(data[start..end].to_vec())
}

/// Writes `count` followed by each entry as a length-prefixed string.
pub fn write_bytes_vector(path: &Path, entries: &[Vec<u8>]) -> Result<()> {
    let mut buffer = Vec::new();
    write_u64(&mut buffer, entries.len() as u64)?;
    for entry in entries {
        write_bytes(&mut buffer, entry)?;
    }
    fs::write(path, buffer)?;
    Ok(())
}

pub fn read_bytes_vector(path: &Path, field: &'static str) -> Result<Vec<Vec<u8>>> {
    let data = fs::read(path)?;
    let mut cursor = Cursor::new(data.as_slice());

    let count = read_u64(&mut cursor, field)? as usize;
    let mut entries = Vec::new();
    for _ in 0..count {
        entries.push(read_bytes(&mut cursor, field)?);
    }
    Ok(entries)
}

/// Writes `count` followed by each value as a little-endian `u64`.
pub fn write_u64_vector(path: &Path, values: &[u64]) -> Result<()> {
    let mut buffer = Vec::new();
    write_u64(&mut buffer, values.len() as u64)?;
    for &value in values {
        write_u64(&mut buffer, value)?;
    }
    fs::write(path, buffer)?;
    Ok(())
}

pub fn read_u64_vector(path: &Path, field: &'static str) -> Result<Vec<u64>> {
    let data = fs::read(path)?;
    let mut cursor = Cursor::new(data.as_slice());

    let count = read_u64(&mut cursor, field)? as usize;
    let remaining = data.len().saturating_sub(cursor.position() as usize);
    if count.checked_mul(8).map_or(true, |bytes| bytes > remaining) {
        return Err(Error::Decode(
            field,
            format!("count prefix {count} exceeds remaining bytes"),
        ));
    }

    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(read_u64(&mut cursor, field)?);
    }
    Ok(values)
}

fn granule_column_path(dir: &Path, granule_index: usize, column: &str) -> PathBuf {
    dir.join(format!("granule_{granule_index}_{column}.bin"))
}

/// Writes a granule's rows as three column files under `dir`.
pub fn write_granule(dir: &Path, granule: &Granule, granule_index: usize) -> Result<()> {
    let rows = granule.rows();

    let mut keys = Vec::with_capacity(rows.len());
    let mut values = Vec::with_capacity(rows.len());
    let mut timestamps = Vec::with_capacity(rows.len());

    for row in rows {
        keys.push(row.key.clone());
        values.push(row.value.clone());
        timestamps.push(row.timestamp);
    }

    write_bytes_vector(&granule_column_path(dir, granule_index, "keys"), &keys)?;
    write_bytes_vector(&granule_column_path(dir, granule_index, "values"), &values)?;
    write_u64_vector(
        &granule_column_path(dir, granule_index, "timestamps"),
        &timestamps,
    )?;
    Ok(())
}

/// Reads the three column files of granule `granule_index` under `dir`
/// back into a sealed granule.
pub fn read_granule(dir: &Path, granule_index: usize) -> Result<Granule> {
    let keys = read_bytes_vector(&granule_column_path(dir, granule_index, "keys"), "keys")?;
    let values = read_bytes_vector(&granule_column_path(dir, granule_index, "values"), "values")?;
    let timestamps = read_u64_vector(
        &granule_column_path(dir, granule_index, "timestamps"),
        "timestamps",
    )?;

    if keys.len() != values.len() || keys.len() != timestamps.len() {
        return Err(Error::Decode(
            "granule columns",
            format!(
                "column counts disagree: {} keys, {} values, {} timestamps",
                keys.len(),
                values.len(),
                timestamps.len()
            ),
        ));
    }
    if keys.len() > GRANULE_SIZE {
        return Err(Error::Decode(
            "granule columns",
            format!("row count {} exceeds granule capacity", keys.len()),
        ));
    }

    let mut granule = Granule::new();
    for ((key, value), timestamp) in keys.into_iter().zip(values).zip(timestamps) {
        granule.add_row(Row {
            key,
            value,
            timestamp,
        })?;
    }
    granule.sort();
    Ok(granule)
}
