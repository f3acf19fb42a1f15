use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File};
use std::hash::Hasher;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::{Path, PathBuf};

pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    fs::create_dir_all(path.as_ref())
        .with_context(|| format!("create_dir_all {}", path.as_ref().display()))
}

pub fn list_files_recursive(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(path) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.path().to_path_buf());
        }
    }
    Ok(files)
}

pub fn read_lines(path: impl AsRef<Path>) -> Result<impl Iterator<Item = Result<String>>> {
    let file = File::open(path.as_ref())?;
    let reader = BufReader::new(file);
    Ok(reader.lines().map(|l| l.map_err(anyhow::Error::from)))
}

pub fn hash_to_partition<K: Serialize>(key: &K, num_partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    let bytes = serde_json::to_vec(key).expect("serialize key");
    hasher.write(&bytes);
    (hasher.finish() as usize) % num_partitions
}

pub fn open_writer(path: impl AsRef<Path>) -> Result<BufWriter<File>> {
    if let Some(parent) = path.as_ref().parent() {
        ensure_dir(parent)?;
    }
    let file = File::create(path)?;
    Ok(BufWriter::new(file))
}

// Intermediate record format: [klen u32][vlen u32][key bytes][value bytes],
// little-endian lengths, records back to back with no framing between them.

pub fn append_bin_record(buf: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    let klen = key.len() as u32;
    let vlen = value.len() as u32;
    buf.extend_from_slice(&klen.to_le_bytes());
    buf.extend_from_slice(&vlen.to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
}

/// Reads one record at `off`, returning key bytes, value bytes, and the offset
/// of the next record. Returns `None` at end of input or on a truncated tail.
pub fn read_bin_record(bytes: &[u8], off: usize) -> Option<(&[u8], &[u8], usize)> {
    if off + 8 > bytes.len() {
        return None;
    }
    let klen = u32::from_le_bytes(bytes[off..off + 4].try_into().ok()?) as usize;
    let vlen = u32::from_le_bytes(bytes[off + 4..off + 8].try_into().ok()?) as usize;
    let key_start = off + 8;
    let end = key_start + klen + vlen;
    if end > bytes.len() {
        return None;
    }
    Some((
        &bytes[key_start..key_start + klen],
        &bytes[key_start + klen..end],
        end,
    ))
}
