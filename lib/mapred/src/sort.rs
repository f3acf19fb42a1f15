use crate::io::read_bin_record;
use anyhow::{Context, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Default)]
pub struct SortOutcome {
    pub records_in: u64,
    pub bytes_in: u64,
    pub sort_only_ms: u64,
    pub io_read_ms: u64,
    pub io_write_ms: u64,
}

// Given a set of partition files, produce a single file at out_path with the
// records reordered so equal keys are adjacent. Records are compared on their
// raw serialized key bytes, which is all the grouping pass downstream needs.
pub fn external_sort_by_key(
    input_paths: &[impl AsRef<Path>],
    out_path: impl AsRef<Path>,
) -> Result<SortOutcome> {
    // Mmap each input file and build a record index: (file_idx, start, key_end, end)
    let mut file_maps: Vec<Mmap> = Vec::new();
    let mut all_records: Vec<(usize, usize, usize, usize)> = Vec::new();
    let mut bytes_in: u64 = 0;
    let mut records_in: u64 = 0;
    let mut io_read = Duration::from_nanos(0);

    for p in input_paths {
        let p = p.as_ref();
        let file = std::fs::File::open(p).with_context(|| format!("open {}", p.display()))?;
        let meta_len = file.metadata().map(|m| m.len()).unwrap_or(0);
        if meta_len == 0 {
            continue;
        }
        bytes_in += meta_len;
        let read_start = Instant::now();
        let map = unsafe { Mmap::map(&file) }.with_context(|| format!("mmap {}", p.display()))?;
        let file_idx = file_maps.len();
        let bytes = &map[..];
        let mut off = 0usize;
        while let Some((k, _v, next)) = read_bin_record(bytes, off) {
            let key_start = off + 8; // after the two u32 lengths
            let key_end = key_start + k.len();
            all_records.push((file_idx, off, key_end, next));
            records_in += 1;
            off = next;
        }
        file_maps.push(map);
        io_read += read_start.elapsed();
    }

    let sort_only_start = Instant::now();
    all_records.par_sort_by(|a, b| {
        let (fia, sa, ka, _ea) = *a;
        let (fib, sb, kb, _eb) = *b;
        // Keys sit at [s+8..key_end]; [s..s+8) holds the lengths.
        file_maps[fia][(sa + 8)..ka].cmp(&file_maps[fib][(sb + 8)..kb])
    });
    let sort_only_ms = sort_only_start.elapsed().as_millis() as u64;

    let out_path = out_path.as_ref();
    let io_write_start = Instant::now();
    let file = std::fs::File::create(out_path)
        .with_context(|| format!("create {}", out_path.display()))?;
    let mut w = std::io::BufWriter::with_capacity(8 * 1024 * 1024, file);
    for &(fi, s, _k, e) in &all_records {
        w.write_all(&file_maps[fi][s..e])
            .with_context(|| format!("write {}", out_path.display()))?;
    }
    w.flush().with_context(|| format!("flush {}", out_path.display()))?;
    let io_write_ms = io_write_start.elapsed().as_millis() as u64;

    Ok(SortOutcome {
        records_in,
        bytes_in,
        sort_only_ms,
        io_read_ms: io_read.as_millis() as u64,
        io_write_ms,
    })
}
