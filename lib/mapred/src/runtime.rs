use crate::api::{Combiner, Mapper, NoCombine, Reducer};
use crate::constants::*;
use crate::io::{
    append_bin_record, ensure_dir, hash_to_partition, list_files_recursive, open_writer,
    read_bin_record, read_lines,
};
use crate::sort::{external_sort_by_key, SortOutcome};
use crate::utils::{env_parse, env_var_truthy};
use crate::writer::{ThreadWriter, WriterPool};
use anyhow::{Context, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};

#[derive(Clone, Debug)]
struct MapTaskStats {
    task_id: usize,
    num_files: u64,
    emits: u64,
    records_out: u64,
    bytes_out: u64,
    flushes: u64,
    wall_ms: u64,
}

#[derive(Clone, Debug)]
struct ReduceTaskStats {
    partition: u64,
    records_in: u64,
    groups: u64,
    wall_ms: u64,
}

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct RuntimePipeline {
    inputs: Vec<String>,
    output: Option<String>,
}

impl RuntimePipeline {
    pub fn new() -> Self {
        Self {
            inputs: vec![],
            output: None,
        }
    }

    pub fn add_input(&mut self, input_path: impl Into<String>) {
        self.inputs.push(input_path.into());
    }

    pub fn add_output(&mut self, output_path: impl Into<String>) {
        self.output = Some(output_path.into());
    }

    pub fn map_reduce<M, R>(&mut self, mapper: M, reducer: R) -> Result<()>
    where
        M: Mapper<Input = String> + Send + Sync + 'static,
        R: Reducer<Key = M::Key, ValueIn = M::Value> + Send + Sync + 'static,
    {
        self.run(mapper, None::<NoCombine<M::Key, M::Value>>, reducer)
    }

    pub fn map_combine_reduce<M, C, R>(&mut self, mapper: M, combiner: C, reducer: R) -> Result<()>
    where
        M: Mapper<Input = String> + Send + Sync + 'static,
        C: Combiner<Key = M::Key, Value = M::Value> + Send + Sync + 'static,
        R: Reducer<Key = M::Key, ValueIn = M::Value> + Send + Sync + 'static,
    {
        self.run(mapper, Some(combiner), reducer)
    }

    fn run<M, C, R>(&mut self, mapper: M, combiner: Option<C>, reducer: R) -> Result<()>
    where
        M: Mapper<Input = String> + Send + Sync + 'static,
        C: Combiner<Key = M::Key, Value = M::Value> + Send + Sync + 'static,
        R: Reducer<Key = M::Key, ValueIn = M::Value> + Send + Sync + 'static,
    {
        let output_dir = self.output.clone().context("output not set")?;
        let job_id = {
            let pid = std::process::id();
            let ts = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let seq = RUN_SEQ.fetch_add(1, Ordering::Relaxed);
            format!("local-{}-{}-{}", pid, ts, seq)
        };
        let run_root = format!("{}/{}", RUN_ROOT, job_id);
        let map_out_dir = format!("{}/map_out", run_root);
        let sort_out_dir = format!("{}/sort_out", run_root);
        ensure_dir(&map_out_dir)?;
        ensure_dir(&sort_out_dir)?;

        // Clean the output directory before starting.
        let _ = fs::remove_dir_all(&output_dir);
        ensure_dir(&output_dir)?;

        let mut all_files = Vec::new();
        for inp in &self.inputs {
            let mut files = list_files_recursive(inp)?;
            all_files.append(&mut files);
        }
        all_files.sort();

        let ntasks = env_parse::<usize>(ENV_LOCAL_TASKS)
            .unwrap_or_else(num_cpus::get)
            .max(1)
            .min(all_files.len().max(1));
        let num_reducers = env_parse::<usize>(ENV_NUM_REDUCERS)
            .unwrap_or(ntasks)
            .clamp(1, ntasks);

        // Partition input files among tasks round-robin.
        let chunks: Vec<Vec<PathBuf>> = (0..ntasks)
            .map(|i| {
                all_files
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| idx % ntasks == i)
                    .map(|(_, p)| p.clone())
                    .collect()
            })
            .collect();

        info!(
            job_id = %job_id,
            files = all_files.len(),
            tasks = ntasks,
            num_reducers,
            combine = combiner.is_some(),
            "pipeline starting map phase"
        );

        let flush_bytes = env_parse::<usize>(ENV_FLUSH_BYTES).unwrap_or(DEFAULT_FLUSH_BYTES);
        let flush_interval = Duration::from_millis(
            env_parse::<u64>(ENV_FLUSH_INTERVAL_MS).unwrap_or(DEFAULT_FLUSH_INTERVAL_MS),
        );
        let queue_cap = env_parse::<usize>(ENV_WRITER_QUEUE_CAP).unwrap_or(DEFAULT_WRITER_QUEUE_CAP);
        let batch_bytes =
            env_parse::<usize>(ENV_LOCAL_BATCH_BYTES).unwrap_or(DEFAULT_LOCAL_BATCH_BYTES);
        let (pool, mut pool_joiner) =
            WriterPool::new(&map_out_dir, num_reducers, flush_bytes, flush_interval, queue_cap)?;
        let pool = Arc::new(pool);

        // Map phase
        let mapper = Arc::new(mapper);
        let combiner = combiner.map(Arc::new);
        let map_stats: Arc<Mutex<Vec<MapTaskStats>>> = Arc::new(Mutex::new(Vec::new()));
        let map_phase_start = Instant::now();
        (0..ntasks).into_par_iter().for_each(|task_id| {
            let task_start = Instant::now();
            let files = &chunks[task_id];
            debug!(task_id, num_files = files.len(), "map task starting");
            let mut writer = pool.make_thread_writer(num_reducers, batch_bytes);
            let mut emits: u64 = 0;
            let mut records_out: u64 = 0;
            let mut push_record = |writer: &mut ThreadWriter, k: &M::Key, v: &M::Value| {
                if let Some((kb, vb)) = encode_pair(k, v) {
                    let part = hash_to_partition(k, num_reducers);
                    let mut rec = Vec::with_capacity(8 + kb.len() + vb.len());
                    append_bin_record(&mut rec, &kb, &vb);
                    writer.emit_record(part, &rec);
                    records_out += 1;
                }
            };

            match combiner.as_deref() {
                Some(c) => {
                    // Fold emissions key-wise within this task, flush once at end.
                    let mut folded: HashMap<M::Key, M::Value> = HashMap::new();
                    for file in files {
                        let lines = match read_lines(file) {
                            Ok(it) => it,
                            Err(e) => {
                                error!("read_lines {}: {}", file.display(), e);
                                continue;
                            }
                        };
                        let mut emit = |k: M::Key, v: M::Value| {
                            emits += 1;
                            match folded.entry(k) {
                                Entry::Occupied(mut e) => {
                                    let merged = c.do_combine(e.key(), [e.get().clone(), v]);
                                    e.insert(merged);
                                }
                                Entry::Vacant(e) => {
                                    e.insert(v);
                                }
                            }
                        };
                        mapper.do_map(lines.filter_map(|r| r.ok()), &mut emit);
                    }
                    for (k, v) in &folded {
                        push_record(&mut writer, k, v);
                    }
                }
                None => {
                    for file in files {
                        let lines = match read_lines(file) {
                            Ok(it) => it,
                            Err(e) => {
                                error!("read_lines {}: {}", file.display(), e);
                                continue;
                            }
                        };
                        let mut emit = |k: M::Key, v: M::Value| {
                            emits += 1;
                            push_record(&mut writer, &k, &v);
                        };
                        mapper.do_map(lines.filter_map(|r| r.ok()), &mut emit);
                    }
                }
            }
            writer.flush_all();
            let (flushes, bytes_out) = writer.stats();

            let mut guard = map_stats.lock().unwrap();
            guard.push(MapTaskStats {
                task_id,
                num_files: files.len() as u64,
                emits,
                records_out,
                bytes_out,
                flushes,
                wall_ms: task_start.elapsed().as_millis() as u64,
            });
        });

        // Ensure all partition files are closed before the sort reads them.
        pool.close_all();
        pool_joiner.join_all();

        let map_stats_vec = map_stats.lock().unwrap().clone();
        if !map_stats_vec.is_empty() {
            let total_emits: u64 = map_stats_vec.iter().map(|s| s.emits).sum();
            let total_records: u64 = map_stats_vec.iter().map(|s| s.records_out).sum();
            let total_bytes: u64 = map_stats_vec.iter().map(|s| s.bytes_out).sum();
            let total_flushes: u64 = map_stats_vec.iter().map(|s| s.flushes).sum();
            let min_wall = map_stats_vec.iter().map(|s| s.wall_ms).min().unwrap_or(0);
            let max_wall = map_stats_vec.iter().map(|s| s.wall_ms).max().unwrap_or(0);
            info!(
                phase = "map",
                tasks = map_stats_vec.len(),
                total_emits,
                total_records,
                total_bytes,
                total_flushes,
                min_task_ms = min_wall,
                max_task_ms = max_wall,
                wall_ms = map_phase_start.elapsed().as_millis() as u64,
                "map phase complete"
            );
        }

        // Sort/shuffle phase
        let sort_phase_start = Instant::now();
        let outcomes: Vec<SortOutcome> = (0..num_reducers)
            .into_par_iter()
            .map(|r| {
                let in_path = format!("{}/part{}.bin", map_out_dir, r);
                let out_path = format!("{}/sorted_part{}.bin", sort_out_dir, r);
                external_sort_by_key(&[&in_path], &out_path)
            })
            .collect::<Result<Vec<_>>>()?;
        let total_records: u64 = outcomes.iter().map(|o| o.records_in).sum();
        let total_bytes: u64 = outcomes.iter().map(|o| o.bytes_in).sum();
        info!(
            phase = "sort",
            reducers = num_reducers,
            total_records,
            total_bytes,
            wall_ms = sort_phase_start.elapsed().as_millis() as u64,
            "sort phase complete"
        );

        // Reduce phase
        let reducer = Arc::new(reducer);
        let reduce_stats: Arc<Mutex<Vec<ReduceTaskStats>>> = Arc::new(Mutex::new(Vec::new()));
        let reduce_phase_start = Instant::now();
        (0..num_reducers).into_par_iter().for_each(|r| {
            let task_start = Instant::now();
            let in_path = format!("{}/sorted_part{}.bin", sort_out_dir, r);
            let out_path = format!("{}/part-{:05}.tsv", output_dir, r);
            let mut out_writer = match open_writer(&out_path) {
                Ok(w) => w,
                Err(e) => {
                    error!("open_writer {}: {}", out_path, e);
                    return;
                }
            };

            let file = match fs::File::open(&in_path) {
                Ok(f) => f,
                Err(e) => {
                    error!("open {}: {}", in_path, e);
                    return;
                }
            };
            let file_len = file.metadata().map(|m| m.len()).unwrap_or(0);
            let mut records_in: u64 = 0;
            let mut groups: u64 = 0;
            if file_len > 0 {
                let map = match unsafe { Mmap::map(&file) } {
                    Ok(m) => m,
                    Err(e) => {
                        error!("mmap {}: {}", in_path, e);
                        return;
                    }
                };
                let bytes = &map[..];

                let mut current_key: Option<R::Key> = None;
                let mut buffer: Vec<R::ValueIn> = Vec::new();
                let mut flush_group =
                    |key: &R::Key, vals: &Vec<R::ValueIn>, w: &mut std::io::BufWriter<fs::File>| {
                        let mut emit = |out: R::Out| {
                            if let Err(e) = writeln!(w, "{}", out) {
                                error!("write output line: {}", e);
                            }
                        };
                        reducer.do_reduce(key, vals.clone(), &mut emit);
                        groups += 1;
                    };

                let mut off = 0usize;
                while let Some((kb, vb, next)) = read_bin_record(bytes, off) {
                    let k_typed: R::Key = match bincode::deserialize(kb) {
                        Ok(v) => v,
                        Err(e) => {
                            error!("bad key record: {}", e);
                            break;
                        }
                    };
                    let v_typed: R::ValueIn = match bincode::deserialize(vb) {
                        Ok(v) => v,
                        Err(e) => {
                            error!("bad value record: {}", e);
                            break;
                        }
                    };
                    records_in += 1;
                    match &current_key {
                        None => {
                            current_key = Some(k_typed);
                            buffer.clear();
                            buffer.push(v_typed);
                        }
                        Some(cur) if cur == &k_typed => {
                            buffer.push(v_typed);
                        }
                        Some(cur) => {
                            flush_group(cur, &buffer, &mut out_writer);
                            current_key = Some(k_typed);
                            buffer.clear();
                            buffer.push(v_typed);
                        }
                    }
                    off = next;
                }
                if let Some(cur) = current_key.take() {
                    flush_group(&cur, &buffer, &mut out_writer);
                }
            }
            if let Err(e) = out_writer.flush() {
                error!("flush {}: {}", out_path, e);
            }

            let mut guard = reduce_stats.lock().unwrap();
            guard.push(ReduceTaskStats {
                partition: r as u64,
                records_in,
                groups,
                wall_ms: task_start.elapsed().as_millis() as u64,
            });
        });

        let reduce_stats_vec = reduce_stats.lock().unwrap().clone();
        if !reduce_stats_vec.is_empty() {
            let total_records: u64 = reduce_stats_vec.iter().map(|s| s.records_in).sum();
            let total_groups: u64 = reduce_stats_vec.iter().map(|s| s.groups).sum();
            let min_wall = reduce_stats_vec.iter().map(|s| s.wall_ms).min().unwrap_or(0);
            let max_wall = reduce_stats_vec.iter().map(|s| s.wall_ms).max().unwrap_or(0);
            info!(
                phase = "reduce",
                reducers = reduce_stats_vec.len(),
                total_records,
                total_groups,
                min_reducer_ms = min_wall,
                max_reducer_ms = max_wall,
                wall_ms = reduce_phase_start.elapsed().as_millis() as u64,
                "reduce phase complete"
            );
        }

        if !env_var_truthy(ENV_KEEP_INTERMEDIATES) {
            let _ = fs::remove_dir_all(&run_root);
        }

        Ok(())
    }
}

impl Default for RuntimePipeline {
    fn default() -> Self {
        Self::new()
    }
}

pub fn default_pipeline() -> RuntimePipeline {
    RuntimePipeline::new()
}

fn encode_pair<K: Serialize, V: Serialize>(key: &K, value: &V) -> Option<(Vec<u8>, Vec<u8>)> {
    let kb = match bincode::serialize(key) {
        Ok(b) => b,
        Err(e) => {
            error!("bincode key: {}", e);
            return None;
        }
    };
    let vb = match bincode::serialize(value) {
        Ok(b) => b,
        Err(e) => {
            error!("bincode value: {}", e);
            return None;
        }
    };
    Some((kb, vb))
}
