//! Centralized environment variable names and default values for runtime tuning.

// Environment variable names
pub const ENV_KEEP_INTERMEDIATES: &str = "MR_KEEP_INTERMEDIATES";
pub const ENV_LOCAL_TASKS: &str = "MR_LOCAL_TASKS";
pub const ENV_NUM_REDUCERS: &str = "MR_NUM_REDUCERS";
pub const ENV_FLUSH_BYTES: &str = "MR_FLUSH_BYTES";
pub const ENV_FLUSH_INTERVAL_MS: &str = "MR_FLUSH_INTERVAL_MS";
pub const ENV_WRITER_QUEUE_CAP: &str = "MR_WRITER_QUEUE_CAP";
pub const ENV_LOCAL_BATCH_BYTES: &str = "MR_LOCAL_BATCH_BYTES";

/// Directory (relative to the working directory) holding per-run intermediates.
pub const RUN_ROOT: &str = ".mapred_runs";

// Defaults (picked to reduce wakeups/syscalls under heavy shuffle)
pub const DEFAULT_LOCAL_BATCH_BYTES: usize = 256 * 1024;
pub const DEFAULT_WRITER_QUEUE_CAP: usize = 1024;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 200;
pub const DEFAULT_FLUSH_BYTES: usize = 16 * 1024 * 1024;
