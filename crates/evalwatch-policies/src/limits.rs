pub const MIN_SCHEMA_VERSION: u32 = 1;
pub const MAX_SCHEMA_VERSION: u32 = 1;

pub const DEFAULT_COOLDOWN_SECONDS: u64 = 300;
pub const DEFAULT_FAILURES_TO_ALERT: u32 = 1;
pub const MAX_FAILURES_TO_ALERT: u32 = 10_000;
pub const MAX_COOLDOWN_SECONDS: u64 = 7 * 24 * 3600;

pub const DEFAULT_SCORER_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_JUDGE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_JUDGE_MAX_RETRIES: u32 = 2;
pub const DEFAULT_MAX_CONCURRENT_EVENTS: usize = 8;
pub const MAX_CONCURRENT_EVENTS_HARD: usize = 1024;

pub const DEFAULT_NOTIFY_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_NOTIFY_BASE_BACKOFF_MS: u64 = 120;
