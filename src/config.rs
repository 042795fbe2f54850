use tracing::warn;

pub(crate) const DEFAULT_LOG_LIMIT_LINES: u64 = 120;
pub(crate) const MIN_LOG_LIMIT_LINES: u64 = 10;
pub(crate) const MAX_LOG_LIMIT_LINES: u64 = 2_000;

pub(crate) const DEFAULT_RESULT_MAX_CHARS: u64 = 4_000;
pub(crate) const MIN_RESULT_MAX_CHARS: u64 = 500;
pub(crate) const MAX_RESULT_MAX_CHARS: u64 = 32_000;

pub(crate) const DEFAULT_SESSION_TTL_MS: u64 = 300_000;
pub(crate) const MIN_SESSION_TTL_MS: u64 = 1_000;
pub(crate) const MAX_SESSION_TTL_MS: u64 = 86_400_000; // 24h

/// Tool defaults read from the environment once at construction, clamped to
/// documented bounds.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub log_default_lines: usize,
    pub result_max_chars: usize,
    pub session_ttl_ms: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            log_default_lines: DEFAULT_LOG_LIMIT_LINES as usize,
            result_max_chars: DEFAULT_RESULT_MAX_CHARS as usize,
            session_ttl_ms: DEFAULT_SESSION_TTL_MS,
        }
    }
}

impl ToolConfig {
    pub fn from_env() -> Self {
        Self {
            log_default_lines: clamp_with_default(
                read_env_u64("PROCDOCK_LOG_DEFAULT_LINES"),
                DEFAULT_LOG_LIMIT_LINES,
                MIN_LOG_LIMIT_LINES,
                MAX_LOG_LIMIT_LINES,
            ) as usize,
            result_max_chars: clamp_with_default(
                read_env_u64("PROCDOCK_RESULT_MAX_CHARS"),
                DEFAULT_RESULT_MAX_CHARS,
                MIN_RESULT_MAX_CHARS,
                MAX_RESULT_MAX_CHARS,
            ) as usize,
            session_ttl_ms: clamp_with_default(
                read_env_u64("PROCDOCK_SESSION_TTL_MS"),
                DEFAULT_SESSION_TTL_MS,
                MIN_SESSION_TTL_MS,
                MAX_SESSION_TTL_MS,
            ),
        }
    }
}

fn read_env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(name, raw, "ignoring unparseable environment override");
            None
        }
    }
}

fn clamp_with_default(value: Option<u64>, default: u64, min: u64, max: u64) -> u64 {
    let Some(value) = value else {
        return default;
    };
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!(value, min, max, "clamping out-of-range environment override");
    }
    clamped
}
