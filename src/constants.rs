//! Compile-time constants and tunables shared across the crate.

/// Application name used for data directories and log folders.
pub const APP_NAME: &str = "flock";

/// Default OpenAI chat model.
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
/// Default OpenAI API base URL.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
/// Sampling temperature used for every free-text model call.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Token cap for the final tweet-generation call.
pub const TWEET_MAX_OUTPUT_TOKENS: u32 = 100;

/// Topic every agent publishes to and subscribes from.
pub const DEFAULT_TWEET_TOPIC: &str = "tweets";
/// Per-subscriber buffer of the in-process bus before it starts lagging.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Directory (relative to the data dir) holding profile sets.
pub const DEFAULT_PROFILES_DIR: &str = "profiles";
/// Directory (relative to the data dir) holding agent session logs.
pub const DEFAULT_LOG_FOLDER: &str = "agent_logs";

/// Metadata file written next to the personalities of a profile set.
pub const PROFILE_METADATA_FILE: &str = "profile_generation_metadata.yaml";
/// Older metadata file name, still recognised and excluded from enumeration.
pub const LEGACY_METADATA_FILE: &str = "session_metadata.yaml";

// ── Cringe filter ────────────────────────────────────────────────────

/// Scores strictly above this are rejected.
pub const DEFAULT_CRINGE_THRESHOLD: f64 = 0.7;
/// Drafting attempts per message when the cringe filter is on.
pub const DEFAULT_MAX_ATTEMPTS: usize = 10;

// ── Orchestration ────────────────────────────────────────────────────

/// Upper bound on simultaneous model calls across all agents.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 32;
/// How long `stop()` waits for agents before aborting them.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
/// Longest grace period accepted from configuration.
pub const MAX_SHUTDOWN_GRACE_SECS: u64 = 3600;
/// Author name used for messages injected from a seed file.
pub const SIMULATOR_AUTHOR: &str = "simulator";
