//! Centralized configuration and builder for MemSnap sessions.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - SnapConfig::from_env() reads the MEMSNAP_* variables; fluent setters override them.
//! - SessionBuilder returns a SnapConfig which Session consumes.
//!
//! ENV:
//! - MEMSNAP_CONTAINER          = auto|required|none (default auto)
//! - MEMSNAP_STRICT_DUPLICATES  = 0|1 (default 0, generation-aware)
//! - MEMSNAP_KEEP_HEADER        = 0|1 (default 0, flat image)
//! - MEMSNAP_READ_CHUNK         = bytes per producer read (default 40960)
//! - MEMSNAP_QUEUE_CAPACITY     = deliveries in flight, 0 = unbounded (default 64)
//! - MEMSNAP_WAIT_ATTEMPTS      = polls for the input pipe (default 100)
//! - MEMSNAP_WAIT_INTERVAL_MS   = delay between polls (default 100)

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::consts::{DEFAULT_QUEUE_CAPACITY, DEFAULT_READ_CHUNK, MAGIC_LEN};
use crate::container::{ContainerHeaderParser, MagicTag, SaveState};
use crate::util::{env_flag, env_parse};

/// Whether the stream starts with a container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerMode {
    /// Parse a container header if the stream starts with an accepted magic.
    Auto,
    /// The stream must start with a container header.
    Required,
    /// The stream starts directly with the size header.
    Absent,
}

impl FromStr for ContainerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ContainerMode::Auto),
            "required" | "require" => Ok(ContainerMode::Required),
            "none" | "absent" | "off" => Ok(ContainerMode::Absent),
            other => Err(format!(
                "unknown container mode '{}' (expected auto|required|none)",
                other
            )),
        }
    }
}

/// How rewrites of an already-present page are judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Newer generations overwrite freely; same-generation rewrites are logged, non-fatal.
    GenerationAware,
    /// Any rewrite is an integrity finding and fails the verdict.
    Strict,
}

/// Where pages land in the output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLayout {
    /// page offset == image offset.
    Flat,
    /// The container header, padded to 8 KiB, is kept at the image start; pages follow it.
    WithHeader,
}

#[derive(Clone, Debug)]
pub struct SnapConfig {
    pub container: ContainerMode,
    pub duplicate_policy: DuplicatePolicy,
    pub layout: ImageLayout,

    /// Producer read size in bytes.
    pub read_chunk: usize,

    /// Hand-off queue capacity (deliveries). None = unbounded.
    pub queue_capacity: Option<usize>,

    /// Polls for the input path before the first read.
    pub wait_attempts: u32,
    pub wait_interval_ms: u64,

    /// Extra accepted container magics on top of the libvirt pair.
    pub extra_magics: Vec<[u8; MAGIC_LEN]>,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            container: ContainerMode::Auto,
            duplicate_policy: DuplicatePolicy::GenerationAware,
            layout: ImageLayout::Flat,
            read_chunk: DEFAULT_READ_CHUNK,
            queue_capacity: Some(DEFAULT_QUEUE_CAPACITY),
            wait_attempts: 100,
            wait_interval_ms: 100,
            extra_magics: Vec::new(),
        }
    }
}

impl SnapConfig {
    /// Load configuration from MEMSNAP_* environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("MEMSNAP_CONTAINER") {
            if let Ok(m) = v.parse::<ContainerMode>() {
                cfg.container = m;
            }
        }
        if let Some(true) = env_flag("MEMSNAP_STRICT_DUPLICATES") {
            cfg.duplicate_policy = DuplicatePolicy::Strict;
        }
        if let Some(true) = env_flag("MEMSNAP_KEEP_HEADER") {
            cfg.layout = ImageLayout::WithHeader;
        }
        if let Some(n) = env_parse::<usize>("MEMSNAP_READ_CHUNK") {
            if n > 0 {
                cfg.read_chunk = n;
            }
        }
        if let Some(n) = env_parse::<usize>("MEMSNAP_QUEUE_CAPACITY") {
            cfg.queue_capacity = if n == 0 { None } else { Some(n) };
        }
        if let Some(n) = env_parse::<u32>("MEMSNAP_WAIT_ATTEMPTS") {
            cfg.wait_attempts = n;
        }
        if let Some(n) = env_parse::<u64>("MEMSNAP_WAIT_INTERVAL_MS") {
            cfg.wait_interval_ms = n;
        }

        cfg
    }

    // Fluent setters (builder-style) to override specific fields.

    pub fn with_container(mut self, mode: ContainerMode) -> Self {
        self.container = mode;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn with_layout(mut self, layout: ImageLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_read_chunk(mut self, bytes: usize) -> Self {
        self.read_chunk = bytes.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, cap: Option<usize>) -> Self {
        self.queue_capacity = cap;
        self
    }

    pub fn with_wait(mut self, attempts: u32, interval_ms: u64) -> Self {
        self.wait_attempts = attempts;
        self.wait_interval_ms = interval_ms;
        self
    }

    /// Accept one more container magic (treated as a final-state save).
    pub fn with_extra_magic(mut self, magic: [u8; MAGIC_LEN]) -> Self {
        self.extra_magics.push(magic);
        self
    }

    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_interval_ms)
    }

    /// Container parser for the configured set of magics.
    pub fn header_parser(&self) -> ContainerHeaderParser {
        self.extra_magics
            .iter()
            .fold(ContainerHeaderParser::libvirt(), |p, m| {
                p.with_tag(MagicTag::new(*m, SaveState::Final))
            })
    }

    /// Finish the builder and obtain the configuration.
    pub fn build(self) -> Self {
        self
    }
}

impl fmt::Display for SnapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SnapConfig {{ \
             container: {:?}, \
             duplicate_policy: {:?}, \
             layout: {:?}, \
             read_chunk: {}, \
             queue_capacity: {}, \
             wait: {}x{}ms, \
             extra_magics: {} \
             }}",
            self.container,
            self.duplicate_policy,
            self.layout,
            self.read_chunk,
            self.queue_capacity
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unbounded".to_string()),
            self.wait_attempts,
            self.wait_interval_ms,
            self.extra_magics.len(),
        )
    }
}

/// Lightweight builder that produces a SnapConfig.
#[derive(Clone, Debug)]
pub struct SessionBuilder {
    cfg: SnapConfig,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        // Start from env, then allow overrides.
        Self {
            cfg: SnapConfig::from_env(),
        }
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a clean default (without reading env).
    pub fn from_default() -> Self {
        Self {
            cfg: SnapConfig::default(),
        }
    }

    pub fn container(mut self, mode: ContainerMode) -> Self {
        self.cfg.container = mode;
        self
    }

    pub fn strict_duplicates(mut self, on: bool) -> Self {
        self.cfg.duplicate_policy = if on {
            DuplicatePolicy::Strict
        } else {
            DuplicatePolicy::GenerationAware
        };
        self
    }

    pub fn keep_header(mut self, on: bool) -> Self {
        self.cfg.layout = if on {
            ImageLayout::WithHeader
        } else {
            ImageLayout::Flat
        };
        self
    }

    pub fn read_chunk(mut self, bytes: usize) -> Self {
        self.cfg.read_chunk = bytes.max(1);
        self
    }

    pub fn queue_capacity(mut self, cap: Option<usize>) -> Self {
        self.cfg.queue_capacity = cap;
        self
    }

    /// Finish the builder and obtain the configuration.
    pub fn build(self) -> SnapConfig {
        self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_mode_parse() {
        assert_eq!("AUTO".parse::<ContainerMode>(), Ok(ContainerMode::Auto));
        assert_eq!("none".parse::<ContainerMode>(), Ok(ContainerMode::Absent));
        assert_eq!(
            "required".parse::<ContainerMode>(),
            Ok(ContainerMode::Required)
        );
        assert!("maybe".parse::<ContainerMode>().is_err());
    }

    #[test]
    fn builder_overrides_defaults() {
        let cfg = SessionBuilder::from_default()
            .strict_duplicates(true)
            .keep_header(true)
            .queue_capacity(None)
            .build();
        assert_eq!(cfg.duplicate_policy, DuplicatePolicy::Strict);
        assert_eq!(cfg.layout, ImageLayout::WithHeader);
        assert_eq!(cfg.queue_capacity, None);
        assert_eq!(cfg.container, ContainerMode::Auto);
    }

    #[test]
    fn extra_magic_is_accepted() {
        let cfg = SnapConfig::default().with_extra_magic(*b"CustomSaveMagic!");
        let p = cfg.header_parser();
        assert_eq!(p.tags().len(), 3);
        assert!(p.recognizes(b"CustomSaveMagic!...."));
    }
}
