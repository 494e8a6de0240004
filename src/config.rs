//! Disk configuration (spec §6, §10.3). A minimal line-oriented grammar —
//! `disk=<path> <capacity> <backend>` — matching the original tool's own
//! config format rather than inventing a TOML/JSON schema foreign to the
//! spec. Resolved from `BLOCKSTXXL_CONFIG` or an explicit path.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{BlockError, Result};
use crate::queue::PriorityPolicy;

pub const CONFIG_ENV_VAR: &str = "BLOCKSTXXL_CONFIG";
/// Names the file every [`crate::request::Request::wait`] call appends a
/// line to, not a boolean flag — unset means no wait-log at all.
pub const WAITLOG_ENV_VAR: &str = "BLOCKSTXXL_WAITLOG";

/// One configured disk: a backing path, its capacity in bytes, and which
/// `FileBackend` implementation to open it with.
pub struct DiskConfig {
    pub path: PathBuf,
    pub capacity: u64,
    pub backend: BackendKind,
    /// Keeps a `###` temp-file disk's `NamedTempFile` alive — and therefore
    /// deleted on drop — for as long as this config lives; `None` for a
    /// disk backed by an explicit path.
    temp_handle: Option<tempfile::NamedTempFile>,
}

impl std::fmt::Debug for DiskConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskConfig")
            .field("path", &self.path)
            .field("capacity", &self.capacity)
            .field("backend", &self.backend)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Syscall,
    Mmap,
    Memory,
    #[cfg(feature = "aio")]
    Aio,
}

impl BackendKind {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "syscall" => Ok(BackendKind::Syscall),
            "mmap" => Ok(BackendKind::Mmap),
            "memory" => Ok(BackendKind::Memory),
            #[cfg(feature = "aio")]
            "aio" => Ok(BackendKind::Aio),
            other => Err(BlockError::Config(format!("unknown backend '{other}'"))),
        }
    }
}

/// A parsed configuration: the ordered list of disks (disk index = order
/// in the file) and the default per-queue priority policy.
#[derive(Debug)]
pub struct Config {
    pub disks: Vec<DiskConfig>,
    pub priority_policy: PriorityPolicy,
}

impl Config {
    /// Resolve the config file path: an explicit override, else
    /// `BLOCKSTXXL_CONFIG`, else `./.blockstxxl` in the current directory.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = env::var(CONFIG_ENV_VAR) {
            return PathBuf::from(p);
        }
        PathBuf::from(".blockstxxl")
    }

    /// Load and parse the config file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| BlockError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    /// Parse the `disk=<path> <capacity> <backend>` line grammar. Blank
    /// lines and lines starting with `#` are ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let mut disks = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let rest = line.strip_prefix("disk=").ok_or_else(|| {
                BlockError::Config(format!("line {}: expected 'disk=...', got '{line}'", lineno + 1))
            })?;
            let mut fields = rest.split_whitespace();
            let raw_path = fields
                .next()
                .ok_or_else(|| BlockError::Config(format!("line {}: missing path", lineno + 1)))?;
            let raw_capacity = fields
                .next()
                .ok_or_else(|| BlockError::Config(format!("line {}: missing capacity", lineno + 1)))?;
            let raw_backend = fields
                .next()
                .ok_or_else(|| BlockError::Config(format!("line {}: missing backend", lineno + 1)))?;

            let capacity = parse_capacity(raw_capacity)
                .ok_or_else(|| BlockError::Config(format!("line {}: bad capacity '{raw_capacity}'", lineno + 1)))?;
            let backend = BackendKind::parse(raw_backend)?;
            let (path, temp_handle) = if raw_path == "###" {
                let tmp = tempfile::NamedTempFile::new()
                    .map_err(|e| BlockError::Resource(format!("temp disk file: {e}")))?;
                let path = tmp.path().to_path_buf();
                info!("disk line {} maps ### to temp file {}", lineno + 1, path.display());
                (path, Some(tmp))
            } else {
                (PathBuf::from(raw_path), None)
            };

            disks.push(DiskConfig { path, capacity, backend, temp_handle });
        }
        if disks.is_empty() {
            warn!("configuration has no 'disk=' lines");
        }
        Ok(Self { disks, priority_policy: PriorityPolicy::ReadFirst })
    }

    /// Whether a wait-log file has been configured via
    /// [`WAITLOG_ENV_VAR`]. The actual writer lives in
    /// [`crate::waitlog`]; this is exposed for callers that want to know
    /// without forcing the lazily-opened file to be touched.
    pub fn waitlog_enabled() -> bool {
        env::var(WAITLOG_ENV_VAR).is_ok()
    }
}

/// Parse a capacity like `512M`, `2G`, `4096` (bytes if no suffix).
fn parse_capacity(s: &str) -> Option<u64> {
    let s = s.trim();
    let (digits, mult) = match s.chars().last()? {
        'k' | 'K' => (&s[..s.len() - 1], 1024u64),
        'm' | 'M' => (&s[..s.len() - 1], 1024 * 1024),
        'g' | 'G' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    digits.parse::<u64>().ok().map(|n| n * mult)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_capacities() {
        let cfg = Config::parse("disk=/tmp/a 512M syscall\ndisk=/tmp/b 2G mmap\n").unwrap();
        assert_eq!(cfg.disks.len(), 2);
        assert_eq!(cfg.disks[0].capacity, 512 * 1024 * 1024);
        assert_eq!(cfg.disks[1].capacity, 2 * 1024 * 1024 * 1024);
        assert_eq!(cfg.disks[0].backend, BackendKind::Syscall);
        assert_eq!(cfg.disks[1].backend, BackendKind::Mmap);
    }

    #[test]
    fn unknown_backend_is_a_config_error() {
        let err = Config::parse("disk=/tmp/a 4096 nope\n").unwrap_err();
        assert!(matches!(err, BlockError::Config(_)));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let cfg = Config::parse("# a comment\n\ndisk=/tmp/a 4096 memory\n").unwrap();
        assert_eq!(cfg.disks.len(), 1);
    }

    #[test]
    fn triple_hash_path_maps_to_a_real_temp_file() {
        let cfg = Config::parse("disk=### 4096 memory\n").unwrap();
        assert_eq!(cfg.disks.len(), 1);
        assert!(cfg.disks[0].path.exists());
        let _ = fs::remove_file(&cfg.disks[0].path);
    }

    #[test]
    fn missing_field_is_a_config_error() {
        assert!(Config::parse("disk=/tmp/a 4096\n").is_err());
    }
}
