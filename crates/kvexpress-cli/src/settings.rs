//! Optional JSON config file.
//!
//! Precedence: command-line flag > config file > built-in default.
//!
//! ```json
//! {
//!   "consul_server": "consul.service:8500",
//!   "token": "…",
//!   "prefix": "kvexpress",
//!   "chmod": "0640",
//!   "owner": "nginx",
//!   "min_length": 10,
//!   "post_exec": "systemctl reload nginx",
//!   "kv_dir": "/var/lib/kvexpress/mirror",
//!   "chown": "required"
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use kvexpress_core::ChownPolicy;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub consul_server: Option<String>,
    pub token: Option<String>,
    pub prefix: Option<String>,
    /// Octal, as a string (`"0640"`).
    pub chmod: Option<String>,
    pub owner: Option<String>,
    pub min_length: Option<usize>,
    pub post_exec: Option<String>,
    pub kv_dir: Option<PathBuf>,
    /// `required` or `best-effort`.
    pub chown: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config `{}`", path.display()))?;
        let config: FileConfig = serde_json::from_str(&text)
            .with_context(|| format!("invalid config `{}`", path.display()))?;
        Ok(config)
    }

    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Parse an octal file mode: `640`, `0640` and `0o640` all mean `0o640`.
pub fn parse_mode(s: &str) -> Result<u32> {
    let t = s.trim();
    let digits = t.strip_prefix("0o").unwrap_or(t);
    let mode = u32::from_str_radix(digits, 8)
        .map_err(|e| anyhow!("invalid octal mode `{s}`: {e}"))?;
    if mode > 0o7777 {
        return Err(anyhow!("mode `{s}` is out of range (max 7777)"));
    }
    Ok(mode)
}

pub fn parse_chown_policy(s: &str) -> Result<ChownPolicy> {
    let norm = s.trim().to_ascii_lowercase();
    match norm.as_str() {
        "required" => Ok(ChownPolicy::Required),
        "best-effort" | "best_effort" => Ok(ChownPolicy::BestEffort),
        other => Err(anyhow!(
            "unknown chown policy `{other}` (expected required|best-effort)"
        )),
    }
}
