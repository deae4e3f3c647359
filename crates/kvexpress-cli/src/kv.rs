//! Key/value backends for `kvexpress out`.
//!
//! - `ConsulKv`: the Consul HTTP KV API (`GET /v1/kv/<key>?raw`)
//! - `DirKv`: a plain directory tree, one file per key, for offline hosts and
//!   replicas populated by rsync/NFS/object-store sync

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use kvexpress_core::{FetchError, KvFetch};
use url::Url;

pub const DEFAULT_CONSUL_SERVER: &str = "localhost:8500";
const CONSUL_TOKEN_HEADER: &str = "X-Consul-Token";
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ConsulKv {
    base: Url,
    token: Option<String>,
    client: reqwest::blocking::Client,
}

impl ConsulKv {
    /// `server` is `host:port` or a full `http(s)://host:port` URL.
    pub fn new(server: &str, token: Option<String>) -> Result<Self> {
        let server = server.trim().trim_end_matches('/');
        let base = if server.contains("://") {
            server.to_string()
        } else {
            format!("http://{server}")
        };
        let base = Url::parse(&base).with_context(|| format!("invalid Consul server `{server}`"))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("invalid Consul server `{server}`"));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base,
            token: token.filter(|t| !t.is_empty()),
            client,
        })
    }

    fn key_url(&self, key: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["v1", "kv"])
                .extend(key.split('/').filter(|s| !s.is_empty()));
        }
        url.set_query(Some("raw"));
        url
    }
}

impl KvFetch for ConsulKv {
    fn fetch(&self, key: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.key_url(key);
        let mut req = self.client.get(url);
        if let Some(token) = &self.token {
            req = req.header(CONSUL_TOKEN_HEADER, token.as_str());
        }

        let transport = |e: reqwest::Error| FetchError::Transport {
            key: key.to_string(),
            message: e.to_string(),
        };
        let resp = req.send().map_err(transport)?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(key.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                key: key.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp.bytes().map_err(transport)?.to_vec())
    }
}

pub struct DirKv {
    root: PathBuf,
}

impl DirKv {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn key_path(&self, key: &str) -> Option<PathBuf> {
        let rel = Path::new(key.trim_matches('/'));
        // Keys stay inside the root.
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(rel))
    }
}

impl KvFetch for DirKv {
    fn fetch(&self, key: &str) -> Result<Vec<u8>, FetchError> {
        let path = self
            .key_path(key)
            .ok_or_else(|| FetchError::NotFound(key.to_string()))?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(FetchError::NotFound(key.to_string())),
            Err(e) => Err(FetchError::Io(e)),
        }
    }
}
