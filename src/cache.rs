//! Result cache
//!
//! A processed [`Session`] is stored next to its input log together with the
//! fingerprint of everything that produced it. A stored result is only reused
//! when both the format version and the whole fingerprint match.

use crate::arena::Arena;
use crate::config::LoadOptions;
use crate::error::AnalysisError;
use crate::extra::ExtraTopics;
use crate::types::Session;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Bumped whenever the stored layout or the processing semantics change
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Appended to the input path to name its cache file
pub const CACHE_SUFFIX: &str = ".madplot-cache";

/// Cache file of `input`
pub fn cache_path(input: &Path) -> PathBuf {
    let mut path = input.as_os_str().to_os_string();
    path.push(CACHE_SUFFIX);
    PathBuf::from(path)
}

/// Fingerprint of one load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheKey {
    /// File name of the input log
    pub source: String,
    /// Effective arena, after calibration
    pub arena: Arena,
    pub filter_short: usize,
    pub filter_short_pct: f64,
    pub smooth: bool,
    pub extra_topics: ExtraTopics,
    /// Resolved timezone name
    pub timezone: String,
}

impl CacheKey {
    pub fn new(input: &Path, arena: &Arena, options: &LoadOptions, timezone: &str) -> Self {
        let source = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.display().to_string());
        Self {
            source,
            arena: arena.clone(),
            filter_short: options.filter_short,
            filter_short_pct: options.filter_short_pct,
            smooth: options.smooth,
            extra_topics: options.extra_topics.clone(),
            timezone: timezone.to_string(),
        }
    }
}

#[derive(Serialize)]
struct CacheEntryRef<'a> {
    version: u32,
    key: &'a CacheKey,
    result: &'a Session,
}

/// Header of a cache file, without the stored result
#[derive(Debug, Clone, Deserialize)]
pub struct CacheHeader {
    pub version: u32,
    /// Stored fingerprint; kept untyped so older layouts can still be shown
    pub key: serde_json::Value,
}

/// Why a lookup did not produce a result
#[derive(Debug, Clone, PartialEq)]
pub enum Miss {
    NotFound,
    Unreadable(String),
    VersionMismatch { found: u32 },
    KeyMismatch,
}

/// Outcome of a cache lookup
#[derive(Debug)]
pub enum Lookup {
    Hit(Box<Session>),
    Miss(Miss),
}

/// Cache file belonging to one input log
#[derive(Debug, Clone)]
pub struct ResultCache {
    path: PathBuf,
}

impl ResultCache {
    pub fn for_input(input: &Path) -> Self {
        Self {
            path: cache_path(input),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up the stored result for `key`; every failure is a miss
    pub fn lookup(&self, key: &CacheKey) -> Lookup {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Lookup::Miss(Miss::NotFound),
            Err(e) => return self.miss(Miss::Unreadable(e.to_string())),
        };

        let mut entry: serde_json::Value = match serde_json::from_str(&data) {
            Ok(entry) => entry,
            Err(e) => return self.miss(Miss::Unreadable(e.to_string())),
        };

        let version = entry.get("version").and_then(serde_json::Value::as_u64);
        if version != Some(u64::from(CACHE_FORMAT_VERSION)) {
            let found = version.and_then(|v| u32::try_from(v).ok()).unwrap_or(0);
            return self.miss(Miss::VersionMismatch { found });
        }

        let stored_key = entry.get_mut("key").map(serde_json::Value::take);
        match stored_key.map(CacheKey::deserialize) {
            Some(Ok(stored)) if stored == *key => {}
            Some(Ok(_)) => return self.miss(Miss::KeyMismatch),
            Some(Err(e)) => return self.miss(Miss::Unreadable(e.to_string())),
            None => return self.miss(Miss::Unreadable("missing key".to_string())),
        }

        let result = entry.get_mut("result").map(serde_json::Value::take);
        match result.map(Session::deserialize) {
            Some(Ok(session)) => {
                info!(path = %self.path.display(), "using cached result");
                Lookup::Hit(Box::new(session))
            }
            Some(Err(e)) => self.miss(Miss::Unreadable(e.to_string())),
            None => self.miss(Miss::Unreadable("missing result".to_string())),
        }
    }

    /// Stored result for `key`, if valid
    pub fn load(&self, key: &CacheKey) -> Option<Session> {
        match self.lookup(key) {
            Lookup::Hit(session) => Some(*session),
            Lookup::Miss(_) => None,
        }
    }

    /// Write `result` under `key`, replacing any previous entry
    pub fn store(&self, key: &CacheKey, result: &Session) -> Result<(), AnalysisError> {
        let entry = CacheEntryRef {
            version: CACHE_FORMAT_VERSION,
            key,
            result,
        };
        let json = serde_json::to_string(&entry)?;
        fs::write(&self.path, json)?;
        debug!(path = %self.path.display(), "stored result");
        Ok(())
    }

    /// Read only the version and fingerprint of the cache file
    pub fn header(&self) -> Result<Option<CacheHeader>, AnalysisError> {
        match fs::read_to_string(&self.path) {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn miss(&self, reason: Miss) -> Lookup {
        info!(path = %self.path.display(), ?reason, "discarding cached result");
        Lookup::Miss(reason)
    }
}
