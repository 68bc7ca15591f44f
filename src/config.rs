//! Load configuration
//!
//! Everything that changes the output of a load lives in [`LoadOptions`];
//! the whole struct is part of the cache fingerprint.

use crate::error::AnalysisError;
use crate::extra::ExtraTopics;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Zone used when the caller does not name one
pub const DEFAULT_TIMEZONE: &str = "CET";

/// Environment variable that makes an explicit timezone mandatory
pub const FORCE_USER_TZNAME_ENV: &str = "MADPLOT_FORCE_USER_TZNAME";

/// Default minimum track length in samples
pub const DEFAULT_FILTER_SHORT: usize = 100;

/// Whether a missing timezone is an error or falls back to [`DEFAULT_TIMEZONE`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimezonePolicy {
    pub strict: bool,
}

impl TimezonePolicy {
    pub fn lenient() -> Self {
        Self { strict: false }
    }

    pub fn strict() -> Self {
        Self { strict: true }
    }

    /// Read the policy from `MADPLOT_FORCE_USER_TZNAME`
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(FORCE_USER_TZNAME_ENV).ok().as_deref())
    }

    /// Strict only when the value is the integer 1
    pub fn from_env_value(value: Option<&str>) -> Self {
        let strict = match value.map(str::trim) {
            None | Some("") => false,
            Some(v) => match v.parse::<i64>() {
                Ok(n) => n == 1,
                Err(_) => {
                    warn!(value = v, "ignoring non-integer {}", FORCE_USER_TZNAME_ENV);
                    false
                }
            },
        };
        Self { strict }
    }

    /// Resolve the zone to convert timestamps into.
    ///
    /// Returns the canonical zone name together with the zone.
    pub fn resolve(&self, tzname: Option<&str>) -> Result<(String, Tz), AnalysisError> {
        let name = match tzname {
            Some(name) => name,
            None if self.strict => return Err(AnalysisError::MissingTimezone),
            None => DEFAULT_TIMEZONE,
        };

        let tz: Tz = name
            .parse()
            .map_err(|e| AnalysisError::InvalidTimezone(format!("{}: {}", name, e)))?;
        Ok((tz.name().to_string(), tz))
    }
}

/// Options controlling a single log load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Minimum track length in samples
    pub filter_short: usize,
    /// Minimum track length as a percentage of all tracked samples; wins when positive
    pub filter_short_pct: f64,
    /// Kalman-smooth positions before deriving velocities
    pub smooth: bool,
    /// Additional topics to collect into the extra table
    pub extra_topics: ExtraTopics,
    /// Target timezone (IANA name or abbreviation such as "CET")
    pub tzname: Option<String>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            filter_short: DEFAULT_FILTER_SHORT,
            filter_short_pct: 0.0,
            smooth: false,
            extra_topics: ExtraTopics::default(),
            tzname: None,
        }
    }
}

impl LoadOptions {
    pub fn with_smoothing(mut self, smooth: bool) -> Self {
        self.smooth = smooth;
        self
    }

    pub fn with_filter_short(mut self, filter_short: usize) -> Self {
        self.filter_short = filter_short;
        self
    }

    pub fn with_filter_short_pct(mut self, pct: f64) -> Self {
        self.filter_short_pct = pct;
        self
    }

    pub fn with_timezone(mut self, tzname: impl Into<String>) -> Self {
        self.tzname = Some(tzname.into());
        self
    }

    pub fn with_extra_topics(mut self, extra_topics: ExtraTopics) -> Self {
        self.extra_topics = extra_topics;
        self
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !self.filter_short_pct.is_finite() || !(0.0..=100.0).contains(&self.filter_short_pct) {
            return Err(AnalysisError::InvalidOptions(format!(
                "filter_short_pct must be within 0-100, got {}",
                self.filter_short_pct
            )));
        }
        Ok(())
    }

    /// Minimum number of samples a track needs, given the session's total
    pub fn min_track_len(&self, total_samples: usize) -> f64 {
        if self.filter_short_pct > 0.0 {
            (self.filter_short_pct / 100.0) * total_samples as f64
        } else {
            self.filter_short as f64
        }
    }
}
