//! Pipeline orchestration
//!
//! This module provides the public API for loading experiment logs.
//! It runs the full pipeline from raw log events to a processed [`Session`],
//! memoized by the result cache.

use crate::arena::{Arena, Calibration};
use crate::cache::{CacheKey, Lookup, ResultCache};
use crate::config::{LoadOptions, TimezonePolicy};
use crate::error::AnalysisError;
use crate::filter::filter_short_tracks;
use crate::geometry::Point;
use crate::ingest::ingest;
use crate::schema::{JsonLogReader, LogEvent, LogReader};
use crate::smoothing::smooth_tracks;
use crate::types::{ExtraTable, Session};
use chrono::NaiveDateTime;
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Date format log files are named with, before the extension
pub const LOG_DATE_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Suffix of the calibration sidecar next to an input log
pub const CALIBRATION_SUFFIX: &str = ".calibration.json";

/// Calibration sidecar of `input`
pub fn calibration_path(input: &Path) -> PathBuf {
    let mut path = input.as_os_str().to_os_string();
    path.push(CALIBRATION_SUFFIX);
    PathBuf::from(path)
}

/// Start time encoded in a log file name such as `2013-10-07-16-59-29.bag`
pub fn session_start_from_filename(path: &Path) -> Result<NaiveDateTime, AnalysisError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AnalysisError::InvalidFilename(path.display().to_string()))?;
    let stem = name.split('.').next().unwrap_or(name);
    NaiveDateTime::parse_from_str(stem, LOG_DATE_FORMAT)
        .map_err(|e| AnalysisError::InvalidFilename(format!("{}: {}", name, e)))
}

/// Run every processing stage over the events of one log.
///
/// Pipeline stages:
/// 1. Ingestion - route events into time-ordered tables
/// 2. Track filtering - drop short tracks from every table
/// 3. Smoothing - recompute positions and velocities per track
/// 4. Arena geometry - intersect the drawn boundary with the arena, flag samples inside it
pub fn process_events(
    events: &[LogEvent],
    arena: &Arena,
    options: &LoadOptions,
    timezone: &str,
    tz: Tz,
) -> Result<Session, AnalysisError> {
    // Stage 1: Ingest
    let channels = options.extra_topics.resolve();
    let mut tables = ingest(events, arena, tz, &channels);
    info!(
        targeted = tables.targeted.len(),
        tracked = tables.tracked.len(),
        head = tables.head.len(),
        extra = tables.extra.len(),
        "ingested log"
    );

    // Stage 2: Filter short tracks
    let min_len = options.min_track_len(tables.tracked.len());
    let track_lengths = filter_short_tracks(&mut tables, min_len);

    // Stage 3: Smooth and re-derive velocities
    smooth_tracks(&mut tables.tracked, arena, options.smooth)?;

    // Stage 4: Arena geometry
    let arena_polygon = tables.geometry.as_ref().and_then(|g| arena.intersect_polygon(g));
    if tables.geometry.is_some() && arena_polygon.is_none() {
        warn!("arena boundary does not intersect the arena");
    }
    for row in &mut tables.tracked {
        row.in_area = arena_polygon
            .as_ref()
            .map_or(false, |poly| poly.contains(Point::new(row.x, row.y)));
        row.experiment = 0;
    }

    let extra = tables.extra_table(&channels);
    Ok(Session {
        geometry: tables.geometry,
        arena_polygon,
        targeted: tables.targeted,
        tracked: tables.tracked,
        head: tables.head,
        extra,
        timezone: timezone.to_string(),
        track_lengths,
    })
}

/// Session loaded as part of a batch
#[derive(Debug, Clone)]
pub struct LoadedSession {
    pub path: PathBuf,
    pub start: NaiveDateTime,
    pub session: Session,
}

/// Stateful loader for repeated loads sharing a reader and a timezone policy.
///
/// Counts how many loads actually ran the pipeline instead of using the cache.
pub struct SessionLoader<R: LogReader = JsonLogReader> {
    reader: R,
    policy: TimezonePolicy,
    recomputations: usize,
}

impl Default for SessionLoader<JsonLogReader> {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLoader<JsonLogReader> {
    /// Create a loader for NDJSON logs, reading the timezone policy from the environment
    pub fn new() -> Self {
        Self::with_reader(JsonLogReader::default())
    }
}

impl<R: LogReader> SessionLoader<R> {
    pub fn with_reader(reader: R) -> Self {
        Self {
            reader,
            policy: TimezonePolicy::from_env(),
            recomputations: 0,
        }
    }

    pub fn with_policy(mut self, policy: TimezonePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Number of loads that ran the pipeline
    pub fn recomputations(&self) -> usize {
        self.recomputations
    }

    /// Load one log, using its cache file when it matches.
    ///
    /// A calibration sidecar next to the log is applied to `arena` before the
    /// cache is consulted, so a new calibration invalidates stored results.
    pub fn load(
        &mut self,
        path: &Path,
        arena: &Arena,
        options: &LoadOptions,
    ) -> Result<Session, AnalysisError> {
        options.validate()?;

        let arena = match Calibration::load(&calibration_path(path)) {
            Some(calibration) => arena.clone().with_calibration(calibration)?,
            None => arena.clone(),
        };
        let (timezone, tz) = self.policy.resolve(options.tzname.as_deref())?;

        let key = CacheKey::new(path, &arena, options, &timezone);
        let cache = ResultCache::for_input(path);
        if let Lookup::Hit(session) = cache.lookup(&key) {
            return Ok(*session);
        }

        info!(path = %path.display(), timezone = %timezone, "loading log");
        let events = self.reader.read_events(path)?;
        let session = process_events(&events, &arena, options, &timezone, tz)?;
        self.recomputations += 1;

        if let Err(e) = cache.store(&key, &session) {
            warn!(path = %cache.path().display(), error = %e, "failed to write cache");
        }
        Ok(session)
    }

    /// Load every log whose file name carries a start time.
    ///
    /// Inputs with unparseable names are skipped with a warning; any other
    /// failure aborts the batch.
    pub fn load_many(
        &mut self,
        paths: &[PathBuf],
        arena: &Arena,
        options: &LoadOptions,
    ) -> Result<Vec<LoadedSession>, AnalysisError> {
        let mut loaded = Vec::new();
        for path in paths {
            let start = match session_start_from_filename(path) {
                Ok(start) => start,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping log");
                    continue;
                }
            };
            let session = self.load(path, arena, options)?;
            loaded.push(LoadedSession {
                path: path.clone(),
                start,
                session,
            });
        }
        Ok(loaded)
    }
}

/// Load one log with the default reader and the environment's timezone policy
pub fn load_session(
    path: &Path,
    arena: &Arena,
    options: &LoadOptions,
) -> Result<Session, AnalysisError> {
    SessionLoader::new().load(path, arena, options)
}

fn merge_extra(into: &mut Option<ExtraTable>, other: Option<ExtraTable>) {
    let Some(other) = other else {
        return;
    };
    match into {
        Some(table) => {
            for column in other.columns {
                if !table.columns.contains(&column) {
                    table.columns.push(column);
                }
            }
            table.rows.extend(other.rows);
        }
        None => *into = Some(other),
    }
}

/// Concatenate sessions of the same arena, numbering their experiments.
///
/// Tracked rows of the n-th session get experiment id n. Every session's
/// boundary polygon must intersect the first one's unless
/// `geom_must_intersect` is false, in which case a mismatch is only logged.
pub fn merge_sessions(
    sessions: Vec<Session>,
    geom_must_intersect: bool,
) -> Result<Session, AnalysisError> {
    let mut sessions = sessions.into_iter();
    let mut merged = sessions.next().ok_or(AnalysisError::EmptyMerge)?;
    for row in &mut merged.tracked {
        row.experiment = 0;
    }

    for (n, mut session) in (1u32..).zip(sessions) {
        if let (Some(first), Some(geom)) = (&merged.geometry, &session.geometry) {
            if !first.intersects(geom) {
                if geom_must_intersect {
                    return Err(AnalysisError::GeometryMismatch(format!(
                        "experiment {} boundary {:?} vs {:?}",
                        n, geom, first
                    )));
                }
                warn!(experiment = n, "arena geometry does not intersect the first session's");
            }
        }
        if session.timezone != merged.timezone {
            warn!(
                experiment = n,
                timezone = %session.timezone,
                first = %merged.timezone,
                "merging sessions loaded in different timezones"
            );
        }

        for row in &mut session.tracked {
            row.experiment = n;
        }
        merged.targeted.append(&mut session.targeted);
        merged.tracked.append(&mut session.tracked);
        merged.head.append(&mut session.head);
        merged.track_lengths.append(&mut session.track_lengths);
        merge_extra(&mut merged.extra, session.extra);
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Unit;
    use crate::cache::cache_path;
    use crate::extra::{ExtraTopics, FieldKind, FieldSpec};
    use crate::schema::{to_ndjson, Stamp};
    use crate::test_support::{arena_square, geometry_event, session_log};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write_log(dir: &TempDir, name: &str, events: &[LogEvent]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, to_ndjson(events).unwrap()).unwrap();
        path
    }

    fn loader() -> SessionLoader {
        SessionLoader::new().with_policy(TimezonePolicy::lenient())
    }

    fn options() -> LoadOptions {
        LoadOptions::default().with_filter_short(10)
    }

    #[test]
    fn test_session_start_from_filename() {
        let start = session_start_from_filename(Path::new("/data/2013-10-07-16-59-29.bag")).unwrap();
        assert_eq!(start.to_string(), "2013-10-07 16:59:29");

        let start = session_start_from_filename(Path::new("2013-10-07-16-59-29.bag.ndjson")).unwrap();
        assert_eq!(start.to_string(), "2013-10-07 16:59:29");

        assert!(matches!(
            session_start_from_filename(Path::new("notes.bag")),
            Err(AnalysisError::InvalidFilename(_))
        ));
    }

    #[test]
    fn test_short_track_filtered_from_all_tables() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, "log.ndjson", &session_log(&[(1, 5), (2, 50)]));

        let session = loader().load(&path, &Arena::default(), &options()).unwrap();
        assert!(session.tracked.iter().all(|r| r.obj_id == 2));
        assert_eq!(session.tracked.len(), 50);
        assert!(session.targeted.iter().all(|r| r.obj_id != 1));
        assert!(!session.targeted.is_empty());
        assert_eq!(session.obj_ids(), vec![2]);
        assert_eq!(session.track_lengths.len(), 2);
        assert_eq!(session.timezone, "CET");
    }

    #[test]
    fn test_cache_round_trip_skips_recomputation() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, "log.ndjson", &session_log(&[(1, 120)]));
        let arena = Arena::new(Unit::Mm);
        let options = options().with_smoothing(true);

        let mut loader = loader();
        let first = loader.load(&path, &arena, &options).unwrap();
        assert_eq!(loader.recomputations(), 1);
        assert!(cache_path(&path).exists());

        let second = loader.load(&path, &arena, &options).unwrap();
        assert_eq!(loader.recomputations(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_changed_parameters_force_recomputation() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, "log.ndjson", &session_log(&[(1, 120)]));
        let arena = Arena::default();

        let mut loader = loader();
        loader.load(&path, &arena, &options()).unwrap();
        loader.load(&path, &arena, &options().with_smoothing(true)).unwrap();
        assert_eq!(loader.recomputations(), 2);

        loader.load(&path, &Arena::new(Unit::Cm), &options().with_smoothing(true)).unwrap();
        assert_eq!(loader.recomputations(), 3);

        loader
            .load(&path, &Arena::new(Unit::Cm), &options().with_smoothing(true).with_timezone("UTC"))
            .unwrap();
        assert_eq!(loader.recomputations(), 4);

        // the last entry is cached again
        loader
            .load(&path, &Arena::new(Unit::Cm), &options().with_smoothing(true).with_timezone("UTC"))
            .unwrap();
        assert_eq!(loader.recomputations(), 4);
    }

    #[test]
    fn test_strict_timezone_requires_name() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, "log.ndjson", &session_log(&[(1, 20)]));

        let mut loader = SessionLoader::new().with_policy(TimezonePolicy::strict());
        let result = loader.load(&path, &Arena::default(), &options());
        assert!(matches!(result, Err(AnalysisError::MissingTimezone)));
        assert!(!cache_path(&path).exists());

        let session = loader
            .load(&path, &Arena::default(), &options().with_timezone("Europe/Vienna"))
            .unwrap();
        assert_eq!(session.timezone, "Europe/Vienna");
    }

    #[test]
    fn test_in_area_and_arena_polygon() {
        let dir = TempDir::new().unwrap();
        let mut events = session_log(&[(1, 150)]);
        // leaves the drawn square after 100 px
        events.retain(|e| e.topic != crate::schema::TOPIC_TARGETED);
        let path = write_log(&dir, "log.ndjson", &events);

        let session = loader().load(&path, &Arena::default(), &options()).unwrap();
        let poly = session.arena_polygon.as_ref().unwrap();
        assert_eq!(poly.points.len(), arena_square().len());
        assert!(session.tracked.iter().take(100).all(|r| r.in_area));
        assert!(session.tracked.iter().skip(101).all(|r| !r.in_area));
    }

    #[test]
    fn test_calibration_sidecar_applied() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, "log.ndjson", &session_log(&[(1, 20)]));
        let calibration = json!({"cx": 350.0, "cy": 250.0, "r": 210.0, "xlim": [140.0, 560.0], "ylim": [40.0, 460.0]});
        fs::write(calibration_path(&path), calibration.to_string()).unwrap();

        let session = loader().load(&path, &Arena::new(Unit::M), &options()).unwrap();
        // x = (x_px - cx) * rw / 210
        let row = &session.tracked[0];
        assert!((row.x - (row.x_px - 350.0) * 0.045 / 210.0).abs() < 1e-12);
    }

    #[test]
    fn test_extra_topics_collected() {
        let dir = TempDir::new().unwrap();
        let mut events = session_log(&[(1, 20)]);
        events.push(LogEvent::new(
            "/flymad/laser_power",
            Stamp::new(crate::test_support::BASE_SECS, 0),
            json!({"data": 0.25}),
        ));
        let path = write_log(&dir, "log.ndjson", &events);

        let extra = ExtraTopics::new()
            .with_topic("/flymad/laser_power", vec![FieldSpec::new("data", FieldKind::Float)]);
        let session = loader()
            .load(&path, &Arena::default(), &options().with_extra_topics(extra))
            .unwrap();
        let table = session.extra.unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(
            table.rows[0].values["e_flymad_laser_power_data"],
            Some(crate::extra::ExtraValue::Float(0.25))
        );
    }

    #[test]
    fn test_load_many_skips_bad_names() {
        let dir = TempDir::new().unwrap();
        let good = write_log(&dir, "2013-10-07-16-59-29.bag", &session_log(&[(1, 20)]));
        let bad = write_log(&dir, "scratch.bag", &session_log(&[(1, 20)]));

        let mut loader = loader();
        let loaded = loader.load_many(&[bad, good.clone()], &Arena::default(), &options()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].path, good);
        assert_eq!(loader.recomputations(), 1);
    }

    #[test]
    fn test_merge_numbers_experiments() {
        let dir = TempDir::new().unwrap();
        let a = write_log(&dir, "a.ndjson", &session_log(&[(1, 20)]));
        let b = write_log(&dir, "b.ndjson", &session_log(&[(4, 30)]));

        let mut loader = loader();
        let sessions = vec![
            loader.load(&a, &Arena::default(), &options()).unwrap(),
            loader.load(&b, &Arena::default(), &options()).unwrap(),
        ];
        let merged = merge_sessions(sessions, true).unwrap();
        assert_eq!(merged.tracked.len(), 50);
        assert!(merged.track(1).all(|r| r.experiment == 0));
        assert!(merged.track(4).all(|r| r.experiment == 1));
    }

    #[test]
    fn test_merge_geometry_must_intersect() {
        let dir = TempDir::new().unwrap();
        let a = write_log(&dir, "a.ndjson", &session_log(&[(1, 20)]));
        let mut far = session_log(&[(1, 20)]);
        far[0] = geometry_event(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        let b = write_log(&dir, "b.ndjson", &far);

        let mut loader = loader();
        let load = |loader: &mut SessionLoader, p: &Path| loader.load(p, &Arena::default(), &options()).unwrap();
        let sessions = vec![load(&mut loader, &a), load(&mut loader, &b)];

        let result = merge_sessions(sessions.clone(), true);
        assert!(matches!(result, Err(AnalysisError::GeometryMismatch(_))));

        let merged = merge_sessions(sessions, false).unwrap();
        assert_eq!(merged.tracked.len(), 40);
    }

    #[test]
    fn test_merge_empty_and_single() {
        assert!(matches!(merge_sessions(Vec::new(), true), Err(AnalysisError::EmptyMerge)));

        let dir = TempDir::new().unwrap();
        let a = write_log(&dir, "a.ndjson", &session_log(&[(1, 20)]));
        let session = loader().load(&a, &Arena::default(), &options()).unwrap();
        let merged = merge_sessions(vec![session.clone()], true).unwrap();
        assert_eq!(merged, session);
    }
}
