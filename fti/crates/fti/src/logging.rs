//! Tag Table and Heap Walk Logging
//!
//! Structured events for tag table maintenance and heap walks, useful for:
//! - Sizing the table for a tool's tagging pattern
//! - Spotting walks that abort early or visit far more than expected
//! - Correlating object-free storms with collections
//!
//! Every event is mirrored to the `log` facade at debug level (warn for
//! `ResizeDisabled`). Console output is off by default; tools and tests opt
//! in through [`configure_logger`].
//!
//! Log Levels:
//! - WARN: Table growth disabled after an allocation failure
//! - INFO: Walks, heap iterations and weak sweeps
//! - DEBUG: Table resizes
//! - TRACE: Memory usage reports

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Log level for tagging events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

/// Tagging event types
#[derive(Debug, Clone)]
pub enum TagEvent {
    /// Bucket array grew to the next size in the sequence
    TableResized {
        old_size: usize,
        new_size: usize,
        entries: usize,
        duration_us: u64,
    },

    /// Bucket array could not grow; the table keeps its current size
    ResizeDisabled { requested_bytes: usize, entries: usize },

    /// Periodic memory report while tracing is on
    MemoryUsage {
        entries: usize,
        size: usize,
        usage_kb: usize,
    },

    /// Post-collection sweep of the tag table
    WeakSweep {
        before: usize,
        after: usize,
        freed: usize,
        moved: usize,
        duration_us: u64,
    },

    /// Reachability walk started
    WalkStart { kind: &'static str },

    /// Reachability walk finished
    WalkEnd {
        kind: &'static str,
        objects_visited: u64,
        references_reported: u64,
        aborted: bool,
        duration_ms: f64,
    },

    /// Full-heap iteration finished
    HeapIteration {
        kind: &'static str,
        objects_seen: u64,
        objects_reported: u64,
        aborted: bool,
        duration_ms: f64,
    },
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct TagLoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Print events to stdout
    pub console: bool,

    /// Print JSON instead of text
    pub json: bool,

    /// Prefix console lines with a wall-clock timestamp
    pub timestamps: bool,
}

impl Default for TagLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: false,
            json: false,
            timestamps: true,
        }
    }
}

/// Event recorder shared by every tag table in the process
pub struct TagLogger {
    config: TagLoggerConfig,
    events: Mutex<Vec<(Instant, TagEvent)>>,
    enabled: AtomicBool,
}

impl TagLogger {
    pub fn new(config: TagLoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Record an event
    pub fn log(&self, event: TagEvent) {
        if !self.is_enabled() {
            return;
        }

        let level = Self::event_level(&event);
        Self::forward(level, &event);
        if level > self.config.level {
            return;
        }

        if self.config.console {
            self.output_console(&event);
        }
        self.events.lock().push((Instant::now(), event));
    }

    fn event_level(event: &TagEvent) -> LogLevel {
        match event {
            TagEvent::ResizeDisabled { .. } => LogLevel::Warn,
            TagEvent::WeakSweep { .. }
            | TagEvent::WalkStart { .. }
            | TagEvent::WalkEnd { .. }
            | TagEvent::HeapIteration { .. } => LogLevel::Info,
            TagEvent::TableResized { .. } => LogLevel::Debug,
            TagEvent::MemoryUsage { .. } => LogLevel::Trace,
        }
    }

    /// Mirror to the `log` facade
    fn forward(level: LogLevel, event: &TagEvent) {
        match level {
            LogLevel::Error | LogLevel::Warn => log::warn!("{}", Self::human(event)),
            _ => log::debug!("{}", Self::human(event)),
        }
    }

    fn output_console(&self, event: &TagEvent) {
        let prefix = if self.config.timestamps {
            format!("[{}] ", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
        } else {
            String::new()
        };

        if self.config.json {
            println!("{}{}", prefix, Self::json(event));
        } else {
            println!("{}{}", prefix, Self::human(event));
        }
    }

    /// Human-readable rendering
    pub fn human(event: &TagEvent) -> String {
        match event {
            TagEvent::TableResized {
                old_size,
                new_size,
                entries,
                duration_us,
            } => format!(
                "[tags] Resized table {} -> {} buckets ({} entries, {} us)",
                old_size, new_size, entries, duration_us
            ),
            TagEvent::ResizeDisabled {
                requested_bytes,
                entries,
            } => format!(
                "[tags] Unable to allocate larger table ({} bytes), resizing disabled at {} entries",
                requested_bytes, entries
            ),
            TagEvent::MemoryUsage {
                entries,
                size,
                usage_kb,
            } => format!(
                "[tags] {} entries in {} buckets ({} KB)",
                entries, size, usage_kb
            ),
            TagEvent::WeakSweep {
                before,
                after,
                freed,
                moved,
                duration_us,
            } => format!(
                "[tags] Sweep: {} -> {} entries, {} freed, {} moved ({} us)",
                before, after, freed, moved, duration_us
            ),
            TagEvent::WalkStart { kind } => format!("[walk] {} started", kind),
            TagEvent::WalkEnd {
                kind,
                objects_visited,
                references_reported,
                aborted,
                duration_ms,
            } => format!(
                "[walk] {} {}: {} objects, {} references ({:.2}ms)",
                kind,
                if *aborted { "aborted" } else { "completed" },
                objects_visited,
                references_reported,
                duration_ms
            ),
            TagEvent::HeapIteration {
                kind,
                objects_seen,
                objects_reported,
                aborted,
                duration_ms,
            } => format!(
                "[heap] {} {}: {} of {} objects reported ({:.2}ms)",
                kind,
                if *aborted { "aborted" } else { "completed" },
                objects_reported,
                objects_seen,
                duration_ms
            ),
        }
    }

    /// JSON rendering
    pub fn json(event: &TagEvent) -> serde_json::Value {
        match event {
            TagEvent::TableResized {
                old_size,
                new_size,
                entries,
                duration_us,
            } => serde_json::json!({
                "type": "table_resized",
                "old_size": old_size,
                "new_size": new_size,
                "entries": entries,
                "duration_us": duration_us
            }),
            TagEvent::ResizeDisabled {
                requested_bytes,
                entries,
            } => serde_json::json!({
                "type": "resize_disabled",
                "requested_bytes": requested_bytes,
                "entries": entries
            }),
            TagEvent::MemoryUsage {
                entries,
                size,
                usage_kb,
            } => serde_json::json!({
                "type": "memory_usage",
                "entries": entries,
                "size": size,
                "usage_kb": usage_kb
            }),
            TagEvent::WeakSweep {
                before,
                after,
                freed,
                moved,
                duration_us,
            } => serde_json::json!({
                "type": "weak_sweep",
                "before": before,
                "after": after,
                "freed": freed,
                "moved": moved,
                "duration_us": duration_us
            }),
            TagEvent::WalkStart { kind } => serde_json::json!({
                "type": "walk_start",
                "kind": kind
            }),
            TagEvent::WalkEnd {
                kind,
                objects_visited,
                references_reported,
                aborted,
                duration_ms,
            } => serde_json::json!({
                "type": "walk_end",
                "kind": kind,
                "objects_visited": objects_visited,
                "references_reported": references_reported,
                "aborted": aborted,
                "duration_ms": duration_ms
            }),
            TagEvent::HeapIteration {
                kind,
                objects_seen,
                objects_reported,
                aborted,
                duration_ms,
            } => serde_json::json!({
                "type": "heap_iteration",
                "kind": kind,
                "objects_seen": objects_seen,
                "objects_reported": objects_reported,
                "aborted": aborted,
                "duration_ms": duration_ms
            }),
        }
    }

    pub fn get_events(&self) -> Vec<(Instant, TagEvent)> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for TagLogger {
    fn default() -> Self {
        Self::new(TagLoggerConfig::default())
    }
}

lazy_static::lazy_static! {
    static ref TAG_LOGGER: Mutex<TagLogger> = Mutex::new(TagLogger::default());
}

/// Log an event to the global logger
pub fn log_event(event: TagEvent) {
    TAG_LOGGER.lock().log(event);
}

/// Replace the global logger configuration
pub fn configure_logger(config: TagLoggerConfig) {
    *TAG_LOGGER.lock() = TagLogger::new(config);
}

/// Number of events recorded by the global logger
pub fn get_event_count() -> usize {
    TAG_LOGGER.lock().event_count()
}

/// Events recorded by the global logger
pub fn get_events() -> Vec<TagEvent> {
    TAG_LOGGER
        .lock()
        .get_events()
        .into_iter()
        .map(|(_, event)| event)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep() -> TagEvent {
        TagEvent::WeakSweep {
            before: 10,
            after: 7,
            freed: 3,
            moved: 1,
            duration_us: 12,
        }
    }

    #[test]
    fn test_logger_records_events() {
        let logger = TagLogger::default();
        logger.log(sweep());
        assert_eq!(logger.event_count(), 1);

        logger.clear_events();
        assert_eq!(logger.event_count(), 0);
    }

    #[test]
    fn test_logger_disable() {
        let logger = TagLogger::default();
        logger.disable();
        logger.log(sweep());
        assert_eq!(logger.event_count(), 0);
    }

    #[test]
    fn test_level_filter() {
        let logger = TagLogger::default();
        logger.log(TagEvent::MemoryUsage {
            entries: 10_000,
            size: 4801,
            usage_kb: 253,
        });
        assert_eq!(logger.event_count(), 0);

        let logger = TagLogger::new(TagLoggerConfig {
            level: LogLevel::Trace,
            ..Default::default()
        });
        logger.log(TagEvent::MemoryUsage {
            entries: 10_000,
            size: 4801,
            usage_kb: 253,
        });
        assert_eq!(logger.event_count(), 1);
    }

    #[test]
    fn test_json_shape() {
        let json = TagLogger::json(&TagEvent::WalkEnd {
            kind: "follow_references",
            objects_visited: 5,
            references_reported: 9,
            aborted: true,
            duration_ms: 0.5,
        });
        assert_eq!(json["type"], "walk_end");
        assert_eq!(json["aborted"], true);
        assert_eq!(json["references_reported"], 9);
    }

    #[test]
    fn test_human_format() {
        let text = TagLogger::human(&sweep());
        assert!(text.contains("3 freed"));
        assert!(text.contains("10 -> 7"));
    }

    #[test]
    fn test_global_logger() {
        log_event(TagEvent::WalkStart {
            kind: "iterate_over_reachable_objects",
        });
        assert!(get_event_count() > 0);
    }
}
