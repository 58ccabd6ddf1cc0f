//! Ingest progress reporting.
//!
//! Reports what the run is doing (walking the tree, which phase is draining,
//! how many jobs each phase handled) on **stderr**, so stdout stays reserved
//! for the final summary table.

use std::io::Write;

use crate::models::EntityType;

/// A single progress event for an ingest run.
#[derive(Clone, Debug)]
pub enum IngestProgressEvent {
    /// The directory walk has started. Totals are unknown until it ends.
    Walking { root: String },
    /// The walk finished; `routed` entries went to queues.
    Walked { routed: u64, deferred: u64 },
    /// Workers started on the queues of a phase.
    PhaseStarted {
        phase: usize,
        phases: usize,
        types: Vec<EntityType>,
    },
    /// Every queue of the phase is drained.
    PhaseFinished {
        phase: usize,
        phases: usize,
        jobs: u64,
        failed: u64,
    },
}

/// Reports ingest progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

fn type_list(types: &[EntityType]) -> String {
    types
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Human-friendly progress on stderr: "ingest  phase 1/3  12,345 jobs  2 failed".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Walking { root } => format!("ingest {}  walking...\n", root),
            IngestProgressEvent::Walked { routed, deferred } => format!(
                "ingest  walked  {} routed ({} deferred)\n",
                format_number(*routed),
                format_number(*deferred)
            ),
            IngestProgressEvent::PhaseStarted {
                phase,
                phases,
                types,
            } => format!(
                "ingest  phase {}/{}  {}\n",
                phase,
                phases,
                type_list(types)
            ),
            IngestProgressEvent::PhaseFinished {
                phase,
                phases,
                jobs,
                failed,
            } => format!(
                "ingest  phase {}/{}  {} jobs  {} failed\n",
                phase,
                phases,
                format_number(*jobs),
                format_number(*failed)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &IngestProgressEvent) -> serde_json::Value {
        match event {
            IngestProgressEvent::Walking { root } => serde_json::json!({
                "event": "progress",
                "phase": "walking",
                "root": root
            }),
            IngestProgressEvent::Walked { routed, deferred } => serde_json::json!({
                "event": "progress",
                "phase": "walked",
                "routed": routed,
                "deferred": deferred
            }),
            IngestProgressEvent::PhaseStarted {
                phase,
                phases,
                types,
            } => serde_json::json!({
                "event": "phase_started",
                "phase": phase,
                "phases": phases,
                "types": types.iter().map(|t| t.as_str()).collect::<Vec<_>>()
            }),
            IngestProgressEvent::PhaseFinished {
                phase,
                phases,
                jobs,
                failed,
            } => serde_json::json!({
                "event": "phase_finished",
                "phase": phase,
                "phases": phases,
                "jobs": jobs,
                "failed": failed
            }),
        }
    }
}

impl ProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "unknown progress mode '{}'. Must be off, human, or json",
                other
            )),
        }
    }
}
