use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use error_stack::{Report, ResultExt};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::error::{MigrationError, Result};
use crate::network::{ReachFilter, RiverSegment};
use crate::pipeline::{run_segment, SegmentContext};
use crate::sink::RecordSink;

#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Pending,
    Running,
    Complete { rows: usize },
    Failed { error: String },
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Complete { rows } => write!(f, "complete ({rows} rows)"),
            JobState::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}

/// Final state of every segment selected for a run, by reach id.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub jobs: BTreeMap<i64, JobState>,
    /// Segments rejected by the reach filter.
    pub skipped: Vec<i64>,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.jobs.values().filter(|s| matches!(s, JobState::Complete { .. })).count()
    }

    pub fn failed(&self) -> Vec<(i64, &str)> {
        self.jobs.iter()
            .filter_map(|(&id, s)| match s {
                JobState::Failed { error } => Some((id, error.as_str())),
                _ => None,
            })
            .collect()
    }
}

/// Stores a segment's state; false if the table is poisoned and the
/// update was dropped.
fn record_state(states: &Mutex<BTreeMap<i64, JobState>>, id: i64, state: JobState) -> bool {
    log::debug!("reach {id}: {state}");
    match states.lock() {
        Ok(mut states) => {
            states.insert(id, state);
            true
        }
        Err(_) => {
            log::error!("job table poisoned, reach {id} state {state} lost");
            false
        }
    }
}

/// Runs segments with at most `max_concurrent` in flight and streams their
/// rows to `sink` as they complete. No segment is retried.
pub fn run_batch(
    ctx: &SegmentContext,
    segments: &[RiverSegment],
    filter: &ReachFilter,
    max_concurrent: usize,
    sink: &mut dyn RecordSink,
) -> Result<BatchReport> {
    let (selected, rejected): (Vec<&RiverSegment>, Vec<&RiverSegment>) =
        segments.iter().partition(|s| filter.accepts(s));
    let skipped: Vec<i64> = rejected.iter().map(|s| s.id).collect();
    log::info!(
        "{} segments selected, {} skipped by filter (min width {}, river only {})",
        selected.len(), skipped.len(), filter.min_width, filter.river_type_only);

    let states: Mutex<BTreeMap<i64, JobState>> = Mutex::new(
        selected.iter().map(|s| (s.id, JobState::Pending)).collect());
    let set_state = |id: i64, state: JobState| record_state(&states, id, state);
    let sink = Mutex::new(sink);

    let pool = ThreadPoolBuilder::new()
        .num_threads(max_concurrent.max(1))
        .build()
        .change_context(MigrationError::ResourceExceeded)
        .attach_printable("building the segment worker pool")?;

    pool.install(|| {
        selected.par_iter().with_max_len(1).for_each(|segment| {
            set_state(segment.id, JobState::Running);
            let outcome = run_segment(ctx, segment).and_then(|rows| {
                let mut sink = sink.lock()
                    .map_err(|_| Report::new(MigrationError::Io).attach_printable("record sink poisoned"))?;
                sink.write_rows(&rows)?;
                Ok(rows.len())
            });
            match outcome {
                Ok(rows) => {
                    log::info!("reach {}: {} node rows", segment.id, rows);
                    set_state(segment.id, JobState::Complete { rows });
                }
                Err(report) => {
                    log::error!("reach {} failed: {:?}", segment.id, report);
                    set_state(segment.id, JobState::Failed {
                        error: format!("{}", report.current_context()),
                    });
                }
            }
        });
    });

    sink.into_inner()
        .map_err(|_| Report::new(MigrationError::Io).attach_printable("record sink poisoned"))?
        .flush()?;
    let jobs = states.into_inner()
        .map_err(|_| Report::new(MigrationError::Io).attach_printable("job table poisoned"))?;
    let report = BatchReport { jobs, skipped };
    log::info!("{} of {} segments complete", report.completed(), report.jobs.len());
    Ok(report)
}
