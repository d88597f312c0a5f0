//! Runtime statistics and sweep metrics over fleet runs.
//!
//! A single run yields per-client runtimes; [`RunStats`] condenses them into
//! the min/max/mean/median/std-dev summary printed after a benchmark run.
//! [`SweepRow`] records one run of a multi-count sweep for the metrics CSV.

#![allow(clippy::cast_precision_loss)]

use crate::fleet::FleetSummary;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Summary statistics over the per-client game runtimes of one run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Fastest client, in seconds
    pub min_secs: f64,
    /// Slowest client, in seconds
    pub max_secs: f64,
    /// Arithmetic mean, in seconds
    pub mean_secs: f64,
    /// Median (midpoint average for even counts), in seconds
    pub median_secs: f64,
    /// Population standard deviation, in seconds
    pub std_dev_secs: f64,
    /// Total client-seconds across the fleet
    pub sum_secs: f64,
}

impl RunStats {
    /// Compute statistics over a run's per-client runtimes.
    ///
    /// Returns `None` when no client finished.
    #[must_use]
    pub fn from_runtimes(runtimes: &[Duration]) -> Option<Self> {
        if runtimes.is_empty() {
            return None;
        }
        let mut secs: Vec<f64> = runtimes.iter().map(Duration::as_secs_f64).collect();
        secs.sort_by(f64::total_cmp);

        let n = secs.len() as f64;
        let sum = secs.iter().sum::<f64>();
        let mean = sum / n;
        let variance = secs.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let mid = secs.len() / 2;
        let median = if secs.len() % 2 == 0 {
            (secs[mid - 1] + secs[mid]) / 2.0
        } else {
            secs[mid]
        };

        Some(Self {
            min_secs: secs[0],
            max_secs: secs[secs.len() - 1],
            mean_secs: mean,
            median_secs: median,
            std_dev_secs: variance.sqrt(),
            sum_secs: sum,
        })
    }

    /// Render the statistics block printed after a benchmark run
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "Game runtime statistics:\n\
             Minimum:{:7.2} s\n\
             Maximum:{:7.2} s\n\
             Average:{:7.2} s\n\
             Median: {:7.2} s\n\
             Std Dev:{:8.3} s\n\
             Sum:    {:7.0} s\n",
            self.min_secs,
            self.max_secs,
            self.mean_secs,
            self.median_secs,
            self.std_dev_secs,
            self.sum_secs
        )
    }
}

/// One sweep run, ready to be written as a metrics CSV row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepRow {
    /// Run id: Unix time in microseconds at record time
    pub id: i64,
    /// Host identification (`os-arch`)
    pub machine: String,
    /// Fleet size requested
    pub clients: usize,
    /// Clients that finished
    pub finished: usize,
    /// Wall-clock run duration, in seconds
    pub elapsed_secs: f64,
    /// Runtime statistics; `None` when no client finished
    pub stats: Option<RunStats>,
}

impl SweepRow {
    /// Record one finished run
    #[must_use]
    pub fn new(summary: &FleetSummary) -> Self {
        Self {
            id: Utc::now().timestamp_micros(),
            machine: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            clients: summary.clients,
            finished: summary.finished,
            elapsed_secs: summary.elapsed.as_secs_f64(),
            stats: RunStats::from_runtimes(&summary.runtimes),
        }
    }
}

/// Header row of the sweep metrics CSV
pub const SWEEP_CSV_HEADER: &str =
    "id,machine,clients,finished,elapsed_secs,min_secs,max_secs,mean_secs,median_secs,std_dev_secs,sum_secs";

/// Render sweep rows as a metrics CSV.
///
/// Statistics columns hold `NA` for runs where no client finished.
#[must_use]
pub fn sweep_csv(rows: &[SweepRow]) -> String {
    let mut out = String::from(SWEEP_CSV_HEADER);
    out.push('\n');
    for row in rows {
        let stats = row.stats.as_ref().map_or_else(
            || "NA,NA,NA,NA,NA,NA".to_string(),
            |s| {
                format!(
                    "{:.3},{:.3},{:.3},{:.3},{:.3},{:.3}",
                    s.min_secs, s.max_secs, s.mean_secs, s.median_secs, s.std_dev_secs, s.sum_secs
                )
            },
        );
        out.push_str(&format!(
            "{},{},{},{},{:.3},{}\n",
            row.id, row.machine, row.clients, row.finished, row.elapsed_secs, stats
        ));
    }
    out
}
