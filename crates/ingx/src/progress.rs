//! 📊 progress.rs: "Is it done yet?", asked once per second, forever.
//!
//! 🚀 Two displays live here:
//! - [`PumpProgress`]: an indicatif spinner for streaming mode, with a comfy-table
//!   message showing payloads drained, payloads per second, and elapsed time.
//! - [`render_poll_table`]: a borderless comfy-table summarizing where each
//!   tracked operation ended up. Queued mode prints it once everyone is terminal.
//!
//! ⚠️ Watching the spinner will not make the cluster ingest faster. We checked.

use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

use crate::poller::PollProgress;

/// 🔢 Formats a number with commas. "1000000" → "1,000,000", you're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ Formats a Duration into MM:SS or HH:MM:SS.
/// If it shows HH:MM:SS, the cluster is having a day. Maybe call someone.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📊 Streaming-mode progress: how many payloads have come back from the pump.
pub(crate) struct PumpProgress {
    /// 🏷️ "db.table", shown above the numbers
    target_name: String,
    drained: u64,
    progress_bar: ProgressBar,
    start_time: Instant,
}

impl std::fmt::Debug for PumpProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("PumpProgress")
            .field("target_name", &self.target_name)
            .field("drained", &self.drained)
            .finish()
    }
}

impl PumpProgress {
    pub(crate) fn new(target_name: String) -> Self {
        let progress_bar = ProgressBar::new_spinner();
        // -- 🐛 a bad template only costs us the pretty spinner, the numbers still land in the log
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            progress_bar.set_style(style);
        }
        progress_bar.enable_steady_tick(Duration::from_millis(120));

        Self {
            target_name,
            drained: 0,
            progress_bar,
            start_time: Instant::now(),
        }
    }

    /// 🔄 `drained` is the running total of payloads the pump has collected.
    pub(crate) fn update(&mut self, drained: u64) {
        self.drained = drained;
        self.render();
    }

    pub(crate) fn finish(&self) {
        self.progress_bar.finish_and_clear();
    }

    fn payloads_per_sec(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.drained as f64 / elapsed
        } else {
            0.0
        }
    }

    fn render(&self) {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{:.2} Payloads/s", self.payloads_per_sec()))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} Payloads", format_number(self.drained)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(self.start_time.elapsed())))
                .set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar
            .set_message(format!("target: {}\n{}", self.target_name, table));
    }
}

/// 🍽️ One row per operation: id, status, queries, elapsed, and the three counters.
pub fn render_poll_table(progress: &[PollProgress]) -> String {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "operation",
        "status",
        "queries",
        "elapsed",
        "in progress",
        "failed",
        "succeeded",
    ]);

    for the_row in progress {
        table.add_row(vec![
            Cell::new(&the_row.operation_id),
            Cell::new(the_row.summary.status),
            Cell::new(the_row.query).set_alignment(CellAlignment::Right),
            Cell::new(format_duration(the_row.elapsed)).set_alignment(CellAlignment::Right),
            Cell::new(format_number(the_row.summary.in_progress_count))
                .set_alignment(CellAlignment::Right),
            Cell::new(format_number(the_row.summary.failed_count))
                .set_alignment(CellAlignment::Right),
            Cell::new(format_number(the_row.summary.succeeded_count))
                .set_alignment(CellAlignment::Right),
        ]);
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{IngestStatus, StatusSummary};

    #[test]
    fn the_one_where_big_numbers_get_their_commas() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn the_one_where_durations_grow_an_hours_column_when_needed() {
        assert_eq!(format_duration(Duration::from_secs(4)), "00:04");
        assert_eq!(format_duration(Duration::from_secs(65)), "01:05");
        assert_eq!(format_duration(Duration::from_secs(3723)), "01:02:03");
    }

    #[test]
    fn the_one_where_the_poll_table_shows_every_operation() {
        let the_rows = vec![
            PollProgress {
                operation_id: "op-1".into(),
                query: 4,
                elapsed: Duration::from_secs(4),
                summary: StatusSummary::new(IngestStatus::Succeeded, 0, 0, 7),
            },
            PollProgress {
                operation_id: "op-2".into(),
                query: 2,
                elapsed: Duration::from_secs(2),
                summary: StatusSummary::new(IngestStatus::Failed, 0, 3, 1000),
            },
        ];

        let the_table = render_poll_table(&the_rows);
        assert!(the_table.contains("op-1"));
        assert!(the_table.contains("Succeeded"));
        assert!(the_table.contains("op-2"));
        assert!(the_table.contains("Failed"));
        assert!(the_table.contains("1,000"));
        assert!(the_table.contains("00:04"));
    }
}
