//! Human-readable batch summary.

use vigil_shared::{BatchResult, ProcessingStatus};

/// Render a batch summary: counts per status, then one line per ticket
/// that needs attention (errors, clarifications, skips).
pub fn render_summary(batch: &BatchResult) -> String {
    let elapsed = (batch.finished_at - batch.started_at).num_milliseconds();
    let mut out = String::new();

    out.push_str(&format!(
        "Batch {} — {} ticket(s) in {elapsed} ms\n",
        batch.run_id,
        batch.results.len()
    ));
    out.push_str(&format!(
        "  success: {}  skipped: {}  no-match: {}  errors: {}\n",
        batch.count(ProcessingStatus::Success),
        batch.count(ProcessingStatus::Skipped),
        batch.count(ProcessingStatus::NoMatch),
        batch.count(ProcessingStatus::Error),
    ));

    let attention: Vec<_> = batch
        .results
        .iter()
        .filter(|r| r.status != ProcessingStatus::Success)
        .collect();
    if !attention.is_empty() {
        out.push('\n');
        for result in attention {
            out.push_str(&format!(
                "  #{} [{}] {:?}: {}\n",
                result.ticket_id, result.stage, result.status, result.detail
            ));
        }
    }
    out
}
