use std::io::{self, Write};

use crate::app::RunReport;

/// `[OK] <id>` / `[FAIL] <id>: <reason>` lines followed by the totals.
pub fn write_summary<W: Write>(mut out: W, report: &RunReport) -> io::Result<()> {
    for outcome in &report.outcomes {
        writeln!(out, "{outcome}")?;
    }
    write!(
        out,
        "{} ok, {} failed",
        report.ok_count(),
        report.failed_count()
    )?;
    if !report.rejected.is_empty() {
        write!(out, ", {} malformed records skipped", report.rejected.len())?;
    }
    writeln!(out)?;
    if let Some(path) = &report.table_path {
        writeln!(out, "metadata: {path}")?;
    }
    Ok(())
}

pub fn print_summary(report: &RunReport) -> io::Result<()> {
    let stdout = io::stdout();
    let mut lock = stdout.lock();
    write_summary(&mut lock, report)?;
    lock.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FailureKind, FetchOutcome};
    use crate::error::ResolutionError;

    #[test]
    fn summary_lines() {
        let report = RunReport {
            outcomes: vec![
                FetchOutcome::success("SRR1"),
                FetchOutcome::failed("SRR2", FailureKind::RetryExhausted, "retry exhausted"),
            ],
            rejected: vec![ResolutionError::Malformed {
                id: "SRR3".to_string(),
                reason: "1 locations but 2 digests".to_string(),
            }],
            table_path: None,
            stopped: None,
        };
        let mut buffer = Vec::new();
        write_summary(&mut buffer, &report).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "[OK] SRR1\n[FAIL] SRR2: retry exhausted\n1 ok, 1 failed, 1 malformed records skipped\n"
        );
    }
}
