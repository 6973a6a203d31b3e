use std::error::Error;
use std::fmt;
use std::io::Write;
use std::path::Path;

use uqrun_core::UqError;
use uqrun_run::{HookRegistry, Study, StudyConfig, StudyReport};

pub mod clean;
pub mod collect;
pub mod generate;
pub mod run;
pub mod status;

pub(crate) fn load_study(config: &Path) -> Result<Study, Box<dyn Error>> {
    let config = StudyConfig::load(config).map_err(boxed)?;
    Study::new(config, HookRegistry::default()).map_err(boxed)
}

pub(crate) fn boxed(err: UqError) -> Box<dyn Error> {
    Box::new(err)
}

/// Writes `report` as pretty JSON or as a short human summary.
pub fn print_report(
    out: &mut impl Write,
    report: &StudyReport,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(report)?)?;
        return Ok(());
    }
    writeln!(
        out,
        "study {}: {} points, {} succeeded, {} failed",
        report.study_hash,
        report.points,
        report.tally.succeeded,
        report.tally.failed
    )?;
    if report.resumed > 0 {
        writeln!(out, "  {} points already had results", report.resumed)?;
    }
    for (index, kind) in &report.tally.failures {
        writeln!(out, "  point {index}: {kind} failure")?;
    }
    if !report.unsubmitted.is_empty() {
        writeln!(out, "  never submitted: {}", join(&report.unsubmitted))?;
    }
    if !report.missing.is_empty() {
        writeln!(out, "  no result: {}", join(&report.missing))?;
    }
    writeln!(out, "  results: {}", report.output.display())?;
    Ok(())
}

fn join(indices: &[usize]) -> String {
    indices
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Returned when a pass finished but left points without a succeeded row.
#[derive(Debug)]
pub struct IncompleteStudy {
    pub failed: usize,
    pub pending: usize,
}

impl fmt::Display for IncompleteStudy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "study incomplete: {} failed, {} without a result",
            self.failed, self.pending
        )
    }
}

impl Error for IncompleteStudy {}

pub(crate) fn require_complete(report: &StudyReport) -> Result<(), Box<dyn Error>> {
    if report.is_complete() {
        return Ok(());
    }
    Err(Box::new(IncompleteStudy {
        failed: report.tally.failed,
        pending: report.unsubmitted.len() + report.missing.len(),
    }))
}
