use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use libdbbench_core::{render, BenchError, OutputFormat, Report};

/// Write reports to `path`, or to stdout when no path is given
pub fn write_reports(
    reports: &[Report],
    format: OutputFormat,
    path: Option<&Path>,
) -> Result<(), BenchError> {
    match path {
        Some(path) => {
            let mut out = BufWriter::new(File::create(path)?);
            render(reports, format, &mut out)?;
            out.flush()?;
            tracing::info!(path = %path.display(), %format, "Report written");
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            render(reports, format, &mut out)?;
            out.flush()?;
        }
    }
    Ok(())
}
