use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cytejob_core::job::{ClusterState, ClusterStatusMap};
use cytejob_core::traits::{ProgressFrame, ProgressSink};
use tracing_subscriber::fmt::MakeWriter;

const SPINNER: &[char] = &['|', '/', '-', '\\'];

/// Per-state cluster counts for one frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClusterSummary {
    pub completed: usize,
    pub processing: usize,
    pub pending: usize,
    pub failed: usize,
    pub unknown: usize,
}

impl ClusterSummary {
    pub fn from_map(clusters: &ClusterStatusMap) -> Self {
        clusters
            .values()
            .fold(Self::default(), |mut summary, state| {
                match state {
                    ClusterState::Completed => summary.completed += 1,
                    ClusterState::Processing => summary.processing += 1,
                    ClusterState::Pending => summary.pending += 1,
                    ClusterState::Failed => summary.failed += 1,
                    ClusterState::Unknown => summary.unknown += 1,
                }
                summary
            })
    }

    pub fn total(&self) -> usize {
        self.completed + self.processing + self.pending + self.failed + self.unknown
    }
}

/// Set while an in-progress frame has left the cursor mid-line.
///
/// Shared between [`TerminalProgress`] and [`LineBreakingWriter`] so log
/// output starts on a fresh line.
#[derive(Debug, Clone, Default)]
pub struct OpenLine(Arc<AtomicBool>);

impl OpenLine {
    fn set(&self, open: bool) {
        self.0.store(open, Ordering::SeqCst);
    }

    /// Clear the flag, returning whether a line was open.
    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// `MakeWriter` that ends an open progress line before each log event.
pub struct LineBreakingWriter<M> {
    inner: M,
    line: OpenLine,
}

impl<M> LineBreakingWriter<M> {
    pub fn new(inner: M, line: OpenLine) -> Self {
        Self { inner, line }
    }
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for LineBreakingWriter<M> {
    type Writer = M::Writer;

    fn make_writer(&'a self) -> Self::Writer {
        let mut writer = self.inner.make_writer();
        if self.line.take() {
            let _ = writeln!(writer);
        }
        writer
    }
}

/// Single-line progress display, redrawn in place with `\r`.
pub struct TerminalProgress<W: Write + Send> {
    out: Mutex<W>,
    line: OpenLine,
}

impl TerminalProgress<std::io::Stderr> {
    pub fn stderr(line: OpenLine) -> Self {
        Self::new(std::io::stderr(), line)
    }
}

impl<W: Write + Send> TerminalProgress<W> {
    pub fn new(out: W, line: OpenLine) -> Self {
        Self {
            out: Mutex::new(out),
            line,
        }
    }

    /// Terminate a line left open by an in-progress frame.
    pub fn finish(&self) {
        if self.line.take() {
            let mut out = match self.out.lock() {
                Ok(out) => out,
                Err(poisoned) => poisoned.into_inner(),
            };
            let _ = writeln!(out);
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> ProgressSink for TerminalProgress<W> {
    fn render(&self, frame: &ProgressFrame<'_>) {
        let summary = ClusterSummary::from_map(frame.clusters);
        let line = format!(
            "Job {}: {}/{} clusters completed, {} processing, {} pending, {} failed",
            frame.job_id,
            summary.completed,
            summary.total(),
            summary.processing,
            summary.pending,
            summary.failed,
        );

        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Best effort, write errors are ignored.
        let _ = if frame.finished {
            writeln!(out, "\r{line}")
        } else {
            let spinner = SPINNER[(frame.tick % SPINNER.len() as u64) as usize];
            write!(out, "\r{spinner} {line}")
        };
        let _ = out.flush();
        self.line.set(!frame.finished);
    }
}
