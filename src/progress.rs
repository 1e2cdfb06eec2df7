use std::io::IsTerminal;

use indicatif::{ProgressBar, ProgressStyle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A new phase begins with `total` items to process.
    Phase { message: String, total: u64 },
    /// One item reached its outcome.
    Completed {
        line: String,
        completed: u64,
        total: u64,
    },
    Finished,
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn event(&self, _event: ProgressEvent) {}
}

/// Reports progress through `tracing` for non-interactive runs.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Phase { message, total } => tracing::info!("{message} ({total} items)"),
            ProgressEvent::Completed {
                line,
                completed,
                total,
            } => tracing::info!("{completed}/{total} {line}"),
            ProgressEvent::Finished => {}
        }
    }
}

/// Terminal progress bar. Hidden when disabled or stderr is not a terminal.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(no_progress: bool) -> Self {
        let bar = if no_progress || !std::io::stderr().is_terminal() {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::with_template(
                "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            ) {
                bar.set_style(style.progress_chars("=> "));
            }
            bar
        };
        Self { bar }
    }

    pub fn is_hidden(&self) -> bool {
        self.bar.is_hidden()
    }
}

impl ProgressSink for BarProgress {
    fn event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Phase { message, total } => {
                self.bar.reset();
                self.bar.set_length(total);
                self.bar.set_message(message);
            }
            ProgressEvent::Completed {
                line, completed, ..
            } => {
                self.bar.set_position(completed);
                if line.starts_with("[FAIL]") {
                    self.bar.suspend(|| tracing::warn!("{line}"));
                }
            }
            ProgressEvent::Finished => self.bar.finish_and_clear(),
        }
    }
}
