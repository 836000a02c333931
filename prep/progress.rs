use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fmt;
use std::io::IsTerminal;

/// Stages reported while a request is assembled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrepStage {
    Discovery,
    Masks,
    Embedding,
}

impl PrepStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Discovery => "split and condition discovery",
            Self::Masks => "cell mask construction",
            Self::Embedding => "condition embedding",
        }
    }
}

impl fmt::Display for PrepStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Receives stage events while a [`crate::DataManager`] request is built.
///
/// Totals are counted in the unit each stage walks over: annotation or
/// covariate rows for discovery and masks, conditions for embedding. A
/// prediction request reports its source-cell masks after embedding, so
/// stages do not always arrive in declaration order. Every method defaults to
/// doing nothing.
pub trait PrepProgressObserver {
    /// `total` rows (discovery, masks) or conditions (embedding) to process.
    fn on_stage_start(&mut self, stage: PrepStage, total: usize) {
        let _ = (stage, total);
    }
    /// Embedding advances once per parallel batch of conditions; discovery
    /// and masks advance once with the full row count.
    fn on_stage_advance(&mut self, stage: PrepStage, processed: usize) {
        let _ = (stage, processed);
    }
    fn on_stage_finish(&mut self, stage: PrepStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopProgress;

impl PrepProgressObserver for NoopProgress {}

/// Terminal progress bars on stderr, hidden when stderr is not a terminal.
#[derive(Default)]
pub struct ConsoleProgress {
    bar: Option<ProgressBar>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    let style = ProgressStyle::with_template(
        "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ");
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

impl PrepProgressObserver for ConsoleProgress {
    fn on_stage_start(&mut self, stage: PrepStage, total: usize) {
        if let Some(previous) = self.bar.take() {
            previous.finish_and_clear();
        }
        self.bar = Some(create_progress_bar(total as u64, stage.describe()));
    }

    fn on_stage_advance(&mut self, stage: PrepStage, processed: usize) {
        if let Some(bar) = &self.bar {
            bar.set_message(stage.describe());
            bar.inc(processed as u64);
        }
    }

    fn on_stage_finish(&mut self, stage: PrepStage) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message(format!("{stage} done"));
        }
    }
}
