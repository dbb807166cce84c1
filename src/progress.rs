use std::io::IsTerminal;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Controls how step output is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Spinners and checkmarks on stderr.
    Normal,
    /// No ANSI, one plain line per event (piped/non-TTY stderr).
    Plain,
}

impl OutputMode {
    pub fn detect() -> Self {
        if std::io::stderr().is_terminal() {
            OutputMode::Normal
        } else {
            OutputMode::Plain
        }
    }
}

/// Numbered steps of a command, each shown with a spinner until it settles.
pub struct StepProgress {
    multi: MultiProgress,
    total_steps: usize,
    current_step: usize,
    mode: OutputMode,
}

/// Handle passed into a step closure.
///
/// `run()` keeps its own clone of the label slot, so closures that never
/// touch the handle still finish cleanly.
pub struct Step {
    done_label: Arc<Mutex<Option<String>>>,
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn spinner_style() -> ProgressStyle {
    style("[{prefix}] {spinner:.cyan} {msg}")
}

fn done_style() -> ProgressStyle {
    style("[{prefix}] \u{2713} {msg:.green}")
}

fn failed_style() -> ProgressStyle {
    style("[{prefix}] \u{2717} {msg:.red}")
}

impl StepProgress {
    pub fn new(total_steps: usize, mode: OutputMode) -> Self {
        let multi = if mode == OutputMode::Plain {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::stderr())
        };
        Self {
            multi,
            total_steps,
            current_step: 0,
            mode,
        }
    }

    fn next_prefix(&mut self) -> String {
        self.current_step += 1;
        format!("{}/{}", self.current_step, self.total_steps)
    }

    /// Run an async step, showing a spinner while it runs and a checkmark
    /// or cross once it settles.
    pub async fn run<F, Fut, T, E>(&mut self, label: &str, f: F) -> Result<T, E>
    where
        F: FnOnce(Step) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let prefix = self.next_prefix();

        if self.mode == OutputMode::Plain {
            eprintln!("[{prefix}] {label}");
        }

        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style());
        bar.set_prefix(prefix.clone());
        bar.set_message(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));

        let done_label = Arc::new(Mutex::new(None));
        let result = f(Step {
            done_label: done_label.clone(),
        })
        .await;

        let finished = done_label
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .unwrap_or_else(|| label.to_string());

        match &result {
            Ok(_) => {
                if self.mode == OutputMode::Plain {
                    eprintln!("[{prefix}] \u{2713} {finished}");
                }
                bar.set_style(done_style());
                bar.finish_with_message(finished);
            }
            Err(_) => {
                if self.mode == OutputMode::Plain {
                    eprintln!("[{prefix}] \u{2717} {label}");
                }
                bar.set_style(failed_style());
                bar.finish_with_message(label.to_string());
            }
        }

        result
    }

    /// Instant completion for a step with nothing to do.
    pub fn skip(&mut self, label: &str) {
        let prefix = self.next_prefix();

        if self.mode == OutputMode::Plain {
            eprintln!("[{prefix}] \u{2713} {label}");
            return;
        }

        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(done_style());
        bar.set_prefix(prefix);
        bar.finish_with_message(label.to_string());
    }
}

impl Step {
    /// Override the label shown next to the checkmark.
    pub fn set_done_label(&self, label: impl Into<String>) {
        if let Ok(mut slot) = self.done_label.lock() {
            *slot = Some(label.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_passes_result_through() {
        let mut progress = StepProgress::new(2, OutputMode::Plain);
        let ok: Result<u32, String> = progress
            .run("first", |step| async move {
                step.set_done_label("first done");
                Ok(7)
            })
            .await;
        assert_eq!(ok, Ok(7));

        let err: Result<u32, String> = progress
            .run("second", |_| async { Err("boom".to_string()) })
            .await;
        assert_eq!(err, Err("boom".to_string()));
        assert_eq!(progress.current_step, 2);
    }

    #[test]
    fn skip_advances_step_counter() {
        let mut progress = StepProgress::new(3, OutputMode::Plain);
        progress.skip("cached");
        progress.skip("cached again");
        assert_eq!(progress.current_step, 2);
    }
}
