use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

/// Stage reporting for the command-line tools: a spinner on a terminal,
/// plain `==>` lines otherwise.
#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    /// `--ui auto|plain|pretty`; `NO_COLOR` downgrades auto to plain.
    pub fn from_args(ui_flag: Option<&str>) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ if std::env::var_os("NO_COLOR").is_some() => UiMode::Plain,
            _ => UiMode::Auto,
        };
        Self {
            mode,
            is_tty: std::io::stderr().is_terminal(),
        }
    }

    fn pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if !self.pretty() {
            eprintln!("==> {}", name);
            return StageGuard::new(name.to_string(), None);
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(120));
        let style = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(format!("{name}…"));
        StageGuard::new(name.to_string(), Some(spinner))
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failed: Option<String>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            failed: None,
        }
    }

    /// Progress detail shown next to the stage name.
    pub fn set_message(&self, detail: &str) {
        match &self.spinner {
            Some(spinner) => spinner.set_message(format!("{}… {}", self.name, detail)),
            None => log::debug!("{}: {}", self.name, detail),
        }
    }

    /// Finish the stage as failed instead of done.
    pub fn fail(&mut self, reason: &str) {
        self.failed = Some(reason.to_string());
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = format_duration(self.start.elapsed());
        let message = match &self.failed {
            Some(reason) => format!("✘ {} ({}): {}", self.name, elapsed, reason),
            None => format!("✔ {} ({})", self.name, elapsed),
        };
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
