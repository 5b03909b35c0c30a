/// User-facing, one-shot notices raised by a streaming session.
#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    FirstDetection,
    Completed { total_detections: u64 },
    Failed { message: String },
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::FirstDetection => write!(f, "First detection found!"),
            Notice::Completed { total_detections } => write!(
                f,
                "All real-time image analysis completed. Total detections: {}",
                total_detections
            ),
            Notice::Failed { message } => write!(f, "{}", message),
        }
    }
}

/// Receives session notices. Each notice is delivered at most once per session.
pub trait Notifier {
    fn notify(&mut self, notice: &Notice);
}

/// Notifier that writes notices to the log.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&mut self, notice: &Notice) {
        match notice {
            Notice::Failed { .. } => log::error!("{}", notice),
            _ => log::info!("{}", notice),
        }
    }
}

/// Notifier that keeps every notice, for inspection.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    pub notices: Vec<Notice>,
}

impl Notifier for RecordingNotifier {
    fn notify(&mut self, notice: &Notice) {
        self.notices.push(notice.clone());
    }
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn notify(&mut self, notice: &Notice) {
        (**self).notify(notice)
    }
}
