use std::time::Duration;

use crate::util::timing::format_elapsed;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationState {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

/// Progress of the active run as shown to the user.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressNotification {
    pub total_frames: u32,
    pub completed_frames: u32,
    pub elapsed: Duration,
    pub state: NotificationState,
    pub stalled: bool,
    pub message: String,
}

impl ProgressNotification {
    pub fn new(total_frames: u32) -> Self {
        Self {
            total_frames,
            completed_frames: 0,
            elapsed: Duration::ZERO,
            state: NotificationState::Pending,
            stalled: false,
            message: "Generating simulation cache".to_string(),
        }
    }

    pub fn percentage(&self) -> f32 {
        if self.total_frames == 0 {
            return 100.0;
        }
        self.completed_frames as f32 * 100.0 / self.total_frames as f32
    }

    /// Never moves backwards or past the total. Returns true if the frame
    /// count changed.
    pub fn update(&mut self, frames: u32, elapsed: Duration) -> bool {
        self.elapsed = elapsed;
        let ceiling = self.total_frames.max(self.completed_frames);
        let frames = frames.clamp(self.completed_frames, ceiling);
        let changed = frames != self.completed_frames;
        self.completed_frames = frames;
        if changed {
            self.stalled = false;
        }
        changed
    }

    pub fn finish(&mut self, state: NotificationState, message: impl Into<String>) {
        self.state = state;
        self.message = message.into();
    }
}

/// Final report of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub state: NotificationState,
    pub frames_simulated: u32,
    pub total_frames: u32,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}: {}/{} frames in {}",
            self.state,
            self.frames_simulated,
            self.total_frames,
            format_elapsed(self.elapsed)
        )?;
        if let Some(error) = &self.error {
            write!(f, " ({})", error)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum GeneratorEvent {
    Started { total_frames: u32 },
    Progress(ProgressNotification),
    Stalled { since_last_frame: Duration },
    Finished(RunSummary),
}
