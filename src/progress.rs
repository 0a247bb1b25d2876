//! Progress reporting using indicatif.
//!
//! A scan has two phases: `walking` (a spinner, the file count is not
//! known up front) and `checking` (a bar over the walked files, advanced
//! once per file whether or not it had to be hashed).

use std::sync::Mutex;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Phase name for directory traversal.
pub const PHASE_WALKING: &str = "walking";
/// Phase name for classify/hash/confirm over walked files.
pub const PHASE_CHECKING: &str = "checking";

/// Receives progress updates from the change detector.
pub trait ProgressCallback: Send + Sync {
    /// A phase starts. `total` is 0 when unknown.
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Item `current` (1-based) of the active phase, with its key.
    fn on_progress(&self, current: usize, path: &str);

    /// A file was hashed; `bytes` is its size.
    fn on_item_completed(&self, _bytes: u64) {}

    /// A phase completes.
    fn on_phase_end(&self, phase: &str);

    /// Free-form status line.
    fn on_message(&self, _message: &str) {}
}

/// Terminal progress bars.
pub struct Progress {
    multi: MultiProgress,
    walking: Mutex<Option<ProgressBar>>,
    checking: Mutex<Option<ProgressBar>>,
    hashed_bytes: Mutex<u64>,
    quiet: bool,
}

impl Progress {
    /// Create a new progress reporter. `quiet` hides all bars.
    ///
    /// ```
    /// use filestamp::progress::Progress;
    ///
    /// let progress = Progress::new(true);
    /// ```
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        let multi = if quiet {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        Self {
            multi,
            walking: Mutex::new(None),
            checking: Mutex::new(None),
            hashed_bytes: Mutex::new(0),
            quiet,
        }
    }

    /// Total bytes hashed so far.
    #[must_use]
    pub fn hashed_bytes(&self) -> u64 {
        self.hashed_bytes.lock().map_or(0, |b| *b)
    }

    fn walking_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}] {pos} files")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
    }

    fn checking_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.green/blue}] {pos}/{len} ({percent}%) {msg} (ETA: {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }

    fn active_bar(&self) -> Option<ProgressBar> {
        for slot in [&self.checking, &self.walking] {
            if let Some(pb) = slot.lock().ok().and_then(|g| g.clone()) {
                return Some(pb);
            }
        }
        None
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        if self.quiet {
            return;
        }

        match phase {
            PHASE_WALKING => {
                let pb = self.multi.add(ProgressBar::new_spinner());
                pb.set_style(Self::walking_style());
                pb.set_message("Walking directory");
                pb.enable_steady_tick(Duration::from_millis(100));
                if let Ok(mut slot) = self.walking.lock() {
                    *slot = Some(pb);
                }
            }
            _ => {
                let pb = self.multi.add(ProgressBar::new(total as u64));
                pb.set_style(Self::checking_style());
                pb.set_message("Checking");
                if let Ok(mut slot) = self.checking.lock() {
                    *slot = Some(pb);
                }
            }
        }
    }

    fn on_progress(&self, current: usize, path: &str) {
        if self.quiet {
            return;
        }
        if let Some(pb) = self.active_bar() {
            pb.set_position(current as u64);
            pb.set_message(truncate_path(path, 30));
        }
    }

    fn on_item_completed(&self, bytes: u64) {
        if let Ok(mut total) = self.hashed_bytes.lock() {
            *total = total.saturating_add(bytes);
        }
    }

    fn on_phase_end(&self, phase: &str) {
        if self.quiet {
            return;
        }

        let (slot, done) = if phase == PHASE_WALKING {
            (&self.walking, "Walking complete")
        } else {
            (&self.checking, "Checking complete")
        };
        if let Some(pb) = slot.lock().ok().and_then(|mut g| g.take()) {
            pb.finish_with_message(done);
        }
    }

    fn on_message(&self, message: &str) {
        if self.quiet {
            return;
        }
        match self.active_bar() {
            Some(pb) => pb.set_message(message.to_string()),
            None => {
                let _ = self.multi.println(message);
            }
        }
    }
}

/// Shorten a path to its file name when it does not fit in `max_len` chars.
fn truncate_path(path: &str, max_len: usize) -> String {
    if path.chars().count() <= max_len {
        return path.to_string();
    }

    let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let name_len = file_name.chars().count();
    if name_len + 4 > max_len {
        let tail: String = file_name
            .chars()
            .skip(name_len.saturating_sub(max_len.saturating_sub(3)))
            .collect();
        return format!("...{}", tail);
    }

    format!(".../{}", file_name)
}
