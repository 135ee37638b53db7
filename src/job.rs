//! Job objects
//!
//! A job is created `held` while the front-end streams the document,
//! becomes `pending` once spooled, `processing` when a worker picks it
//! up, and finishes in one of the terminal states.  Terminal jobs stay
//! around for a grace window so clients can query their final state,
//! then the job and its spool file are garbage collected.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::SystemTime;

use strum::Display;

use crate::options::AttrTable;

/// job-state values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JobState {
    /// Waiting for the document to finish spooling
    Held,
    /// Spooled, waiting for the printer
    Pending,
    /// Being printed
    Processing,
    /// Stopped mid-print
    Stopped,
    /// Canceled by the user
    Canceled,
    /// Aborted by the system
    Aborted,
    /// Printed successfully
    Completed,
}

impl JobState {
    /// Whether this is a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Canceled | JobState::Aborted | JobState::Completed
        )
    }
}

#[derive(Debug)]
pub(crate) struct JobData {
    pub name: String,
    pub username: String,
    pub format: String,
    pub state: JobState,
    pub impressions: u32,
    pub impressions_completed: u32,
    pub filename: Option<PathBuf>,
    pub created: SystemTime,
    pub processing: Option<SystemTime>,
    pub completed: Option<SystemTime>,
}

/// A print job
///
/// Shared between the printer queue and the worker processing it; the
/// mutable state sits behind its own reader-writer lock, and the cancel
/// flag is a lock-free atomic so the front-end can always set it.
pub struct Job {
    /// Monotonically increasing job id
    pub id: u32,
    /// Owning printer id
    pub printer_id: u32,
    cancel: AtomicBool,
    attrs: RwLock<AttrTable>,
    data: RwLock<JobData>,
}

impl Job {
    pub(crate) fn new(
        id: u32,
        printer_id: u32,
        name: &str,
        username: &str,
        format: &str,
        attrs: AttrTable,
    ) -> Job {
        Job {
            id,
            printer_id,
            cancel: AtomicBool::new(false),
            attrs: RwLock::new(attrs),
            data: RwLock::new(JobData {
                name: name.to_string(),
                username: if username.is_empty() {
                    "anonymous".to_string()
                } else {
                    username.to_string()
                },
                format: format.to_string(),
                state: JobState::Held,
                impressions: 0,
                impressions_completed: 0,
                filename: None,
                created: SystemTime::now(),
                processing: None,
                completed: None,
            }),
        }
    }

    /// job-name
    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    /// job-originating-user-name
    pub fn username(&self) -> String {
        self.read().username.clone()
    }

    /// document-format
    pub fn format(&self) -> String {
        self.read().format.clone()
    }

    /// Current job-state
    pub fn state(&self) -> JobState {
        self.read().state
    }

    /// job-impressions
    pub fn impressions(&self) -> u32 {
        self.read().impressions
    }

    /// job-impressions-completed
    pub fn impressions_completed(&self) -> u32 {
        self.read().impressions_completed
    }

    /// The spool file, once the document has been received
    pub fn filename(&self) -> Option<PathBuf> {
        self.read().filename.clone()
    }

    /// Snapshot of the attributes submitted with the job
    pub fn attributes(&self) -> AttrTable {
        self.attrs
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Request cooperative cancellation
    ///
    /// The pipeline observes the flag at scanline granularity; a job
    /// that has not started yet is simply dequeued.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested
    pub fn is_canceled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// time-at-creation
    pub fn created_at(&self) -> SystemTime {
        self.read().created
    }

    /// time-at-processing, once printing has started
    pub fn processing_at(&self) -> Option<SystemTime> {
        self.read().processing
    }

    /// time-at-completed; also drives garbage collection
    pub fn completed_at(&self) -> Option<SystemTime> {
        self.read().completed
    }

    pub(crate) fn set_state(&self, state: JobState) {
        let mut data = self.write();
        data.state = state;
        match state {
            JobState::Processing => data.processing = Some(SystemTime::now()),
            s if s.is_terminal() => data.completed = Some(SystemTime::now()),
            _ => {}
        }
    }

    pub(crate) fn set_spooled(&self, filename: PathBuf) {
        let mut data = self.write();
        data.filename = Some(filename);
        data.state = JobState::Pending;
    }

    pub(crate) fn set_impressions(&self, impressions: u32) {
        self.write().impressions = impressions;
    }

    pub(crate) fn add_impression(&self) {
        self.write().impressions_completed += 1;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, JobData> {
        self.data.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, JobData> {
        self.data.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("printer_id", &self.printer_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Build the spool filename for a job
///
/// `<job-id>-<sanitized-name>.<ext>` inside the spool directory, where
/// the extension is derived from the document format.  Runs of
/// non-alphanumeric characters in the name collapse to one underscore.
pub(crate) fn spool_filename(directory: &Path, id: u32, job_name: &str, format: &str) -> PathBuf {
    let mut name = String::with_capacity(job_name.len());
    let mut last_was_sub = false;
    for ch in job_name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' {
            name.push(ch.to_ascii_lowercase());
            last_was_sub = false;
        } else if !last_was_sub {
            name.push('_');
            last_was_sub = true;
        }
    }
    if name.is_empty() {
        name.push_str("untitled");
    }

    let ext = match format {
        "application/pdf" => "pdf",
        "application/postscript" => "ps",
        "application/vnd.hp-pcl" => "pcl",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/pwg-raster" => "pwg",
        "image/urf" => "urf",
        _ => "dat",
    };

    directory.join(format!("{id}-{name}.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_states() {
        let job = Job::new(1, 1, "test", "operator", "image/pwg-raster", AttrTable::new());
        assert_eq!(job.state(), JobState::Held);
        assert!(!JobState::Held.is_terminal());

        job.set_spooled(PathBuf::from("/tmp/1-test.pwg"));
        assert_eq!(job.state(), JobState::Pending);

        job.set_state(JobState::Processing);
        assert!(job.read().processing.is_some());
        assert!(job.completed_at().is_none());

        job.set_state(JobState::Completed);
        assert!(job.completed_at().is_some());
        assert!(JobState::Completed.is_terminal());
    }

    #[test]
    fn anonymous_user_default() {
        let job = Job::new(1, 1, "test", "", "image/png", AttrTable::new());
        assert_eq!(job.username(), "anonymous");
    }

    #[test]
    fn cancel_flag() {
        let job = Job::new(1, 1, "test", "op", "image/png", AttrTable::new());
        assert!(!job.is_canceled());
        job.cancel();
        assert!(job.is_canceled());
    }

    #[test]
    fn spool_names_are_sanitized() {
        let dir = Path::new("/var/spool/labels");
        assert_eq!(
            spool_filename(dir, 42, "Shipping Label #7", "image/pwg-raster"),
            dir.join("42-shipping_label_7.pwg")
        );
        assert_eq!(
            spool_filename(dir, 1, "", "image/png"),
            dir.join("1-untitled.png")
        );
        assert_eq!(
            spool_filename(dir, 7, "raw!!", "application/vnd.zebra-zpl"),
            dir.join("7-raw_.dat")
        );
    }

    #[test]
    fn state_keywords() {
        assert_eq!(JobState::Pending.to_string(), "pending");
        assert_eq!(JobState::Canceled.to_string(), "canceled");
    }
}
