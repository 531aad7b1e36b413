//! Append-only activity log.
//!
//! Records timestamped events to a durable file sink. The log is write-once,
//! append-only, and never read back by the server. Appends are
//! fire-and-forget: failures go to the diagnostic log only and are never
//! propagated to a session.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use tracing::warn;

use crate::Result;

/// Handle to the append-only activity file.
pub struct ActivityLog {
    file: Mutex<File>,
}

impl ActivityLog {
    /// Open (or create) the activity file in append mode.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Append a structured record: who did what to which subject, with what
    /// outcome.
    pub fn record(&self, actor: &str, subject: &str, detail: &str, outcome: &str) {
        self.append(&format!(
            "user={actor} | subject={subject} | detail={detail} | outcome={outcome}"
        ));
    }

    /// Append a free-form lifecycle note (startup, shutdown, connects).
    pub fn note(&self, message: &str) {
        self.append(message);
    }

    fn append(&self, line: &str) {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let Ok(mut file) = self.file.lock() else {
            warn!("activity log lock poisoned, dropping entry");
            return;
        };
        if let Err(e) = writeln!(file, "[{stamp}] {line}") {
            warn!(error = %e, "failed to append activity record");
        }
    }
}
