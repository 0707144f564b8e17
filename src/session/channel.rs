use tokio::task::AbortHandle;

use crate::model::{ChannelKind, SaveStatus};

/// The armed debounce timer of a channel. Dropping it aborts the timer task.
#[derive(Debug)]
struct PendingTimer {
    generation: u64,
    handle: AbortHandle,
}

impl Drop for PendingTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Fire {
    /// Issue a write carrying this value.
    Send(String),
    /// A write is already in flight; the latest value goes out when it completes.
    Wait,
    /// Stale timer or nothing left to write.
    Nothing,
}

/// Debounced write pipeline for one field of one chapter.
///
/// `desired` is the latest scheduled value, `sending` the value of the write in
/// flight (at most one), `confirmed` the last value known durable.
#[derive(Debug)]
pub struct SaveChannel {
    kind: ChannelKind,
    desired: String,
    confirmed: String,
    sending: Option<String>,
    timer: Option<PendingTimer>,
    generation: u64,
    flush_when_idle: bool,
    ever_saved: bool,
    status: SaveStatus,
    last_error: Option<String>,
}

impl SaveChannel {
    pub fn new(kind: ChannelKind, confirmed: impl Into<String>) -> Self {
        let confirmed = confirmed.into();
        Self {
            kind,
            desired: confirmed.clone(),
            confirmed,
            sending: None,
            timer: None,
            generation: 0,
            flush_when_idle: false,
            ever_saved: false,
            status: SaveStatus::Idle,
            last_error: None,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn status(&self) -> SaveStatus {
        self.status
    }

    pub fn desired(&self) -> &str {
        &self.desired
    }

    pub fn confirmed(&self) -> &str {
        &self.confirmed
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    pub fn is_sending(&self) -> bool {
        self.sending.is_some()
    }

    pub fn is_quiescent(&self) -> bool {
        self.timer.is_none() && self.sending.is_none()
    }

    pub fn has_unsaved(&self) -> bool {
        self.desired != *self.durable_target()
    }

    // What the backend will hold once the in-flight write (if any) lands.
    fn durable_target(&self) -> &String {
        self.sending.as_ref().unwrap_or(&self.confirmed)
    }

    fn resting_status(&self) -> SaveStatus {
        if self.ever_saved {
            SaveStatus::Saved
        } else {
            SaveStatus::Idle
        }
    }

    /// Records `value` as the latest draft. Returns the generation to arm a
    /// timer with, or `None` when the value already matches what is (or will
    /// be) durable and no write is needed.
    pub fn schedule(&mut self, value: String) -> Option<u64> {
        self.desired = value;
        self.timer = None;
        if !self.has_unsaved() {
            self.flush_when_idle = false;
            if self.sending.is_none() {
                self.status = self.resting_status();
            }
            return None;
        }
        self.generation += 1;
        if self.sending.is_none() {
            self.status = SaveStatus::Unsaved;
        }
        Some(self.generation)
    }

    pub fn arm(&mut self, generation: u64, handle: AbortHandle) {
        if generation != self.generation {
            handle.abort();
            return;
        }
        self.timer = Some(PendingTimer { generation, handle });
    }

    pub fn fire(&mut self, generation: u64) -> Fire {
        match &self.timer {
            Some(timer) if timer.generation == generation => {}
            _ => return Fire::Nothing,
        }
        self.timer = None;
        if self.sending.is_some() {
            self.flush_when_idle = true;
            return Fire::Wait;
        }
        if self.desired == self.confirmed {
            self.status = self.resting_status();
            return Fire::Nothing;
        }
        Fire::Send(self.desired.clone())
    }

    /// The write could not be issued yet (the chapter has no id); send it once
    /// [`SaveChannel::take_flush`] allows.
    pub fn defer(&mut self) {
        self.flush_when_idle = true;
    }

    pub fn take_flush(&mut self) -> Option<String> {
        if !self.flush_when_idle || self.sending.is_some() || self.timer.is_some() {
            return None;
        }
        self.flush_when_idle = false;
        if self.desired == self.confirmed {
            return None;
        }
        Some(self.desired.clone())
    }

    /// Manual "save now": skips the settle window.
    pub fn flush_now(&mut self) -> Option<String> {
        self.timer = None;
        if self.sending.is_some() {
            self.flush_when_idle = self.has_unsaved();
            return None;
        }
        if self.desired == self.confirmed {
            return None;
        }
        Some(self.desired.clone())
    }

    pub fn begin_send(&mut self, value: String) {
        self.sending = Some(value);
        self.flush_when_idle = false;
        self.status = SaveStatus::Saving;
    }

    pub fn complete(&mut self, value: String) {
        self.sending = None;
        self.confirmed = value;
        self.ever_saved = true;
        self.last_error = None;
        if self.desired == self.confirmed {
            self.timer = None;
            self.flush_when_idle = false;
            self.status = SaveStatus::Saved;
        } else {
            self.status = SaveStatus::Unsaved;
        }
    }

    /// No retry: the draft is kept and the next edit or manual save carries it.
    pub fn fail(&mut self, message: String) {
        self.sending = None;
        self.flush_when_idle = false;
        self.last_error = Some(message);
        self.status = SaveStatus::Unsaved;
    }

    /// Drops the armed timer. Returns whether unsaved changes remain.
    pub fn cancel_pending(&mut self) -> bool {
        self.timer = None;
        self.flush_when_idle = false;
        if self.sending.is_none() && self.desired != self.confirmed {
            self.status = SaveStatus::Unsaved;
        }
        self.has_unsaved()
    }

    pub fn discard_unsaved(&mut self) {
        self.cancel_pending();
        self.desired = self.durable_target().clone();
        if self.sending.is_none() {
            self.status = self.resting_status();
        }
    }
}
