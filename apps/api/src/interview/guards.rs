//! At-most-once-concurrently admission for session operations.
//!
//! A call that finds its operation's flag set is a duplicate and is ignored,
//! never queued. Flags are independent so audio replay can overlap with a
//! pending question fetch.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Start,
    SubmitAnswer,
    NextQuestion,
    Feedback,
    PlayAudio,
}

impl Operation {
    fn slot(self) -> usize {
        match self {
            Operation::Start => 0,
            Operation::SubmitAnswer => 1,
            Operation::NextQuestion => 2,
            Operation::Feedback => 3,
            Operation::PlayAudio => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Start => "start",
            Operation::SubmitAnswer => "submit_answer",
            Operation::NextQuestion => "next_question",
            Operation::Feedback => "feedback",
            Operation::PlayAudio => "play_audio",
        }
    }
}

/// One in-flight flag per operation, scoped to a single session.
#[derive(Debug, Default)]
pub struct OperationGuards {
    flags: [AtomicBool; 5],
}

impl OperationGuards {
    pub fn try_acquire(&self, op: Operation) -> Option<InFlight<'_>> {
        let flag = &self.flags[op.slot()];
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight { flag })
    }
}

/// Clears its flag when dropped, whether the operation succeeded or not.
#[derive(Debug)]
pub struct InFlight<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// `start` runs before a session exists, so it is guarded per user.
#[derive(Debug, Default)]
pub struct StartGuards {
    users: Mutex<HashSet<String>>,
}

impl StartGuards {
    pub fn try_acquire(&self, user_id: &str) -> Option<StartPermit<'_>> {
        let mut users = self.users.lock().ok()?;
        users
            .insert(user_id.to_string())
            .then(|| StartPermit {
                guards: self,
                user_id: user_id.to_string(),
            })
    }
}

#[derive(Debug)]
pub struct StartPermit<'a> {
    guards: &'a StartGuards,
    user_id: String,
}

impl Drop for StartPermit<'_> {
    fn drop(&mut self) {
        if let Ok(mut users) = self.guards.users.lock() {
            users.remove(&self.user_id);
        }
    }
}
