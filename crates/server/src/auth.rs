#![forbid(unsafe_code)]

// Per-connection identity. Commands consult the gate functions below instead
// of inspecting the caller directly, so every authorization rule (and the one
// deliberately missing rule) lives in this file.

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Caller {
    Anonymous,
    User { id: String, username: String },
}

impl Caller {
    pub(crate) fn user_id(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::User { id, .. } => Some(id),
        }
    }
}

// Adding a task requires a signed-in caller; the new task is stamped with that
// caller's id and username.
pub(crate) fn require_add(caller: &Caller) -> Option<(String, String)> {
    match caller {
        Caller::Anonymous => None,
        Caller::User { id, username } => Some((id.clone(), username.clone())),
    }
}

// Remove and set-checked accept any caller, signed in or not, against any
// task id. The service this replaces shipped without an ownership check on
// these two paths; the behavior is kept as-is and DESIGN.md records the gap.
pub(crate) fn allow_remove(_caller: &Caller) -> bool {
    true
}

pub(crate) fn allow_set_checked(_caller: &Caller) -> bool {
    true
}

// Snapshots and pushed deltas are visible to the task owner alone.
pub(crate) fn can_read(caller: &Caller, owner: &str) -> bool {
    caller.user_id() == Some(owner)
}
