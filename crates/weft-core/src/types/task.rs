//! Task lifecycle states and creation properties.

/// The lifecycle state of a task instance.
///
/// Transitions are strictly forward:
/// `Created → Waiting → Ready → Running → Finished`. An instance with no
/// unresolved dependency slots skips `Waiting` and becomes `Ready` at
/// creation. The instance's handle is retired after `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Allocated, slots still being bound.
    Created = 0,
    /// At least one dependency slot unresolved.
    Waiting = 1,
    /// All slots resolved; enqueued in a scheduler object.
    Ready = 2,
    /// Taken by a worker, function executing.
    Running = 3,
    /// Function returned; epilogue complete.
    Finished = 4,
}

impl TaskState {
    /// Packed representation for atomic storage.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode from the packed representation.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TaskState::Created),
            1 => Some(TaskState::Waiting),
            2 => Some(TaskState::Ready),
            3 => Some(TaskState::Running),
            4 => Some(TaskState::Finished),
            _ => None,
        }
    }
}

/// Creation-time properties of a task instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskProps {
    /// The instance opens a finish scope: its completion event is
    /// satisfied only after every transitively created descendant
    /// instance finishes.
    pub finish: bool,
    /// Allocate a completion event satisfied in the worker epilogue with
    /// the task function's returned payload. Implied by `finish`.
    pub output_event: bool,
    /// Scheduling priority cost; lower is better. Only meaningful when
    /// the ready container is priority-ordered.
    pub priority: i64,
    /// Locality hint consulted by locality-aware push and steal policies.
    pub locality: Option<u64>,
}

impl TaskProps {
    /// Properties for a finish-scope instance.
    pub fn finish() -> Self {
        TaskProps {
            finish: true,
            output_event: true,
            ..TaskProps::default()
        }
    }

    /// Properties requesting a completion event.
    pub fn with_output_event() -> Self {
        TaskProps {
            output_event: true,
            ..TaskProps::default()
        }
    }
}
