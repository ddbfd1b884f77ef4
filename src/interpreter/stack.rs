use super::error::RuntimeError;
use super::response::format_general;

pub const STACK_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StackValue {
    Int(i32),
    Float(f32),
}

impl Default for StackValue {
    fn default() -> Self {
        StackValue::Int(0)
    }
}

impl std::fmt::Display for StackValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StackValue::Int(i) => write!(f, "i{}", i),
            StackValue::Float(v) => write!(f, "f{}", format_general(*v, 9)),
        }
    }
}

/// Bounded LIFO stack with a per-command argument boundary.
///
/// `arg_size` is captured at the start of each command. Implicit arguments
/// are only ever taken from below it, so values a command pushes are never
/// handed back to that same command.
#[derive(Debug, Default)]
pub struct ValueStack {
    slots: Vec<StackValue>,
    arg_size: usize,
}

impl ValueStack {
    pub fn new() -> Self {
        ValueStack { slots: Vec::with_capacity(STACK_CAPACITY), arg_size: 0 }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn arg_size(&self) -> usize {
        self.arg_size
    }

    pub fn begin_command(&mut self) {
        self.arg_size = self.slots.len();
    }

    pub fn push(&mut self, value: StackValue) -> Result<(), RuntimeError> {
        if self.slots.len() >= STACK_CAPACITY {
            return Err(RuntimeError::StackOverflow);
        }
        self.slots.push(value);
        Ok(())
    }

    /// Remove the topmost value below the argument boundary, shifting any
    /// results pushed by the current command down one slot.
    pub fn pop_arg(&mut self) -> Option<StackValue> {
        if self.arg_size == 0 {
            return None;
        }
        self.arg_size -= 1;
        Some(self.slots.remove(self.arg_size))
    }

    /// Values from top to bottom.
    pub fn iter_top_down(&self) -> impl Iterator<Item = &StackValue> {
        self.slots.iter().rev()
    }
}
