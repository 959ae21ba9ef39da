//! Typed reads of kernel object members
//!
//! Thin layer over [`TargetMemory::evaluate`] that knows the struct type
//! names and member paths of the selected kernel generation.

use gkos_scope_common::{IndexedPath, KernelLayout, MAX_NAME_LEN};

use crate::domain::{ProcessAddr, ReadError, ReadResult, ThreadAddr};
use crate::target::{Expr, TargetMemory};

/// Render `array[index].member` for an indexed path template
#[must_use]
pub fn indexed(path: &IndexedPath, index: u32) -> String {
    if path.member.is_empty() {
        format!("{}[{index}]", path.array)
    } else {
        format!("{}[{index}].{}", path.array, path.member)
    }
}

/// Member reader for thread, process and scheduler objects
#[derive(Clone, Copy)]
pub struct FieldReader<'a> {
    memory: &'a dyn TargetMemory,
    layout: &'static KernelLayout,
}

impl<'a> FieldReader<'a> {
    #[must_use]
    pub fn new(memory: &'a dyn TargetMemory, layout: &'static KernelLayout) -> Self {
        Self { memory, layout }
    }

    #[must_use]
    pub fn memory(&self) -> &'a dyn TargetMemory {
        self.memory
    }

    #[must_use]
    pub fn layout(&self) -> &'static KernelLayout {
        self.layout
    }

    /// Scalar value of a thread member
    ///
    /// # Errors
    /// Returns the facade's error if the member cannot be evaluated
    pub fn thread_value(&self, thread: ThreadAddr, path: &str) -> ReadResult<u64> {
        self.memory.evaluate(&Expr::field(self.layout.thread.type_name, thread.0, path))
    }

    /// Address of a thread member
    ///
    /// # Errors
    /// Returns the facade's error if the member cannot be located
    pub fn thread_address(&self, thread: ThreadAddr, path: &str) -> ReadResult<u64> {
        self.memory.evaluate(&Expr::field_address(self.layout.thread.type_name, thread.0, path))
    }

    /// Boolean thread member (any non-zero value is true)
    ///
    /// # Errors
    /// Returns the facade's error if the member cannot be evaluated
    pub fn thread_flag(&self, thread: ThreadAddr, path: &str) -> ReadResult<bool> {
        self.thread_value(thread, path).map(|v| v != 0)
    }

    /// Pointer stored in the first word of a member
    ///
    /// Used for smart-pointer members where the raw pointer is not a named
    /// field of its own.
    ///
    /// # Errors
    /// Returns an error if the member or the word cannot be read
    pub fn leading_pointer(&self, ty: &'static str, base: u64, path: &str) -> ReadResult<u64> {
        let addr = self.memory.evaluate(&Expr::field_address(ty, base, path))?;
        self.memory.read_word(addr, self.layout.pointer_size())
    }

    pub fn thread_name(&self, thread: ThreadAddr) -> ReadResult<String> {
        self.string(self.layout.thread.type_name, thread.0, self.layout.thread.name)
    }

    /// Owning process of a thread
    ///
    /// # Errors
    /// Returns [`ReadError::Unresolved`] when the thread has no process
    pub fn thread_process(&self, thread: ThreadAddr) -> ReadResult<ProcessAddr> {
        let (ty, member) = (self.layout.thread.type_name, self.layout.thread.process);
        let ptr = self.leading_pointer(ty, thread.0, member)?;
        if ptr == 0 {
            return Err(ReadError::Unresolved(Expr::field(ty, thread.0, member).to_string()));
        }
        Ok(ProcessAddr(ptr))
    }

    pub fn process_name(&self, process: ProcessAddr) -> ReadResult<String> {
        self.string(self.layout.process.type_name, process.0, self.layout.process.name)
    }

    /// Decode a libstdc++ string member
    ///
    /// # Errors
    /// Returns [`ReadError::ImplausibleLength`] for lengths above
    /// [`MAX_NAME_LEN`], or the facade's error for unreadable parts
    pub fn string(&self, ty: &'static str, base: u64, path: &str) -> ReadResult<String> {
        let string = &self.layout.string;
        let len =
            self.memory.evaluate(&Expr::field(ty, base, format!("{path}.{}", string.length)))?;
        if len == 0 {
            return Ok(String::new());
        }
        let data = self.memory.evaluate(&Expr::field(ty, base, format!("{path}.{}", string.data)))?;
        if len > MAX_NAME_LEN {
            return Err(ReadError::ImplausibleLength { addr: data, len });
        }
        let bytes = self.memory.read_bytes(data, len)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
