//! The host↔guest value ABI
//!
//! [`FlowValue`] is the fixed-layout record generated code and host
//! plugins exchange through `dispatch`: a kind tag, a number slot, and a
//! buffer-pointer slot. The number slot doubles as the boolean (0/1) and
//! as the byte length when the kind is [`ValueKind::Buffer`]. The layout
//! is a compatibility boundary (kind at offset 0, number at offset 8,
//! buffer pointer at offset 16, 24 bytes total) and is asserted at
//! compile time below.

use std::ffi::{c_char, CStr};

/// Value kinds of the Flow type system (closed set, stable u32 tags)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Absence of a value; also the array terminator
    Void = 0,
    /// Boolean, carried in the number slot as 0/1
    Boolean = 1,
    /// Signed 64-bit integer
    Number = 2,
    /// Immutable NUL-terminated byte sequence
    String = 3,
    /// Length-prefixed byte sequence, not NUL-terminated
    Buffer = 4,
    /// Contiguous `FlowValue` sequence terminated by a Void record
    Array = 5,
    /// Opaque compiled regex owned by the compiled unit
    RegExp = 6,
    /// Opaque IP address (v4 or v6) supporting equality
    Ip = 7,
    /// Opaque pointer to a Flow-compiled function
    Function = 8,
    /// Opaque pointer to a Flow-compiled handler
    Handler = 9,
}

impl ValueKind {
    /// Decode a raw tag; unknown tags yield `None`
    #[must_use]
    pub const fn from_u32(tag: u32) -> Option<Self> {
        Some(match tag {
            0 => ValueKind::Void,
            1 => ValueKind::Boolean,
            2 => ValueKind::Number,
            3 => ValueKind::String,
            4 => ValueKind::Buffer,
            5 => ValueKind::Array,
            6 => ValueKind::RegExp,
            7 => ValueKind::Ip,
            8 => ValueKind::Function,
            9 => ValueKind::Handler,
            _ => return None,
        })
    }

    /// Returns true for the kinds whose payload lives in the buffer slot
    #[must_use]
    pub const fn is_pointer(self) -> bool {
        matches!(
            self,
            ValueKind::String
                | ValueKind::Buffer
                | ValueKind::Array
                | ValueKind::RegExp
                | ValueKind::Ip
                | ValueKind::Function
                | ValueKind::Handler
        )
    }

    /// Returns true for string-like kinds (C string or buffer)
    #[must_use]
    pub const fn is_string(self) -> bool {
        matches!(self, ValueKind::String | ValueKind::Buffer)
    }

    /// Human-readable kind name, used in diagnostics
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ValueKind::Void => "void",
            ValueKind::Boolean => "bool",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Buffer => "buffer",
            ValueKind::Array => "array",
            ValueKind::RegExp => "regexp",
            ValueKind::Ip => "ip",
            ValueKind::Function => "function",
            ValueKind::Handler => "handler",
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The ABI value record exchanged across the host↔guest boundary
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FlowValue {
    /// [`ValueKind`] tag
    pub kind: u32,
    /// Number, boolean (0/1), or buffer length
    pub number: u64,
    /// Data pointer for string/buffer/array/regexp/ip/function kinds
    pub buffer: *const u8,
}

// Layout is a wire contract with host plugins; see the module docs.
const _: () = {
    assert!(std::mem::size_of::<FlowValue>() == 24);
    assert!(std::mem::align_of::<FlowValue>() == 8);
    assert!(std::mem::offset_of!(FlowValue, kind) == 0);
    assert!(std::mem::offset_of!(FlowValue, number) == 8);
    assert!(std::mem::offset_of!(FlowValue, buffer) == 16);
};

impl FlowValue {
    /// The Void record, also used as the array sentinel
    pub const VOID: FlowValue = FlowValue {
        kind: ValueKind::Void as u32,
        number: 0,
        buffer: std::ptr::null(),
    };

    /// Create a boolean record
    #[must_use]
    pub const fn boolean(value: bool) -> Self {
        Self {
            kind: ValueKind::Boolean as u32,
            number: value as u64,
            buffer: std::ptr::null(),
        }
    }

    /// Create a number record
    #[must_use]
    pub const fn number(value: i64) -> Self {
        Self {
            kind: ValueKind::Number as u32,
            number: value as u64,
            buffer: std::ptr::null(),
        }
    }

    /// Create a string record from a NUL-terminated pointer
    #[must_use]
    pub const fn string(data: *const c_char) -> Self {
        Self {
            kind: ValueKind::String as u32,
            number: 0,
            buffer: data.cast(),
        }
    }

    /// Create a buffer record; `len` rides in the number slot
    #[must_use]
    pub const fn buffer(len: u64, data: *const u8) -> Self {
        Self {
            kind: ValueKind::Buffer as u32,
            number: len,
            buffer: data,
        }
    }

    /// The decoded kind tag, if valid
    #[must_use]
    pub const fn value_kind(&self) -> Option<ValueKind> {
        ValueKind::from_u32(self.kind)
    }

    /// Returns true if this is the Void record / array sentinel
    #[must_use]
    pub const fn is_void(&self) -> bool {
        self.kind == ValueKind::Void as u32
    }

    /// Read the number slot as a signed integer
    #[must_use]
    pub fn as_number(&self) -> i64 {
        debug_assert!(matches!(
            self.value_kind(),
            Some(ValueKind::Number | ValueKind::Boolean)
        ));
        self.number as i64
    }

    /// Read the number slot as a boolean
    #[must_use]
    pub fn as_bool(&self) -> bool {
        self.number != 0
    }

    /// Read a string-kind record as `&str`.
    ///
    /// # Safety
    /// The buffer slot must point at a valid NUL-terminated string that
    /// outlives the returned reference.
    #[must_use]
    pub unsafe fn as_str(&self) -> &str {
        debug_assert_eq!(self.kind, ValueKind::String as u32);
        CStr::from_ptr(self.buffer.cast::<c_char>())
            .to_str()
            .unwrap_or("")
    }

    /// Read a buffer-kind record as a byte slice.
    ///
    /// # Safety
    /// The buffer slot must point at `number` valid bytes outliving the
    /// returned reference.
    #[must_use]
    pub unsafe fn as_bytes(&self) -> &[u8] {
        debug_assert_eq!(self.kind, ValueKind::Buffer as u32);
        std::slice::from_raw_parts(self.buffer, self.number as usize)
    }

    // ===== Return-slot setters (used by native callbacks) =====

    /// Clear to Void
    pub fn set_void(&mut self) {
        *self = FlowValue::VOID;
    }

    /// Store a boolean result
    pub fn set_boolean(&mut self, value: bool) {
        *self = FlowValue::boolean(value);
    }

    /// Store a number result
    pub fn set_number(&mut self, value: i64) {
        *self = FlowValue::number(value);
    }

    /// Store a string result; the pointee must stay valid until the
    /// generated code finishes reading it
    pub fn set_string(&mut self, data: *const c_char) {
        *self = FlowValue::string(data);
    }

    /// Store a buffer result; the pointee must stay valid until the
    /// generated code finishes reading it
    pub fn set_buffer(&mut self, len: u64, data: *const u8) {
        *self = FlowValue::buffer(len, data);
    }
}

/// The length-prefixed buffer record generated code allocates on its
/// stack for buffer values
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FlowBuffer {
    /// Byte length
    pub len: u64,
    /// Data pointer; not NUL-terminated
    pub data: *const u8,
}

const _: () = {
    assert!(std::mem::size_of::<FlowBuffer>() == 16);
    assert!(std::mem::offset_of!(FlowBuffer, len) == 0);
    assert!(std::mem::offset_of!(FlowBuffer, data) == 8);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_round_trip() {
        for tag in 0..10 {
            let kind = ValueKind::from_u32(tag).unwrap();
            assert_eq!(kind as u32, tag);
        }
        assert_eq!(ValueKind::from_u32(10), None);
    }

    #[test]
    fn boolean_rides_the_number_slot() {
        let v = FlowValue::boolean(true);
        assert_eq!(v.kind, ValueKind::Boolean as u32);
        assert_eq!(v.number, 1);
        assert!(v.as_bool());
        assert!(!FlowValue::boolean(false).as_bool());
    }

    #[test]
    fn buffer_length_rides_the_number_slot() {
        let bytes = b"hello world";
        let v = FlowValue::buffer(bytes.len() as u64, bytes.as_ptr());
        assert_eq!(v.number, 11);
        assert_eq!(unsafe { v.as_bytes() }, bytes);
    }

    #[test]
    fn void_is_the_sentinel() {
        assert!(FlowValue::VOID.is_void());
        assert!(!FlowValue::number(0).is_void());
    }

    #[test]
    fn negative_numbers_round_trip() {
        let v = FlowValue::number(-42);
        assert_eq!(v.as_number(), -42);
    }

    #[test]
    fn setters_replace_the_record() {
        let mut v = FlowValue::VOID;
        v.set_number(7);
        assert_eq!(v.value_kind(), Some(ValueKind::Number));
        v.set_boolean(true);
        assert!(v.as_bool());
        v.set_void();
        assert!(v.is_void());
    }
}
