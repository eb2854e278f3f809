//! Mutable byte strings supporting in-place append and offset writes.

use crate::error::RuntimeError;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Largest gap an offset write may pad with spaces.
pub const MAX_OFFSET_PADDING: usize = 1 << 24;

/// A shared, mutable byte buffer. Cloning shares the buffer; use
/// [`MutableString::deep_copy`] for value semantics.
#[derive(Clone, Default)]
pub struct MutableString(Rc<RefCell<Vec<u8>>>);

impl MutableString {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        MutableString(Rc::new(RefCell::new(bytes)))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn append(&self, s: &str) {
        self.0.borrow_mut().extend_from_slice(s.as_bytes());
    }

    pub fn append_bytes(&self, bytes: &[u8]) {
        self.0.borrow_mut().extend_from_slice(bytes);
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }

    pub fn deep_copy(&self) -> MutableString {
        MutableString::from_bytes(self.bytes())
    }

    pub fn ptr_eq(&self, other: &MutableString) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Byte at `offset`; negative offsets count from the end.
    pub fn byte_at(&self, offset: i64) -> Option<u8> {
        let buf = self.0.borrow();
        resolve_offset(offset, buf.len()).and_then(|i| buf.get(i).copied())
    }

    /// Writes the first byte of `value` at `offset`, padding with spaces past the end.
    pub fn set_byte(&self, offset: i64, value: &str) -> Result<(), RuntimeError> {
        let byte = *value.as_bytes().first().ok_or_else(|| {
            RuntimeError::StringOffset("cannot assign an empty string to a string offset".into())
        })?;
        let mut buf = self.0.borrow_mut();
        let index = if offset < 0 {
            resolve_offset(offset, buf.len()).ok_or_else(|| {
                RuntimeError::StringOffset(format!("illegal string offset {}", offset))
            })?
        } else {
            offset as usize
        };
        if index.saturating_sub(buf.len()) > MAX_OFFSET_PADDING {
            return Err(RuntimeError::StringOffset(format!(
                "string offset {} is too large",
                offset
            )));
        }
        if index >= buf.len() {
            buf.resize(index + 1, b' ');
        }
        buf[index] = byte;
        Ok(())
    }
}

pub(crate) fn resolve_offset(offset: i64, len: usize) -> Option<usize> {
    if offset >= 0 {
        let i = offset as usize;
        (i < len).then_some(i)
    } else {
        let back = offset.unsigned_abs() as usize;
        (back <= len).then(|| len - back)
    }
}

/// Single-byte read of an immutable string.
pub fn string_byte_at(bytes: &[u8], offset: i64) -> Option<u8> {
    resolve_offset(offset, bytes.len()).map(|i| bytes[i])
}

impl From<&str> for MutableString {
    fn from(s: &str) -> Self {
        MutableString::from_bytes(s.as_bytes().to_vec())
    }
}

impl fmt::Debug for MutableString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MutableString({:?})", self.to_string_lossy())
    }
}

impl fmt::Display for MutableString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_byte_pads_with_spaces() {
        let s = MutableString::from("ab");
        s.set_byte(4, "z").unwrap();
        assert_eq!(s.to_string_lossy(), "ab  z");
    }

    #[test]
    fn test_set_byte_rejects_huge_offset() {
        let s = MutableString::from("ab");
        assert!(matches!(s.set_byte(i64::MAX, "z"), Err(RuntimeError::StringOffset(_))));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_negative_offsets() {
        let s = MutableString::from("abc");
        assert_eq!(s.byte_at(-1), Some(b'c'));
        assert_eq!(s.byte_at(-4), None);
        s.set_byte(-3, "X").unwrap();
        assert_eq!(s.to_string_lossy(), "Xbc");
        assert_eq!(string_byte_at(b"abc", 1), Some(b'b'));
        assert_eq!(string_byte_at("é".as_bytes(), 0), Some(0xC3));
    }

    #[test]
    fn test_empty_assignment_is_error() {
        let s = MutableString::from("abc");
        assert!(s.set_byte(0, "").is_err());
    }

    #[test]
    fn test_clone_shares_deep_copy_does_not() {
        let a = MutableString::from("x");
        let b = a.clone();
        let c = a.deep_copy();
        a.append("y");
        assert_eq!(b.to_string_lossy(), "xy");
        assert_eq!(c.to_string_lossy(), "x");
    }
}
