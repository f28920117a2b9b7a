//! Runtime support functions for JIT-compiled code
//!
//! Generated code calls into these helpers for operations that are too
//! complex to inline: array walks, regex and IP matching, substring
//! search, and string concatenation. They use the C calling convention
//! and are published to the JIT through [`symbols`]; the host process
//! keeps them resolvable for a compiled unit's whole lifetime.
//!
//! Compare-family helpers (`strcasecmp`, `arraycmp`, `ipcmp`, `ipstrcmp`,
//! `endswith`) return zero on equality; match-family helpers
//! (`strcasestr`, `regexmatch*`, `*_in_array`) return 1 on success.

use std::cell::RefCell;
use std::ffi::{c_char, CStr};
use std::net::IpAddr;
use std::str::FromStr;

use regex::{Regex, RegexBuilder};

use crate::value::{FlowValue, ValueKind};

/// Append-only string storage for concatenation results.
///
/// Cranelift cannot stack-allocate runtime-sized buffers, so `+` on
/// strings allocates here instead; everything lives until the compiled
/// unit closes.
#[derive(Default)]
pub struct ScratchArena {
    strings: RefCell<Vec<Box<[u8]>>>,
}

impl ScratchArena {
    /// Create an empty arena
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored allocations
    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.borrow().len()
    }

    /// Returns true if nothing has been allocated
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.borrow().is_empty()
    }

    /// Store `left ++ right` as a NUL-terminated string and return a
    /// pointer that stays valid for the arena's lifetime
    fn push_concat(&self, left: &[u8], right: &[u8]) -> *const c_char {
        let mut bytes = Vec::with_capacity(left.len() + right.len() + 1);
        bytes.extend_from_slice(left);
        bytes.extend_from_slice(right);
        bytes.push(0);
        let boxed = bytes.into_boxed_slice();
        let ptr = boxed.as_ptr().cast::<c_char>();
        self.strings.borrow_mut().push(boxed);
        ptr
    }
}

#[inline]
fn lower(b: u8) -> u8 {
    b.to_ascii_lowercase()
}

unsafe fn cstr_bytes<'a>(s: *const c_char) -> &'a [u8] {
    CStr::from_ptr(s).to_bytes()
}

/// Length of a NUL-terminated string.
///
/// # Safety
/// `s` must point at a valid NUL-terminated string.
pub unsafe extern "C" fn flow_strlen(s: *const c_char) -> i64 {
    cstr_bytes(s).len() as i64
}

/// Case-insensitive string compare; sign of the first differing byte
/// pair, zero on equality.
///
/// # Safety
/// Both pointers must be valid NUL-terminated strings.
pub unsafe extern "C" fn flow_strcasecmp(a: *const c_char, b: *const c_char) -> i32 {
    let (a, b) = (cstr_bytes(a), cstr_bytes(b));
    for i in 0..a.len().min(b.len()) {
        let d = i32::from(lower(a[i])) - i32::from(lower(b[i]));
        if d != 0 {
            return d;
        }
    }
    a.len() as i32 - b.len() as i32
}

/// Case-insensitive compare of at most `n` bytes.
///
/// # Safety
/// Both pointers must be valid NUL-terminated strings.
pub unsafe extern "C" fn flow_strncasecmp(a: *const c_char, b: *const c_char, n: i64) -> i32 {
    let n = usize::try_from(n).unwrap_or(0);
    let (a, b) = (cstr_bytes(a), cstr_bytes(b));
    let (a, b) = (&a[..a.len().min(n)], &b[..b.len().min(n)]);
    for i in 0..a.len().min(b.len()) {
        let d = i32::from(lower(a[i])) - i32::from(lower(b[i]));
        if d != 0 {
            return d;
        }
    }
    if a.len() == b.len() || a.len().min(b.len()) == n {
        0
    } else {
        a.len() as i32 - b.len() as i32
    }
}

/// Case-insensitive substring search; 1 if `needle` occurs in `hay`.
///
/// # Safety
/// Both buffer pointers must cover their stated lengths.
pub unsafe extern "C" fn flow_strcasestr(
    hlen: i64,
    hay: *const u8,
    nlen: i64,
    needle: *const u8,
) -> i32 {
    let hay = std::slice::from_raw_parts(hay, hlen as usize);
    let needle = std::slice::from_raw_parts(needle, nlen as usize);
    if needle.is_empty() {
        return 1;
    }
    if needle.len() > hay.len() {
        return 0;
    }
    let found = hay
        .windows(needle.len())
        .any(|w| w.iter().zip(needle).all(|(a, b)| lower(*a) == lower(*b)));
    i32::from(found)
}

/// Concatenate two strings into the unit's scratch arena, returning a
/// NUL-terminated result.
///
/// # Safety
/// `arena` must be the live arena of the calling unit; the buffer
/// pointers must cover their stated lengths.
pub unsafe extern "C" fn flow_strcat(
    arena: *const ScratchArena,
    llen: i64,
    lbuf: *const u8,
    rlen: i64,
    rbuf: *const u8,
) -> *const c_char {
    let arena = &*arena;
    let left = std::slice::from_raw_parts(lbuf, llen as usize);
    let right = std::slice::from_raw_parts(rbuf, rlen as usize);
    arena.push_concat(left, right)
}

/// Case-insensitive suffix check; 0 when `l` ends with `r`.
///
/// # Safety
/// Both pointers must be valid NUL-terminated strings.
pub unsafe extern "C" fn flow_endswith(l: *const c_char, r: *const c_char) -> i32 {
    let (l, r) = (cstr_bytes(l), cstr_bytes(r));
    if r.len() > l.len() {
        return 1;
    }
    let tail = &l[l.len() - r.len()..];
    let matches = tail.iter().zip(r).all(|(a, b)| lower(*a) == lower(*b));
    i32::from(!matches)
}

/// Count array elements up to the Void sentinel.
///
/// # Safety
/// `array` must point at a sentinel-terminated record sequence.
pub unsafe extern "C" fn flow_arraylen(array: *const FlowValue) -> i32 {
    let mut cursor = array;
    let mut count = 0;
    while !(*cursor).is_void() {
        cursor = cursor.add(1);
        count += 1;
    }
    count
}

/// Concatenate two arrays into `dst`, which must have room for both
/// plus the sentinel.
///
/// # Safety
/// `left` and `right` must be sentinel-terminated; `dst` must have
/// capacity for every element of both plus one sentinel record.
pub unsafe extern "C" fn flow_arrayadd(
    dst: *mut FlowValue,
    left: *const FlowValue,
    right: *const FlowValue,
) {
    let mut out = dst;
    let mut cursor = left;
    while !(*cursor).is_void() {
        *out = *cursor;
        out = out.add(1);
        cursor = cursor.add(1);
    }
    cursor = right;
    while !(*cursor).is_void() {
        *out = *cursor;
        out = out.add(1);
        cursor = cursor.add(1);
    }
    *out = FlowValue::VOID;
}

/// Elementwise array equality; 0 when equal.
///
/// # Safety
/// Both arrays must be sentinel-terminated and their element payloads
/// valid for their kinds.
pub unsafe extern "C" fn flow_arraycmp(left: *const FlowValue, right: *const FlowValue) -> i32 {
    let (mut l, mut r) = (left, right);
    while !(*l).is_void() && !(*r).is_void() {
        if (*l).kind != (*r).kind {
            return 1;
        }
        let equal = match (*l).value_kind() {
            Some(ValueKind::Number) | Some(ValueKind::Boolean) => (*l).number == (*r).number,
            Some(ValueKind::String) => {
                let a = cstr_bytes((*l).buffer.cast());
                let b = cstr_bytes((*r).buffer.cast());
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| lower(*x) == lower(*y))
            }
            Some(ValueKind::Buffer) => {
                (*l).number == (*r).number && {
                    let a = (*l).as_bytes();
                    let b = (*r).as_bytes();
                    a.iter().zip(b).all(|(x, y)| lower(*x) == lower(*y))
                }
            }
            _ => (*l).buffer == (*r).buffer,
        };
        if !equal {
            return 1;
        }
        l = l.add(1);
        r = r.add(1);
    }
    i32::from(!((*l).is_void() && (*r).is_void()))
}

fn build_regex(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(pattern).case_insensitive(true).build().ok()
}

/// Compile `pattern` and match it against `text`; 1 on match.
///
/// # Safety
/// Both buffer pointers must cover their stated lengths.
pub unsafe extern "C" fn flow_regexmatch(
    tlen: i64,
    tbuf: *const u8,
    plen: i64,
    pbuf: *const u8,
) -> i32 {
    let text = std::slice::from_raw_parts(tbuf, tlen as usize);
    let pattern = std::slice::from_raw_parts(pbuf, plen as usize);
    let Ok(pattern) = std::str::from_utf8(pattern) else {
        return 0;
    };
    let Some(re) = build_regex(pattern) else {
        return 0;
    };
    i32::from(re.is_match(&String::from_utf8_lossy(text)))
}

/// Match a precompiled pattern against `text`; 1 on match.
///
/// # Safety
/// `re` must be a live `Regex` owned by the calling unit; the text
/// buffer must cover its stated length.
pub unsafe extern "C" fn flow_regexmatch2(tlen: i64, tbuf: *const u8, re: *const Regex) -> i32 {
    let text = std::slice::from_raw_parts(tbuf, tlen as usize);
    let re = &*re;
    i32::from(re.is_match(&String::from_utf8_lossy(text)))
}

/// Numeric membership test; 1 when `number` occurs in the array.
///
/// # Safety
/// `array` must be sentinel-terminated.
pub unsafe extern "C" fn flow_number_in_array(number: u64, array: *const FlowValue) -> i32 {
    let mut cursor = array;
    while !(*cursor).is_void() {
        if (*cursor).value_kind() == Some(ValueKind::Number) && (*cursor).number == number {
            return 1;
        }
        cursor = cursor.add(1);
    }
    0
}

/// Case-insensitive string membership test; 1 when the text occurs in
/// the array.
///
/// # Safety
/// The text buffer must cover its stated length; `array` must be
/// sentinel-terminated with valid string/buffer payloads.
pub unsafe extern "C" fn flow_string_in_array(
    len: i64,
    buf: *const u8,
    array: *const FlowValue,
) -> i32 {
    let text = std::slice::from_raw_parts(buf, len as usize);
    let mut cursor = array;
    while !(*cursor).is_void() {
        let candidate: Option<&[u8]> = match (*cursor).value_kind() {
            Some(ValueKind::String) => Some(cstr_bytes((*cursor).buffer.cast())),
            Some(ValueKind::Buffer) => Some((*cursor).as_bytes()),
            _ => None,
        };
        if let Some(c) = candidate {
            if c.len() == text.len() && c.iter().zip(text).all(|(a, b)| lower(*a) == lower(*b)) {
                return 1;
            }
        }
        cursor = cursor.add(1);
    }
    0
}

/// IP equality; 0 when equal.
///
/// # Safety
/// Both pointers must be live `IpAddr`s owned by the calling unit or
/// host.
pub unsafe extern "C" fn flow_ipcmp(a: *const IpAddr, b: *const IpAddr) -> i32 {
    i32::from(*a != *b)
}

/// Compare an IP against the parsed form of a string; 0 when equal,
/// including textual variants of the same address.
///
/// # Safety
/// `ip` must be a live `IpAddr`; `s` a valid NUL-terminated string.
pub unsafe extern "C" fn flow_ipstrcmp(ip: *const IpAddr, s: *const c_char) -> i32 {
    let Ok(text) = CStr::from_ptr(s).to_str() else {
        return 1;
    };
    match IpAddr::from_str(text.trim()) {
        Ok(parsed) => i32::from(parsed != *ip),
        Err(_) => 1,
    }
}

/// Floating-point exponentiation backing the `**` operator
pub extern "C" fn flow_pow(base: f64, exponent: f64) -> f64 {
    base.powf(exponent)
}

/// The symbol table registered with the JIT builder
pub(crate) fn symbols() -> Vec<(&'static str, *const u8)> {
    vec![
        ("flow_strlen", flow_strlen as *const u8),
        ("flow_strcasecmp", flow_strcasecmp as *const u8),
        ("flow_strncasecmp", flow_strncasecmp as *const u8),
        ("flow_strcasestr", flow_strcasestr as *const u8),
        ("flow_strcat", flow_strcat as *const u8),
        ("flow_endswith", flow_endswith as *const u8),
        ("flow_arraylen", flow_arraylen as *const u8),
        ("flow_arrayadd", flow_arrayadd as *const u8),
        ("flow_arraycmp", flow_arraycmp as *const u8),
        ("flow_regexmatch", flow_regexmatch as *const u8),
        ("flow_regexmatch2", flow_regexmatch2 as *const u8),
        ("flow_number_in_array", flow_number_in_array as *const u8),
        ("flow_string_in_array", flow_string_in_array as *const u8),
        ("flow_ipcmp", flow_ipcmp as *const u8),
        ("flow_ipstrcmp", flow_ipstrcmp as *const u8),
        ("flow_pow", flow_pow as *const u8),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    #[test]
    fn strlen_counts_bytes() {
        let s = c("hello");
        assert_eq!(unsafe { flow_strlen(s.as_ptr()) }, 5);
        let empty = c("");
        assert_eq!(unsafe { flow_strlen(empty.as_ptr()) }, 0);
    }

    #[test]
    fn strcasecmp_is_antisymmetric() {
        let (a, b) = (c("Alpha"), c("beta"));
        let ab = unsafe { flow_strcasecmp(a.as_ptr(), b.as_ptr()) };
        let ba = unsafe { flow_strcasecmp(b.as_ptr(), a.as_ptr()) };
        assert!(ab < 0 && ba > 0);
        assert_eq!(ab.signum(), -ba.signum());
        let a2 = c("ALPHA");
        assert_eq!(unsafe { flow_strcasecmp(a.as_ptr(), a2.as_ptr()) }, 0);
    }

    #[test]
    fn strncasecmp_stops_at_n() {
        let (a, b) = (c("prefixXXX"), c("PREFIXyyy"));
        assert_eq!(unsafe { flow_strncasecmp(a.as_ptr(), b.as_ptr(), 6) }, 0);
        assert_ne!(unsafe { flow_strncasecmp(a.as_ptr(), b.as_ptr(), 7) }, 0);
    }

    #[test]
    fn strcasestr_finds_substrings() {
        let hay = b"The Quick Brown Fox";
        assert_eq!(
            unsafe { flow_strcasestr(19, hay.as_ptr(), 5, b"quick".as_ptr()) },
            1
        );
        assert_eq!(
            unsafe { flow_strcasestr(19, hay.as_ptr(), 4, b"wolf".as_ptr()) },
            0
        );
        assert_eq!(unsafe { flow_strcasestr(19, hay.as_ptr(), 0, b"".as_ptr()) }, 1);
    }

    #[test]
    fn strcat_yields_nul_terminated_result() {
        let arena = ScratchArena::new();
        let ptr = unsafe {
            flow_strcat(
                std::ptr::addr_of!(arena),
                3,
                b"foo".as_ptr(),
                3,
                b"bar".as_ptr(),
            )
        };
        let s = unsafe { CStr::from_ptr(ptr) };
        assert_eq!(s.to_str().unwrap(), "foobar");
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn endswith_is_case_insensitive() {
        let (l, r) = (c("index.HTML"), c(".html"));
        assert_eq!(unsafe { flow_endswith(l.as_ptr(), r.as_ptr()) }, 0);
        let longer = c("much-longer-than-the-subject");
        assert_eq!(unsafe { flow_endswith(r.as_ptr(), longer.as_ptr()) }, 1);
    }

    #[test]
    fn array_walks_stop_at_sentinel() {
        let arr = [
            FlowValue::number(1),
            FlowValue::number(2),
            FlowValue::VOID,
        ];
        assert_eq!(unsafe { flow_arraylen(arr.as_ptr()) }, 2);

        let left = [FlowValue::number(1), FlowValue::VOID];
        let right = [FlowValue::number(2), FlowValue::number(3), FlowValue::VOID];
        let mut dst = [FlowValue::VOID; 4];
        unsafe { flow_arrayadd(dst.as_mut_ptr(), left.as_ptr(), right.as_ptr()) };
        assert_eq!(unsafe { flow_arraylen(dst.as_ptr()) }, 3);
        assert_eq!(dst[0].as_number(), 1);
        assert_eq!(dst[2].as_number(), 3);
        assert!(dst[3].is_void());

        let expected = [
            FlowValue::number(1),
            FlowValue::number(2),
            FlowValue::number(3),
            FlowValue::VOID,
        ];
        assert_eq!(unsafe { flow_arraycmp(dst.as_ptr(), expected.as_ptr()) }, 0);
    }

    #[test]
    fn arraycmp_detects_differences() {
        let a = [FlowValue::number(1), FlowValue::VOID];
        let b = [FlowValue::number(2), FlowValue::VOID];
        let shorter = [FlowValue::VOID];
        assert_eq!(unsafe { flow_arraycmp(a.as_ptr(), b.as_ptr()) }, 1);
        assert_eq!(unsafe { flow_arraycmp(a.as_ptr(), shorter.as_ptr()) }, 1);
        assert_eq!(unsafe { flow_arraycmp(a.as_ptr(), a.as_ptr()) }, 0);
    }

    #[test]
    fn membership_helpers() {
        let s1 = c("alpha");
        let arr = [
            FlowValue::number(42),
            FlowValue::string(s1.as_ptr()),
            FlowValue::VOID,
        ];
        assert_eq!(unsafe { flow_number_in_array(42, arr.as_ptr()) }, 1);
        assert_eq!(unsafe { flow_number_in_array(7, arr.as_ptr()) }, 0);
        assert_eq!(
            unsafe { flow_string_in_array(5, b"ALPHA".as_ptr(), arr.as_ptr()) },
            1
        );
        assert_eq!(
            unsafe { flow_string_in_array(4, b"beta".as_ptr(), arr.as_ptr()) },
            0
        );
    }

    #[test]
    fn regex_matching_is_case_insensitive() {
        let text = b"Hello123";
        let pat = b"^hello[0-9]+$";
        assert_eq!(
            unsafe { flow_regexmatch(8, text.as_ptr(), 13, pat.as_ptr()) },
            1
        );
        let re = build_regex("world$").unwrap();
        assert_eq!(
            unsafe { flow_regexmatch2(8, text.as_ptr(), std::ptr::addr_of!(re)) },
            0
        );
        // malformed pattern does not match
        assert_eq!(unsafe { flow_regexmatch(8, text.as_ptr(), 1, b"(".as_ptr()) }, 0);
    }

    #[test]
    fn ip_comparisons_use_parsed_form() {
        let a: IpAddr = "127.0.0.1".parse().unwrap();
        let b: IpAddr = "::1".parse().unwrap();
        assert_eq!(unsafe { flow_ipcmp(&a, &a) }, 0);
        assert_eq!(unsafe { flow_ipcmp(&a, &b) }, 1);

        let canonical = c("127.0.0.1");
        assert_eq!(unsafe { flow_ipstrcmp(&a, canonical.as_ptr()) }, 0);
        let padded = c(" 127.0.0.1 ");
        assert_eq!(unsafe { flow_ipstrcmp(&a, padded.as_ptr()) }, 0);
        let garbage = c("not-an-ip");
        assert_eq!(unsafe { flow_ipstrcmp(&a, garbage.as_ptr()) }, 1);
    }

    #[test]
    fn pow_round_trips_through_f64() {
        assert_eq!(flow_pow(2.0, 10.0) as i64, 1024);
    }

    #[test]
    fn symbol_table_is_complete() {
        let names: Vec<_> = symbols().iter().map(|(n, _)| *n).collect();
        assert_eq!(names.len(), 16);
        assert!(names.contains(&"flow_strcat"));
        assert!(names.contains(&"flow_regexmatch2"));
    }
}
