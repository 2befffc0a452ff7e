// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefixed ASCII string encoding used by interaction payloads.
//!
//! Three prefix widths, named by the protocol family:
//! - *tiny*: 1-byte length, up to 255 bytes
//! - *text*: 2-byte little-endian length, up to 65535 bytes
//! - *long*: 4-byte little-endian length
//!
//! These are handler-level conventions; the transport core never interprets
//! payload bytes.

use crate::{Error, Result};

fn check_ascii(s: &str) -> Result<()> {
    if !s.is_ascii() {
        return Err(Error::InvalidString("non-ASCII string"));
    }
    Ok(())
}

/// Append a tiny string (1-byte length prefix).
pub fn put_tiny(dst: &mut Vec<u8>, s: &str) -> Result<()> {
    check_ascii(s)?;
    if s.len() > u8::MAX as usize {
        return Err(Error::InvalidString("tiny string longer than 255 bytes"));
    }
    dst.push(s.len() as u8);
    dst.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Append a text string (2-byte LE length prefix).
pub fn put_text(dst: &mut Vec<u8>, s: &str) -> Result<()> {
    check_ascii(s)?;
    if s.len() > u16::MAX as usize {
        return Err(Error::InvalidString("text string longer than 65535 bytes"));
    }
    dst.extend_from_slice(&(s.len() as u16).to_le_bytes());
    dst.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Append a long string (4-byte LE length prefix).
pub fn put_long(dst: &mut Vec<u8>, s: &str) -> Result<()> {
    check_ascii(s)?;
    dst.extend_from_slice(&(s.len() as u32).to_le_bytes());
    dst.extend_from_slice(s.as_bytes());
    Ok(())
}

fn take_str(src: &[u8], len: usize, consumed: usize) -> Result<(&str, &[u8])> {
    let total = consumed + len;
    if src.len() < total {
        return Err(Error::TruncatedFrame { len: src.len() });
    }
    let s = std::str::from_utf8(&src[consumed..total])
        .map_err(|_| Error::InvalidString("invalid string bytes"))?;
    if !s.is_ascii() {
        return Err(Error::InvalidString("non-ASCII string"));
    }
    Ok((s, &src[total..]))
}

/// Read a tiny string; returns the string and the remaining bytes.
pub fn get_tiny(src: &[u8]) -> Result<(&str, &[u8])> {
    if src.is_empty() {
        return Err(Error::TruncatedFrame { len: 0 });
    }
    take_str(src, src[0] as usize, 1)
}

/// Read a text string; returns the string and the remaining bytes.
pub fn get_text(src: &[u8]) -> Result<(&str, &[u8])> {
    if src.len() < 2 {
        return Err(Error::TruncatedFrame { len: src.len() });
    }
    let len = u16::from_le_bytes([src[0], src[1]]) as usize;
    take_str(src, len, 2)
}

/// Read a long string; returns the string and the remaining bytes.
pub fn get_long(src: &[u8]) -> Result<(&str, &[u8])> {
    if src.len() < 4 {
        return Err(Error::TruncatedFrame { len: src.len() });
    }
    let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
    take_str(src, len, 4)
}
