use std::collections::BTreeMap;

use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unexpected end of input at offset {0}")]
    Eof(usize),
    #[error("invalid integer at offset {0}")]
    InvalidInteger(usize),
    #[error("invalid length prefix at offset {0}")]
    InvalidLength(usize),
    #[error("unexpected byte {byte:#04x} at offset {offset}")]
    UnexpectedByte { byte: u8, offset: usize },
    #[error("trailing data after top-level value at offset {0}")]
    TrailingData(usize),
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Result<u8, DecodeError> {
        self.buf.get(self.pos).copied().ok_or(DecodeError::Eof(self.pos))
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    fn parse_value(&mut self) -> Result<Value, DecodeError> {
        match self.peek()? {
            b'i' => self.parse_int(),
            b'l' => self.parse_list(),
            b'd' => self.parse_dict(),
            b'0'..=b'9' => self.parse_bytestring().map(Value::ByteString),
            other => Err(DecodeError::UnexpectedByte {
                byte: other,
                offset: self.pos,
            }),
        }
    }

    fn parse_int(&mut self) -> Result<Value, DecodeError> {
        debug_assert_eq!(self.buf[self.pos], b'i');
        let start = self.pos + 1;
        let end = self.find(b'e', start)?;
        let s = std::str::from_utf8(&self.buf[start..end])
            .map_err(|_| DecodeError::InvalidInteger(start))?;
        let n: i64 = s.parse().map_err(|_| DecodeError::InvalidInteger(start))?;
        self.pos = end + 1;
        Ok(Value::Int(n))
    }

    fn parse_bytestring(&mut self) -> Result<Vec<u8>, DecodeError> {
        let start = self.pos;
        let colon = self.find(b':', start)?;
        let len_str = std::str::from_utf8(&self.buf[start..colon])
            .map_err(|_| DecodeError::InvalidLength(start))?;
        let len: usize = len_str.parse().map_err(|_| DecodeError::InvalidLength(start))?;
        let data_start = colon + 1;
        let data_end = data_start
            .checked_add(len)
            .ok_or(DecodeError::InvalidLength(start))?;
        if data_end > self.buf.len() {
            return Err(DecodeError::Eof(data_end));
        }
        self.pos = data_end;
        Ok(self.buf[data_start..data_end].to_vec())
    }

    fn parse_list(&mut self) -> Result<Value, DecodeError> {
        debug_assert_eq!(self.buf[self.pos], b'l');
        self.advance(1);
        let mut items = Vec::new();
        loop {
            if self.peek()? == b'e' {
                self.advance(1);
                return Ok(Value::List(items));
            }
            items.push(self.parse_value()?);
        }
    }

    fn parse_dict(&mut self) -> Result<Value, DecodeError> {
        debug_assert_eq!(self.buf[self.pos], b'd');
        self.advance(1);
        let mut map = BTreeMap::new();
        loop {
            if self.peek()? == b'e' {
                self.advance(1);
                return Ok(Value::Dict(map));
            }
            let key = self.parse_bytestring()?;
            let value = self.parse_value()?;
            map.insert(key, value);
        }
    }

    fn find(&self, byte: u8, from: usize) -> Result<usize, DecodeError> {
        self.buf[from..]
            .iter()
            .position(|&b| b == byte)
            .map(|p| p + from)
            .ok_or(DecodeError::Eof(from))
    }
}

pub fn decode(buf: &[u8]) -> Result<Value, DecodeError> {
    let mut c = Cursor { buf, pos: 0 };
    let v = c.parse_value()?;
    if c.pos != buf.len() {
        return Err(DecodeError::TrailingData(c.pos));
    }
    Ok(v)
}

/// Scans the top-level dict of `buf` for `key` and returns the byte range
/// (within `buf`) of its raw, still-encoded value, without allocating a
/// `Value` tree for it. Used to hash a torrent file's `info` dict without
/// re-serializing it.
pub fn find_top_level_dict_value_span(buf: &[u8], key: &[u8]) -> Option<std::ops::Range<usize>> {
    let mut c = Cursor { buf, pos: 0 };
    if c.peek().ok()? != b'd' {
        return None;
    }
    c.advance(1);
    loop {
        if c.peek().ok()? == b'e' {
            return None;
        }
        let k = c.parse_bytestring().ok()?;
        let value_start = c.pos;
        c.parse_value().ok()?;
        let value_end = c.pos;
        if k == key {
            return Some(value_start..value_end);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_scalars() {
        assert_eq!(decode(b"i42e").unwrap(), Value::Int(42));
        assert_eq!(decode(b"i-3e").unwrap(), Value::Int(-3));
        assert_eq!(decode(b"4:spam").unwrap(), Value::ByteString(b"spam".to_vec()));
    }

    #[test]
    fn decodes_list_and_dict() {
        let v = decode(b"l4:spam4:eggse").unwrap();
        assert_eq!(
            v,
            Value::List(vec![
                Value::ByteString(b"spam".to_vec()),
                Value::ByteString(b"eggs".to_vec())
            ])
        );

        let v = decode(b"d3:cow3:moo4:spam4:eggse").unwrap();
        let d = v.as_dict().unwrap();
        assert_eq!(d.get(b"cow".as_slice()).unwrap().as_bytes(), Some(b"moo".as_slice()));
        assert_eq!(d.get(b"spam".as_slice()).unwrap().as_bytes(), Some(b"eggs".as_slice()));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(decode(b"i1ee").is_err());
    }

    #[test]
    fn finds_info_dict_span_for_hashing() {
        let raw = b"d8:announce3:foo4:infod6:lengthi10eee";
        let span = find_top_level_dict_value_span(raw, b"info").unwrap();
        assert_eq!(&raw[span], b"d6:lengthi10ee".as_slice());
    }
}
