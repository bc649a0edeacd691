//! Binary data-file format (spec §6).
//!
//! `magic [4 bytes] + format-version [1 byte] + tagged records ... + EOF`.
//! Integers are big-endian var-length (a base-128 varint, most significant
//! group first); strings are UTF-8, length-prefixed by a varint. There is
//! no `spacetimedb_sats` dependency here - the wire shape this crate needs
//! (five flat record kinds, no schema evolution) doesn't benefit from a
//! generic SATS-style serializer, so the codec is hand-rolled over
//! `bytes::{Buf, BufMut}` instead (see DESIGN.md).

use bytes::{Buf, BufMut};
use thiserror::Error;

pub const MAGIC: [u8; 4] = *b"TRPS";
pub const FORMAT_VERSION: u8 = 1;

const TAG_NAMESPACE: u8 = 1;
const TAG_URI: u8 = 2;
const TAG_BNODE: u8 = 3;
const TAG_LITERAL: u8 = 4;
const TAG_STATEMENT: u8 = 5;
const TAG_EOF: u8 = 0xff;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unexpected end of data file")]
    UnexpectedEof,
    #[error("data file does not start with the expected magic bytes")]
    BadMagic,
    #[error("unsupported data file format version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown record tag {0:#x}")]
    UnknownTag(u8),
    #[error("record string was not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// One tagged record of the data-file format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Namespace { id: u32, value: String },
    Uri { id: u32, ns_id: u32, local: String },
    Bnode { id: u32, label: String },
    Literal {
        id: u32,
        lex: String,
        lang: Option<String>,
        datatype: Option<String>,
    },
    Statement {
        s: u32,
        p: u32,
        o: u32,
        c: Option<u32>,
        explicit: bool,
    },
    Eof,
}

pub fn write_varint(buf: &mut impl BufMut, mut value: u64) {
    let mut groups = [0u8; 10];
    let mut n = 0;
    loop {
        groups[n] = (value & 0x7f) as u8;
        value >>= 7;
        n += 1;
        if value == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        if i == 0 {
            buf.put_u8(groups[i]);
        } else {
            buf.put_u8(groups[i] | 0x80);
        }
    }
}

pub fn read_varint(buf: &mut impl Buf) -> Result<u64, DecodeError> {
    let mut value: u64 = 0;
    loop {
        if !buf.has_remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        let byte = buf.get_u8();
        value = (value << 7) | (byte & 0x7f) as u64;
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok(value)
}

fn write_string(buf: &mut impl BufMut, s: &str) {
    write_varint(buf, s.len() as u64);
    buf.put_slice(s.as_bytes());
}

fn read_string(buf: &mut impl Buf) -> Result<String, DecodeError> {
    let len = read_varint(buf)? as usize;
    if buf.remaining() < len {
        return Err(DecodeError::UnexpectedEof);
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(String::from_utf8(bytes)?)
}

fn write_option_id(buf: &mut impl BufMut, id: Option<u32>) {
    match id {
        Some(id) => {
            buf.put_u8(1);
            write_varint(buf, id as u64);
        }
        None => buf.put_u8(0),
    }
}

fn read_option_id(buf: &mut impl Buf) -> Result<Option<u32>, DecodeError> {
    if !buf.has_remaining() {
        return Err(DecodeError::UnexpectedEof);
    }
    match buf.get_u8() {
        0 => Ok(None),
        _ => Ok(Some(read_varint(buf)? as u32)),
    }
}

fn write_option_string(buf: &mut impl BufMut, s: Option<&str>) {
    match s {
        Some(s) => {
            buf.put_u8(1);
            write_string(buf, s);
        }
        None => buf.put_u8(0),
    }
}

fn read_option_string(buf: &mut impl Buf) -> Result<Option<String>, DecodeError> {
    if !buf.has_remaining() {
        return Err(DecodeError::UnexpectedEof);
    }
    match buf.get_u8() {
        0 => Ok(None),
        _ => Ok(Some(read_string(buf)?)),
    }
}

pub fn write_header(buf: &mut impl BufMut) {
    buf.put_slice(&MAGIC);
    buf.put_u8(FORMAT_VERSION);
}

pub fn read_header(buf: &mut impl Buf) -> Result<(), DecodeError> {
    if buf.remaining() < MAGIC.len() + 1 {
        return Err(DecodeError::UnexpectedEof);
    }
    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if magic != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let version = buf.get_u8();
    if version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    Ok(())
}

pub fn write_record(buf: &mut impl BufMut, record: &Record) {
    match record {
        Record::Namespace { id, value } => {
            buf.put_u8(TAG_NAMESPACE);
            write_varint(buf, *id as u64);
            write_string(buf, value);
        }
        Record::Uri { id, ns_id, local } => {
            buf.put_u8(TAG_URI);
            write_varint(buf, *id as u64);
            write_varint(buf, *ns_id as u64);
            write_string(buf, local);
        }
        Record::Bnode { id, label } => {
            buf.put_u8(TAG_BNODE);
            write_varint(buf, *id as u64);
            write_string(buf, label);
        }
        Record::Literal { id, lex, lang, datatype } => {
            buf.put_u8(TAG_LITERAL);
            write_varint(buf, *id as u64);
            write_string(buf, lex);
            write_option_string(buf, lang.as_deref());
            write_option_string(buf, datatype.as_deref());
        }
        Record::Statement { s, p, o, c, explicit } => {
            buf.put_u8(TAG_STATEMENT);
            write_varint(buf, *s as u64);
            write_varint(buf, *p as u64);
            write_varint(buf, *o as u64);
            write_option_id(buf, *c);
            buf.put_u8(*explicit as u8);
        }
        Record::Eof => buf.put_u8(TAG_EOF),
    }
}

pub fn read_record(buf: &mut impl Buf) -> Result<Record, DecodeError> {
    if !buf.has_remaining() {
        return Err(DecodeError::UnexpectedEof);
    }
    let tag = buf.get_u8();
    match tag {
        TAG_NAMESPACE => Ok(Record::Namespace {
            id: read_varint(buf)? as u32,
            value: read_string(buf)?,
        }),
        TAG_URI => Ok(Record::Uri {
            id: read_varint(buf)? as u32,
            ns_id: read_varint(buf)? as u32,
            local: read_string(buf)?,
        }),
        TAG_BNODE => Ok(Record::Bnode {
            id: read_varint(buf)? as u32,
            label: read_string(buf)?,
        }),
        TAG_LITERAL => Ok(Record::Literal {
            id: read_varint(buf)? as u32,
            lex: read_string(buf)?,
            lang: read_option_string(buf)?,
            datatype: read_option_string(buf)?,
        }),
        TAG_STATEMENT => {
            let s = read_varint(buf)? as u32;
            let p = read_varint(buf)? as u32;
            let o = read_varint(buf)? as u32;
            let c = read_option_id(buf)?;
            if !buf.has_remaining() {
                return Err(DecodeError::UnexpectedEof);
            }
            let explicit = buf.get_u8() != 0;
            Ok(Record::Statement { s, p, o, c, explicit })
        }
        TAG_EOF => Ok(Record::Eof),
        other => Err(DecodeError::UnknownTag(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trips_across_byte_boundaries() {
        for value in [0u64, 1, 127, 128, 16383, 16384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            let mut slice = &buf[..];
            assert_eq!(read_varint(&mut slice).unwrap(), value);
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn string_round_trips() {
        let mut buf = Vec::new();
        write_string(&mut buf, "hello, rdf");
        let mut slice = &buf[..];
        assert_eq!(read_string(&mut slice).unwrap(), "hello, rdf");
    }

    #[test]
    fn records_round_trip() {
        let records = vec![
            Record::Namespace {
                id: 0,
                value: "http://example.org/".to_string(),
            },
            Record::Uri {
                id: 1,
                ns_id: 0,
                local: "a".to_string(),
            },
            Record::Bnode {
                id: 2,
                label: "b0".to_string(),
            },
            Record::Literal {
                id: 3,
                lex: "hi".to_string(),
                lang: Some("en".to_string()),
                datatype: None,
            },
            Record::Statement {
                s: 1,
                p: 1,
                o: 2,
                c: None,
                explicit: true,
            },
            Record::Eof,
        ];
        let mut buf = Vec::new();
        for record in &records {
            write_record(&mut buf, record);
        }
        let mut slice = &buf[..];
        for expected in &records {
            assert_eq!(&read_record(&mut slice).unwrap(), expected);
        }
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = Vec::new();
        buf.put_slice(b"NOPE");
        buf.put_u8(FORMAT_VERSION);
        let mut slice = &buf[..];
        assert!(matches!(read_header(&mut slice), Err(DecodeError::BadMagic)));
    }
}
