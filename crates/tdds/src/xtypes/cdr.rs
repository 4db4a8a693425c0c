// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CDR (Common Data Representation) encoding for dynamic values.
//!
//! Classic CDR for FINAL types; parameterized CDR (PL_CDR, pid/length
//! member headers with a sentinel) for EXTENSIBLE and MUTABLE types. Both
//! endiannesses decode; encoding emits little-endian, matching the
//! encapsulation identifiers below.
//!
//! Alignment is relative to the start of the serialized payload (after the
//! 4-byte encapsulation header), per DDS-RTPS v2.5 Sec.10.

use super::{DynamicValue, Extensibility, StructType, TypeCode, TypeDescriptor};
use crate::dds::{Error, Result};

/// CDR big-endian encapsulation identifier.
pub const CDR_BE: u16 = 0x0000;
/// CDR little-endian encapsulation identifier.
pub const CDR_LE: u16 = 0x0001;
/// Parameterized CDR big-endian.
pub const PL_CDR_BE: u16 = 0x0002;
/// Parameterized CDR little-endian.
pub const PL_CDR_LE: u16 = 0x0003;

/// Sentinel pid closing a parameter list.
const PID_SENTINEL: u16 = 0x0001;

// ============================================================================
// ENCODER
// ============================================================================

struct Encoder {
    buf: Vec<u8>,
    little: bool,
}

impl Encoder {
    fn new(little: bool) -> Self {
        Encoder {
            buf: Vec::with_capacity(64),
            little,
        }
    }

    fn align(&mut self, n: usize) {
        while self.buf.len() % n != 0 {
            self.buf.push(0);
        }
    }

    fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn put_u16(&mut self, v: u16) {
        self.align(2);
        let b = if self.little {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        };
        self.buf.extend_from_slice(&b);
    }

    fn put_u32(&mut self, v: u32) {
        self.align(4);
        let b = if self.little {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        };
        self.buf.extend_from_slice(&b);
    }

    fn put_u64(&mut self, v: u64) {
        self.align(8);
        let b = if self.little {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        };
        self.buf.extend_from_slice(&b);
    }

    fn put_string(&mut self, s: &str) {
        // length includes the NUL terminator
        self.put_u32(s.len() as u32 + 1);
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    fn encode(&mut self, code: &TypeCode, value: &DynamicValue) -> Result<()> {
        match (code, value) {
            (TypeCode::Boolean, DynamicValue::Boolean(v)) => self.put_u8(u8::from(*v)),
            (TypeCode::Char, DynamicValue::Char(v)) | (TypeCode::Octet, DynamicValue::Octet(v)) => {
                self.put_u8(*v)
            }
            (TypeCode::Short, DynamicValue::Short(v)) => self.put_u16(*v as u16),
            (TypeCode::UShort, DynamicValue::UShort(v)) => self.put_u16(*v),
            (TypeCode::Long, DynamicValue::Long(v)) => self.put_u32(*v as u32),
            (TypeCode::ULong, DynamicValue::ULong(v)) => self.put_u32(*v),
            (TypeCode::LongLong, DynamicValue::LongLong(v)) => self.put_u64(*v as u64),
            (TypeCode::ULongLong, DynamicValue::ULongLong(v)) => self.put_u64(*v),
            (TypeCode::Float, DynamicValue::Float(v)) => self.put_u32(v.to_bits()),
            (TypeCode::Double, DynamicValue::Double(v)) => self.put_u64(v.to_bits()),
            (TypeCode::LongDouble, DynamicValue::LongDouble(v)) => {
                // wire long double is 16 bytes; pad the f64 representation
                self.align(8);
                self.put_u64(v.to_bits());
                self.buf.extend_from_slice(&[0u8; 8]);
            }
            (TypeCode::String(bound), DynamicValue::String(s)) => {
                if let Some(b) = bound {
                    if s.len() as u32 > *b {
                        return Err(Error::BadParameter(format!(
                            "string exceeds bound {}",
                            b
                        )));
                    }
                }
                self.put_string(s);
            }
            (TypeCode::Enum { .. }, DynamicValue::Enum(v)) => self.put_u32(*v),
            (TypeCode::Struct(st), DynamicValue::Struct(fields)) => {
                self.encode_struct(st, fields)?;
            }
            (TypeCode::Union(ut), DynamicValue::Union {
                discriminator,
                value,
            }) => {
                self.encode(&ut.discriminator, &disc_value(&ut.discriminator, *discriminator))?;
                let branch = ut
                    .branches
                    .iter()
                    .find(|b| b.labels.contains(discriminator))
                    .or_else(|| ut.branches.iter().find(|b| b.is_default))
                    .ok_or_else(|| {
                        Error::BadParameter("union discriminator matches no branch".to_string())
                    })?;
                self.encode(&branch.field.code, value)?;
            }
            (TypeCode::Sequence { element, bound }, DynamicValue::Sequence(items)) => {
                if let Some(b) = bound {
                    if items.len() as u32 > *b {
                        return Err(Error::BadParameter("sequence exceeds bound".to_string()));
                    }
                }
                self.put_u32(items.len() as u32);
                for item in items {
                    self.encode(element, item)?;
                }
            }
            (TypeCode::Array { element, dims }, DynamicValue::Array(items)) => {
                let expected: u64 = dims.iter().map(|d| u64::from(*d)).product();
                if items.len() as u64 != expected {
                    return Err(Error::BadParameter("array length mismatch".to_string()));
                }
                for item in items {
                    self.encode(element, item)?;
                }
            }
            (TypeCode::TypeRef(name), _) => {
                return Err(Error::BadParameter(format!(
                    "unresolved type reference '{}'",
                    name
                )));
            }
            (code, value) => {
                return Err(Error::BadParameter(format!(
                    "value {:?} does not match type code {:?}",
                    value, code
                )));
            }
        }
        Ok(())
    }

    fn encode_struct(&mut self, st: &StructType, fields: &[DynamicValue]) -> Result<()> {
        if fields.len() != st.fields.len() {
            return Err(Error::BadParameter(format!(
                "struct {} expects {} fields, got {}",
                st.name,
                st.fields.len(),
                fields.len()
            )));
        }
        match st.extensibility {
            Extensibility::Final => {
                for (fd, fv) in st.fields.iter().zip(fields) {
                    self.encode(&fd.code, fv)?;
                }
            }
            Extensibility::Extensible | Extensibility::Mutable => {
                // parameter list: (pid, length) headers, 4-byte member alignment
                for (fd, fv) in st.fields.iter().zip(fields) {
                    let mut member = Encoder::new(self.little);
                    member.encode(&fd.code, fv)?;
                    let body = member.buf;
                    self.align(4);
                    self.put_u16(fd.id as u16);
                    self.put_u16(body.len() as u16);
                    self.buf.extend_from_slice(&body);
                    self.align(4);
                }
                self.align(4);
                self.put_u16(PID_SENTINEL);
                self.put_u16(0);
            }
        }
        Ok(())
    }
}

fn disc_value(code: &TypeCode, disc: i64) -> DynamicValue {
    match code {
        TypeCode::Boolean => DynamicValue::Boolean(disc != 0),
        TypeCode::Char | TypeCode::Octet => DynamicValue::Octet(disc as u8),
        TypeCode::Short => DynamicValue::Short(disc as i16),
        TypeCode::UShort => DynamicValue::UShort(disc as u16),
        TypeCode::ULong => DynamicValue::ULong(disc as u32),
        TypeCode::Enum { .. } => DynamicValue::Enum(disc as u32),
        _ => DynamicValue::Long(disc as i32),
    }
}

// ============================================================================
// DECODER
// ============================================================================

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    little: bool,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8], little: bool) -> Self {
        Decoder {
            buf,
            pos: 0,
            little,
        }
    }

    fn align(&mut self, n: usize) {
        while self.pos % n != 0 {
            self.pos += 1;
        }
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.pos + n > self.buf.len() {
            Err(Error::NoData)
        } else {
            Ok(())
        }
    }

    fn get_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    fn get_u16(&mut self) -> Result<u16> {
        self.align(2);
        self.need(2)?;
        let b = [self.buf[self.pos], self.buf[self.pos + 1]];
        self.pos += 2;
        Ok(if self.little {
            u16::from_le_bytes(b)
        } else {
            u16::from_be_bytes(b)
        })
    }

    fn get_u32(&mut self) -> Result<u32> {
        self.align(4);
        self.need(4)?;
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(if self.little {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        })
    }

    fn get_u64(&mut self) -> Result<u64> {
        self.align(8);
        self.need(8)?;
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(if self.little {
            u64::from_le_bytes(b)
        } else {
            u64::from_be_bytes(b)
        })
    }

    fn get_string(&mut self) -> Result<String> {
        let len = self.get_u32()? as usize;
        if len == 0 {
            return Ok(String::new());
        }
        self.need(len)?;
        let bytes = &self.buf[self.pos..self.pos + len - 1]; // strip NUL
        self.pos += len;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::BadParameter("invalid utf8".into()))
    }

    fn decode(&mut self, code: &TypeCode) -> Result<DynamicValue> {
        Ok(match code {
            TypeCode::Boolean => DynamicValue::Boolean(self.get_u8()? != 0),
            TypeCode::Char => DynamicValue::Char(self.get_u8()?),
            TypeCode::Octet => DynamicValue::Octet(self.get_u8()?),
            TypeCode::Short => DynamicValue::Short(self.get_u16()? as i16),
            TypeCode::UShort => DynamicValue::UShort(self.get_u16()?),
            TypeCode::Long => DynamicValue::Long(self.get_u32()? as i32),
            TypeCode::ULong => DynamicValue::ULong(self.get_u32()?),
            TypeCode::LongLong => DynamicValue::LongLong(self.get_u64()? as i64),
            TypeCode::ULongLong => DynamicValue::ULongLong(self.get_u64()?),
            TypeCode::Float => DynamicValue::Float(f32::from_bits(self.get_u32()?)),
            TypeCode::Double => DynamicValue::Double(f64::from_bits(self.get_u64()?)),
            TypeCode::LongDouble => {
                self.align(8);
                let v = f64::from_bits(self.get_u64()?);
                self.need(8)?;
                self.pos += 8; // discard padding half
                DynamicValue::LongDouble(v)
            }
            TypeCode::String(_) => DynamicValue::String(self.get_string()?),
            TypeCode::Enum { .. } => DynamicValue::Enum(self.get_u32()?),
            TypeCode::Struct(st) => self.decode_struct(st)?,
            TypeCode::Union(ut) => {
                let disc = match self.decode(&ut.discriminator)? {
                    DynamicValue::Boolean(b) => i64::from(b),
                    DynamicValue::Octet(v) | DynamicValue::Char(v) => i64::from(v),
                    DynamicValue::Short(v) => i64::from(v),
                    DynamicValue::UShort(v) => i64::from(v),
                    DynamicValue::Long(v) => i64::from(v),
                    DynamicValue::ULong(v) | DynamicValue::Enum(v) => i64::from(v),
                    other => {
                        return Err(Error::BadParameter(format!(
                            "invalid union discriminator {:?}",
                            other
                        )))
                    }
                };
                let branch = ut
                    .branches
                    .iter()
                    .find(|b| b.labels.contains(&disc))
                    .or_else(|| ut.branches.iter().find(|b| b.is_default))
                    .ok_or_else(|| Error::BadParameter("unknown union branch".to_string()))?;
                DynamicValue::Union {
                    discriminator: disc,
                    value: Box::new(self.decode(&branch.field.code)?),
                }
            }
            TypeCode::Sequence { element, bound } => {
                let len = self.get_u32()? as usize;
                if let Some(b) = bound {
                    if len as u32 > *b {
                        return Err(Error::BadParameter("sequence exceeds bound".to_string()));
                    }
                }
                let mut items = Vec::with_capacity(len.min(4096));
                for _ in 0..len {
                    items.push(self.decode(element)?);
                }
                DynamicValue::Sequence(items)
            }
            TypeCode::Array { element, dims } => {
                let total: u64 = dims.iter().map(|d| u64::from(*d)).product();
                let mut items = Vec::with_capacity(total as usize);
                for _ in 0..total {
                    items.push(self.decode(element)?);
                }
                DynamicValue::Array(items)
            }
            TypeCode::TypeRef(name) => {
                return Err(Error::BadParameter(format!(
                    "unresolved type reference '{}'",
                    name
                )))
            }
        })
    }

    fn decode_struct(&mut self, st: &StructType) -> Result<DynamicValue> {
        match st.extensibility {
            Extensibility::Final => {
                let mut fields = Vec::with_capacity(st.fields.len());
                for fd in &st.fields {
                    fields.push(self.decode(&fd.code)?);
                }
                Ok(DynamicValue::Struct(fields))
            }
            Extensibility::Extensible | Extensibility::Mutable => {
                let mut fields: Vec<Option<DynamicValue>> = vec![None; st.fields.len()];
                loop {
                    self.align(4);
                    let pid = self.get_u16()?;
                    let len = self.get_u16()? as usize;
                    if pid == PID_SENTINEL {
                        break;
                    }
                    self.need(len)?;
                    let member_buf = &self.buf[self.pos..self.pos + len];
                    self.pos += len;
                    self.align(4);

                    if let Some(idx) = st.fields.iter().position(|f| f.id as u16 == pid) {
                        let mut sub = Decoder::new(member_buf, self.little);
                        fields[idx] = Some(sub.decode(&st.fields[idx].code)?);
                    }
                    // unknown pids are skipped: that is the point of MUTABLE
                }
                let values: Result<Vec<DynamicValue>> = fields
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| {
                        v.ok_or_else(|| {
                            Error::BadParameter(format!(
                                "missing member '{}' in {}",
                                st.fields[i].name, st.name
                            ))
                        })
                    })
                    .collect();
                Ok(DynamicValue::Struct(values?))
            }
        }
    }
}

// ============================================================================
// PUBLIC SURFACE
// ============================================================================

/// Serialize a value with its encapsulation header.
pub fn encode(descriptor: &TypeDescriptor, value: &DynamicValue) -> Result<Vec<u8>> {
    let parameterized = matches!(
        &descriptor.code,
        TypeCode::Struct(st) if !matches!(st.extensibility, Extensibility::Final)
    );
    let encap: u16 = if parameterized { PL_CDR_LE } else { CDR_LE };

    let mut enc = Encoder::new(true);
    enc.encode(&descriptor.code, value)?;

    let mut out = Vec::with_capacity(4 + enc.buf.len());
    out.extend_from_slice(&encap.to_be_bytes());
    out.extend_from_slice(&[0x00, 0x00]); // options
    out.extend_from_slice(&enc.buf);
    Ok(out)
}

/// Deserialize a value, honoring the encapsulation header's endianness.
pub fn decode(descriptor: &TypeDescriptor, buf: &[u8]) -> Result<DynamicValue> {
    if buf.len() < 4 {
        return Err(Error::NoData);
    }
    let encap = u16::from_be_bytes([buf[0], buf[1]]);
    let little = match encap {
        CDR_LE | PL_CDR_LE => true,
        CDR_BE | PL_CDR_BE => false,
        other => {
            return Err(Error::BadParameter(format!(
                "unknown encapsulation 0x{:04x}",
                other
            )))
        }
    };
    let mut dec = Decoder::new(&buf[4..], little);
    dec.decode(&descriptor.code)
}

/// Serialize only the `@Key` fields, big-endian, for key hashing.
#[must_use]
pub fn encode_key_fields(descriptor: &TypeDescriptor, value: &DynamicValue) -> Vec<u8> {
    let TypeCode::Struct(st) = &descriptor.code else {
        return Vec::new();
    };
    let DynamicValue::Struct(fields) = value else {
        return Vec::new();
    };
    let mut enc = Encoder::new(false);
    for (fd, fv) in st.fields.iter().zip(fields) {
        if fd.key {
            let _ = enc.encode(&fd.code, fv);
        }
    }
    enc.buf
}
