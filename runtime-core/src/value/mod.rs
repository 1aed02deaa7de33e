//! Typed property values
//!
//! Every message and every extension property store carries a tree of
//! `Value`s: tagged scalars, byte buffers, process-local pointers, arrays
//! and objects. Access is by dotted path (`a.b[3].c`); assignment through
//! a missing path auto-creates the intermediate containers.
//!
//! Objects keep insertion order for diagnostic rendering, but equality is
//! order-insensitive.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub mod json;
pub mod path;

pub use path::{parse_path, PathSeg};

use crate::{Error, Result};

/// Ownership of a `ptr` value.
///
/// `Owned` pointers run their deleter exactly once when the last clone of
/// the value drops; `Borrowed` pointers are never freed by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrOwnership {
    /// The runtime never frees the pointer.
    Borrowed,
    /// The runtime frees the pointer via its deleter on last drop.
    Owned,
}

/// Deleter invoked with the raw pointer when an owned ptr value drops.
pub type PtrDeleter = dyn Fn(usize) + Send + Sync;

struct OwnedPtr {
    raw: usize,
    deleter: Option<Box<PtrDeleter>>,
}

impl Drop for OwnedPtr {
    fn drop(&mut self) {
        if let Some(deleter) = self.deleter.take() {
            deleter(self.raw);
        }
    }
}

/// An opaque process-local pointer property.
///
/// Never serialized; a ptr that crosses a process boundary arrives as
/// `Value::Null` on the far side.
#[derive(Clone)]
pub struct PtrValue {
    raw: usize,
    owned: Option<Arc<OwnedPtr>>,
}

impl PtrValue {
    /// Wrap a raw pointer without taking ownership.
    pub fn borrowed(raw: usize) -> Self {
        Self { raw, owned: None }
    }

    /// Take ownership of a raw pointer, freeing it through `deleter` when
    /// the last clone drops.
    pub fn owned(raw: usize, deleter: Option<Box<PtrDeleter>>) -> Self {
        Self {
            raw,
            owned: Some(Arc::new(OwnedPtr { raw, deleter })),
        }
    }

    /// The raw pointer bits.
    pub fn raw(&self) -> usize {
        self.raw
    }

    /// Whether the runtime owns (and will free) the pointer.
    pub fn ownership(&self) -> PtrOwnership {
        if self.owned.is_some() {
            PtrOwnership::Owned
        } else {
            PtrOwnership::Borrowed
        }
    }
}

impl fmt::Debug for PtrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PtrValue")
            .field("raw", &(self.raw as *const ()))
            .field("ownership", &self.ownership())
            .finish()
    }
}

impl PartialEq for PtrValue {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Serialize for PtrValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        // Ptr values never cross the wire.
        serializer.serialize_unit()
    }
}

impl<'de> Deserialize<'de> for PtrValue {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        <()>::deserialize(deserializer)?;
        Ok(PtrValue::borrowed(0))
    }
}

/// Tagged property value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Absent / explicit null
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integers
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    /// Unsigned integers
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    /// Floats
    F32(f32),
    F64(f64),
    /// UTF-8 string
    Str(String),
    /// Opaque byte buffer (shared, cheap to clone)
    Buf(Bytes),
    /// Process-local pointer; never serialized
    Ptr(PtrValue),
    /// Ordered array
    Arr(Vec<Value>),
    /// Object; insertion order preserved for rendering only
    Obj(Vec<(String, Value)>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (I8(a), I8(b)) => a == b,
            (I16(a), I16(b)) => a == b,
            (I32(a), I32(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (U8(a), U8(b)) => a == b,
            (U16(a), U16(b)) => a == b,
            (U32(a), U32(b)) => a == b,
            (U64(a), U64(b)) => a == b,
            (F32(a), F32(b)) => a == b,
            (F64(a), F64(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Buf(a), Buf(b)) => a == b,
            (Ptr(a), Ptr(b)) => a == b,
            (Arr(a), Arr(b)) => a == b,
            // Order-insensitive object equality.
            (Obj(a), Obj(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(key, val)| {
                        b.iter().any(|(k, v)| k == key && v == val)
                    })
            }
            _ => false,
        }
    }
}

impl Value {
    /// An empty object, the usual root of a property bag.
    pub fn object() -> Self {
        Value::Obj(Vec::new())
    }

    /// Tag name for diagnostics and type-mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I8(_) => "int8",
            Value::I16(_) => "int16",
            Value::I32(_) => "int32",
            Value::I64(_) => "int64",
            Value::U8(_) => "uint8",
            Value::U16(_) => "uint16",
            Value::U32(_) => "uint32",
            Value::U64(_) => "uint64",
            Value::F32(_) => "float32",
            Value::F64(_) => "float64",
            Value::Str(_) => "string",
            Value::Buf(_) => "buf",
            Value::Ptr(_) => "ptr",
            Value::Arr(_) => "array",
            Value::Obj(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Obj(_))
    }

    // ------------------------------------------------------------------
    // Exact numeric views
    // ------------------------------------------------------------------

    fn as_i64_exact(&self) -> Option<i64> {
        match *self {
            Value::I8(v) => Some(v as i64),
            Value::I16(v) => Some(v as i64),
            Value::I32(v) => Some(v as i64),
            Value::I64(v) => Some(v),
            Value::U8(v) => Some(v as i64),
            Value::U16(v) => Some(v as i64),
            Value::U32(v) => Some(v as i64),
            Value::U64(v) => i64::try_from(v).ok(),
            Value::F32(v) => float_to_i64(v as f64),
            Value::F64(v) => float_to_i64(v),
            _ => None,
        }
    }

    fn as_u64_exact(&self) -> Option<u64> {
        match *self {
            Value::U8(v) => Some(v as u64),
            Value::U16(v) => Some(v as u64),
            Value::U32(v) => Some(v as u64),
            Value::U64(v) => Some(v),
            Value::I8(v) => u64::try_from(v).ok(),
            Value::I16(v) => u64::try_from(v).ok(),
            Value::I32(v) => u64::try_from(v).ok(),
            Value::I64(v) => u64::try_from(v).ok(),
            Value::F32(v) => float_to_u64(v as f64),
            Value::F64(v) => float_to_u64(v),
            _ => None,
        }
    }

    fn mismatch(&self, wanted: &str) -> Error {
        Error::TypeMismatch(format!(
            "cannot read {} as {wanted}",
            self.type_name()
        ))
    }

    pub fn get_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn get_i8(&self) -> Result<i8> {
        self.as_i64_exact()
            .and_then(|v| i8::try_from(v).ok())
            .ok_or_else(|| self.mismatch("int8"))
    }

    pub fn get_i16(&self) -> Result<i16> {
        self.as_i64_exact()
            .and_then(|v| i16::try_from(v).ok())
            .ok_or_else(|| self.mismatch("int16"))
    }

    pub fn get_i32(&self) -> Result<i32> {
        self.as_i64_exact()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| self.mismatch("int32"))
    }

    pub fn get_i64(&self) -> Result<i64> {
        self.as_i64_exact().ok_or_else(|| self.mismatch("int64"))
    }

    pub fn get_u8(&self) -> Result<u8> {
        self.as_u64_exact()
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(|| self.mismatch("uint8"))
    }

    pub fn get_u16(&self) -> Result<u16> {
        self.as_u64_exact()
            .and_then(|v| u16::try_from(v).ok())
            .ok_or_else(|| self.mismatch("uint16"))
    }

    pub fn get_u32(&self) -> Result<u32> {
        self.as_u64_exact()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| self.mismatch("uint32"))
    }

    pub fn get_u64(&self) -> Result<u64> {
        self.as_u64_exact().ok_or_else(|| self.mismatch("uint64"))
    }

    pub fn get_f32(&self) -> Result<f32> {
        match *self {
            Value::F32(v) => Ok(v),
            Value::F64(v) => {
                let narrowed = v as f32;
                if narrowed as f64 == v {
                    Ok(narrowed)
                } else {
                    Err(self.mismatch("float32"))
                }
            }
            _ => {
                // Integers widen to f32 only when they survive the round trip.
                if let Some(v) = self.as_i64_exact() {
                    let widened = v as f32;
                    if widened as i64 == v {
                        return Ok(widened);
                    }
                }
                Err(self.mismatch("float32"))
            }
        }
    }

    pub fn get_f64(&self) -> Result<f64> {
        match *self {
            Value::F32(v) => Ok(v as f64),
            Value::F64(v) => Ok(v),
            _ => {
                if let Some(v) = self.as_i64_exact() {
                    let widened = v as f64;
                    if widened as i64 == v {
                        return Ok(widened);
                    }
                }
                if let Some(v) = self.as_u64_exact() {
                    let widened = v as f64;
                    if widened as u64 == v {
                        return Ok(widened);
                    }
                }
                Err(self.mismatch("float64"))
            }
        }
    }

    pub fn get_str(&self) -> Result<&str> {
        match self {
            Value::Str(v) => Ok(v),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn get_buf(&self) -> Result<&Bytes> {
        match self {
            Value::Buf(v) => Ok(v),
            other => Err(other.mismatch("buf")),
        }
    }

    pub fn get_ptr(&self) -> Result<&PtrValue> {
        match self {
            Value::Ptr(v) => Ok(v),
            other => Err(other.mismatch("ptr")),
        }
    }

    // ------------------------------------------------------------------
    // Path-addressed access
    // ------------------------------------------------------------------

    /// Read the value at `path`, or `None` when any segment is absent.
    pub fn get_path(&self, path: &str) -> Result<Option<&Value>> {
        let segs = parse_path(path)?;
        let mut cur = self;
        for seg in &segs {
            match (seg, cur) {
                (PathSeg::Field(name), Value::Obj(fields)) => {
                    match fields.iter().find(|(k, _)| k == name) {
                        Some((_, v)) => cur = v,
                        None => return Ok(None),
                    }
                }
                (PathSeg::Index(idx), Value::Arr(items)) => match items.get(*idx) {
                    Some(v) => cur = v,
                    None => return Ok(None),
                },
                _ => return Ok(None),
            }
        }
        Ok(Some(cur))
    }

    /// Write `value` at `path`, creating intermediate objects and arrays.
    ///
    /// Arrays auto-extend with `Null` fill when the index is past the end.
    /// Writing through an existing non-container value fails with
    /// `TypeMismatch`.
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<()> {
        let segs = parse_path(path)?;
        let mut cur = self;
        for (pos, seg) in segs.iter().enumerate() {
            let last = pos + 1 == segs.len();
            match seg {
                PathSeg::Field(name) => {
                    if cur.is_null() {
                        *cur = Value::object();
                    }
                    let tag = cur.type_name();
                    let Value::Obj(fields) = cur else {
                        return Err(Error::TypeMismatch(format!(
                            "segment '{name}' of '{path}' traverses a {tag}"
                        )));
                    };
                    let found = fields.iter().position(|(k, _)| k == name);
                    let slot = match found {
                        Some(i) => i,
                        None => {
                            fields.push((name.clone(), Value::Null));
                            fields.len() - 1
                        }
                    };
                    if last {
                        fields[slot].1 = value;
                        return Ok(());
                    }
                    cur = &mut fields[slot].1;
                }
                PathSeg::Index(idx) => {
                    if cur.is_null() {
                        *cur = Value::Arr(Vec::new());
                    }
                    let tag = cur.type_name();
                    let Value::Arr(items) = cur else {
                        return Err(Error::TypeMismatch(format!(
                            "segment '[{idx}]' of '{path}' traverses a {tag}"
                        )));
                    };
                    if items.len() <= *idx {
                        items.resize(*idx + 1, Value::Null);
                    }
                    if last {
                        items[*idx] = value;
                        return Ok(());
                    }
                    cur = &mut items[*idx];
                }
            }
        }
        unreachable!("parse_path returns at least one segment")
    }

    /// Remove the value at `path`, returning it if it was present.
    pub fn remove_path(&mut self, path: &str) -> Result<Option<Value>> {
        let segs = parse_path(path)?;
        let Some((last, parents)) = segs.split_last() else {
            return Ok(None);
        };
        let mut cur = self;
        for seg in parents {
            match (seg, cur) {
                (PathSeg::Field(name), Value::Obj(fields)) => {
                    match fields.iter_mut().find(|(k, _)| k == name) {
                        Some((_, v)) => cur = v,
                        None => return Ok(None),
                    }
                }
                (PathSeg::Index(idx), Value::Arr(items)) => match items.get_mut(*idx) {
                    Some(v) => cur = v,
                    None => return Ok(None),
                },
                _ => return Ok(None),
            }
        }
        match (last, cur) {
            (PathSeg::Field(name), Value::Obj(fields)) => {
                match fields.iter().position(|(k, _)| k == name) {
                    Some(i) => Ok(Some(fields.remove(i).1)),
                    None => Ok(None),
                }
            }
            (PathSeg::Index(idx), Value::Arr(items)) => {
                if *idx < items.len() {
                    Ok(Some(std::mem::take(&mut items[*idx])))
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }
}

fn float_to_i64(v: f64) -> Option<i64> {
    if v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

fn float_to_u64(v: f64) -> Option<u64> {
    if v.is_finite() && v.fract() == 0.0 && v >= 0.0 && v < u64::MAX as f64 {
        Some(v as u64)
    } else {
        None
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::I8(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::I16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::U8(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::U16(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Buf(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Arr(v)
    }
}
