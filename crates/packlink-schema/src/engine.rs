//! Schema-driven codec over dynamic values.
//!
//! The engine walks a [`Message`](crate::model::Message) definition and writes
//! or reads each field with the primitives in [`packlink_codec::wire`], the same
//! ones generated code calls. It is the reference encoding that generated
//! serializers are checked against.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use packlink_codec::{wire, Bitfield, CodecError, Result, WireReader};

use crate::context::ParseContext;
use crate::model::{Field, FieldType, Name};

/// A dynamically typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Raw enum byte.
    Enum(u8),
    Message(Record),
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    String => String,
    Vec<u8> => Bytes,
    Record => Message,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl Value {
    /// Build a [`Value::List`] from anything convertible into values.
    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

/// Field values of one message instance. An absent optional field is a
/// missing key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Encodes and decodes [`Record`]s for messages of a parsed context.
#[derive(Debug, Clone, Copy)]
pub struct Engine<'a> {
    ctx: &'a ParseContext,
}

impl<'a> Engine<'a> {
    pub fn new(ctx: &'a ParseContext) -> Self {
        Self { ctx }
    }

    /// Encode `record` as the message `message`.
    pub fn encode(&self, message: &Name, record: &Record) -> Result<Bytes> {
        let mut dst = BytesMut::new();
        self.encode_into(message, record, &mut dst)?;
        Ok(dst.freeze())
    }

    pub fn encode_into(&self, message: &Name, record: &Record, dst: &mut BytesMut) -> Result<()> {
        let definition = self.ctx.message(message).ok_or_else(|| unresolved(message))?;

        let mut presence = Bitfield::new(definition.optional_count());
        for (index, field) in definition.fields.iter().filter(|f| f.optional).enumerate() {
            presence.set(index, record.get(&field.name).is_some());
        }
        presence.write(dst);

        for field in &definition.fields {
            match record.get(&field.name) {
                Some(value) => self.encode_field(field, value, dst)?,
                None if field.optional => {}
                None => {
                    return Err(CodecError::MissingField {
                        field: field.name.clone(),
                    })
                }
            }
        }
        Ok(())
    }

    fn encode_field(&self, field: &Field, value: &Value, dst: &mut BytesMut) -> Result<()> {
        match (field.ty, value) {
            (FieldType::List, Value::List(items)) => {
                let element = field.value_type();
                wire::put_len(dst, items.len())?;
                for item in items {
                    self.encode_value(field, element, item, dst)?;
                }
                Ok(())
            }
            (FieldType::List, _) => Err(mismatch(field, "list")),
            (ty, value) => self.encode_value(field, ty, value, dst),
        }
    }

    fn encode_value(
        &self,
        field: &Field,
        ty: FieldType,
        value: &Value,
        dst: &mut BytesMut,
    ) -> Result<()> {
        match (ty, value) {
            (FieldType::Bool, Value::Bool(v)) => wire::put_bool(dst, *v),
            (FieldType::U8, Value::U8(v)) => wire::put_u8(dst, *v),
            (FieldType::U16, Value::U16(v)) => wire::put_u16(dst, *v),
            (FieldType::U32, Value::U32(v)) => wire::put_u32(dst, *v),
            (FieldType::U64, Value::U64(v)) => wire::put_u64(dst, *v),
            (FieldType::I8, Value::I8(v)) => wire::put_i8(dst, *v),
            (FieldType::I16, Value::I16(v)) => wire::put_i16(dst, *v),
            (FieldType::I32, Value::I32(v)) => wire::put_i32(dst, *v),
            (FieldType::I64, Value::I64(v)) => wire::put_i64(dst, *v),
            (FieldType::F32, Value::F32(v)) => wire::put_f32(dst, *v),
            (FieldType::F64, Value::F64(v)) => wire::put_f64(dst, *v),
            (FieldType::String, Value::String(v)) => wire::put_str(dst, v)?,
            (FieldType::Bytes, Value::Bytes(v)) => wire::put_bytes(dst, v)?,
            (FieldType::Enum, Value::Enum(v)) => {
                let reference = reference_of(field)?;
                let definition = self
                    .ctx
                    .enumeration(reference)
                    .ok_or_else(|| unresolved(reference))?;
                if !definition.contains(*v) {
                    return Err(CodecError::invalid_enum(&definition.name, *v));
                }
                wire::put_u8(dst, *v);
            }
            (FieldType::Message, Value::Message(record)) => {
                self.encode_into(reference_of(field)?, record, dst)?;
            }
            (ty, _) => return Err(mismatch(field, ty.keyword())),
        }
        Ok(())
    }

    /// Decode a message from the front of `buf`, returning the record and the
    /// number of bytes consumed.
    pub fn decode(&self, message: &Name, buf: &[u8]) -> Result<(Record, usize)> {
        let mut reader = WireReader::new(buf);
        let record = self.decode_from(message, &mut reader)?;
        Ok((record, reader.position()))
    }

    /// Decode a message that must fill `buf` exactly.
    pub fn decode_exact(&self, message: &Name, buf: &[u8]) -> Result<Record> {
        let mut reader = WireReader::new(buf);
        let record = self.decode_from(message, &mut reader)?;
        reader.finish()?;
        Ok(record)
    }

    pub fn decode_from(&self, message: &Name, reader: &mut WireReader<'_>) -> Result<Record> {
        let definition = self.ctx.message(message).ok_or_else(|| unresolved(message))?;
        let presence = Bitfield::read(reader, definition.optional_count())?;

        let mut record = Record::new();
        let mut optional_index = 0;
        for field in &definition.fields {
            if field.optional {
                let present = presence.is_set(optional_index);
                optional_index += 1;
                if !present {
                    continue;
                }
            }
            let value = self.decode_field(field, reader)?;
            record.insert(field.name.clone(), value);
        }
        Ok(record)
    }

    fn decode_field(&self, field: &Field, reader: &mut WireReader<'_>) -> Result<Value> {
        if field.ty == FieldType::List {
            let element = field.value_type();
            let count = reader.len_prefix()?;
            let mut items = Vec::with_capacity(count.min(reader.remaining()));
            for _ in 0..count {
                items.push(self.decode_value(field, element, reader)?);
            }
            return Ok(Value::List(items));
        }
        self.decode_value(field, field.ty, reader)
    }

    fn decode_value(
        &self,
        field: &Field,
        ty: FieldType,
        reader: &mut WireReader<'_>,
    ) -> Result<Value> {
        let value = match ty {
            FieldType::Bool => Value::Bool(reader.bool()?),
            FieldType::U8 => Value::U8(reader.u8()?),
            FieldType::U16 => Value::U16(reader.u16()?),
            FieldType::U32 => Value::U32(reader.u32()?),
            FieldType::U64 => Value::U64(reader.u64()?),
            FieldType::I8 => Value::I8(reader.i8()?),
            FieldType::I16 => Value::I16(reader.i16()?),
            FieldType::I32 => Value::I32(reader.i32()?),
            FieldType::I64 => Value::I64(reader.i64()?),
            FieldType::F32 => Value::F32(reader.f32()?),
            FieldType::F64 => Value::F64(reader.f64()?),
            FieldType::String => Value::String(reader.string()?),
            FieldType::Bytes => Value::Bytes(reader.bytes()?),
            FieldType::Enum => {
                let reference = reference_of(field)?;
                let definition = self
                    .ctx
                    .enumeration(reference)
                    .ok_or_else(|| unresolved(reference))?;
                let raw = reader.u8()?;
                if !definition.contains(raw) {
                    return Err(CodecError::invalid_enum(&definition.name, raw));
                }
                Value::Enum(raw)
            }
            FieldType::Message => Value::Message(self.decode_from(reference_of(field)?, reader)?),
            FieldType::List => return Err(mismatch(field, "non-list element")),
        };
        Ok(value)
    }
}

fn reference_of(field: &Field) -> Result<&Name> {
    field.reference.as_ref().ok_or_else(|| CodecError::Unresolved {
        name: field.name.clone(),
    })
}

fn unresolved(name: &Name) -> CodecError {
    CodecError::Unresolved {
        name: name.qualified(),
    }
}

fn mismatch(field: &Field, expected: &str) -> CodecError {
    CodecError::TypeMismatch {
        field: field.name.clone(),
        expected: expected.to_string(),
    }
}
