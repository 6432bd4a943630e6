//! `serde::Serializer` that builds a raw [`CanonicalValue`] tree
//!
//! Serializing straight into the canonical tree (instead of going through
//! `serde_json::Value`) keeps inputs that JSON cannot represent:
//! - map keys of any type become their canonical text
//! - NaN and infinities stay distinct numbers instead of collapsing to null
//! - a subvalue whose `Serialize` impl fails becomes `Opaque` on its own,
//!   its siblings are still canonicalized
//!
//! The produced tree is raw: sequences keep their order and mappings keep
//! null values and every field. [`CanonicalValue::normalize`] finishes the job.

use crate::cache::key::{CanonicalValue, Scalar};
use serde::ser::{self, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Failure reported by a value's own `Serialize` impl
#[derive(Error, Debug)]
#[error("{0}")]
pub(crate) struct CanonicalError(String);

impl ser::Error for CanonicalError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        CanonicalError(msg.to_string())
    }
}

type Result<T> = std::result::Result<T, CanonicalError>;

/// Serialize `value` into a raw canonical tree
pub(crate) fn to_canonical<T>(value: &T) -> Result<CanonicalValue>
where
    T: Serialize + ?Sized,
{
    value.serialize(CanonicalSerializer)
}

/// Serialize a nested value, degrading only that value to `Opaque` on failure
fn nested<T>(value: &T) -> CanonicalValue
where
    T: Serialize + ?Sized,
{
    to_canonical(value).unwrap_or_else(|err| opaque::<T>(&err))
}

pub(crate) fn opaque<T: ?Sized>(err: &CanonicalError) -> CanonicalValue {
    CanonicalValue::Opaque(format!("{}: {}", std::any::type_name::<T>(), err))
}

/// Text used when a non-string value is a mapping key. Order is preserved:
/// `(2026, 1)` and `(1, 2026)` are different keys.
fn key_text(key: CanonicalValue) -> String {
    match key {
        CanonicalValue::Scalar(Scalar::Text(text)) => text,
        other => other.encoded(),
    }
}

fn number(text: impl Into<String>) -> CanonicalValue {
    CanonicalValue::Scalar(Scalar::Number(text.into()))
}

fn float(v: f64) -> CanonicalValue {
    // Same textual form serde_json gives finite floats
    match serde_json::Number::from_f64(v) {
        Some(n) => number(n.to_string()),
        None if v.is_nan() => number("NaN"),
        None if v.is_sign_positive() => number("inf"),
        None => number("-inf"),
    }
}

struct CanonicalSerializer;

impl ser::Serializer for CanonicalSerializer {
    type Ok = CanonicalValue;
    type Error = CanonicalError;

    type SerializeSeq = SeqBuilder;
    type SerializeTuple = SeqBuilder;
    type SerializeTupleStruct = SeqBuilder;
    type SerializeTupleVariant = VariantBuilder<SeqBuilder>;
    type SerializeMap = MapBuilder;
    type SerializeStruct = MapBuilder;
    type SerializeStructVariant = VariantBuilder<MapBuilder>;

    fn serialize_bool(self, v: bool) -> Result<CanonicalValue> {
        Ok(CanonicalValue::Scalar(Scalar::Bool(v)))
    }

    fn serialize_i8(self, v: i8) -> Result<CanonicalValue> {
        Ok(number(v.to_string()))
    }

    fn serialize_i16(self, v: i16) -> Result<CanonicalValue> {
        Ok(number(v.to_string()))
    }

    fn serialize_i32(self, v: i32) -> Result<CanonicalValue> {
        Ok(number(v.to_string()))
    }

    fn serialize_i64(self, v: i64) -> Result<CanonicalValue> {
        Ok(number(v.to_string()))
    }

    fn serialize_i128(self, v: i128) -> Result<CanonicalValue> {
        Ok(number(v.to_string()))
    }

    fn serialize_u8(self, v: u8) -> Result<CanonicalValue> {
        Ok(number(v.to_string()))
    }

    fn serialize_u16(self, v: u16) -> Result<CanonicalValue> {
        Ok(number(v.to_string()))
    }

    fn serialize_u32(self, v: u32) -> Result<CanonicalValue> {
        Ok(number(v.to_string()))
    }

    fn serialize_u64(self, v: u64) -> Result<CanonicalValue> {
        Ok(number(v.to_string()))
    }

    fn serialize_u128(self, v: u128) -> Result<CanonicalValue> {
        Ok(number(v.to_string()))
    }

    fn serialize_f32(self, v: f32) -> Result<CanonicalValue> {
        Ok(float(f64::from(v)))
    }

    fn serialize_f64(self, v: f64) -> Result<CanonicalValue> {
        Ok(float(v))
    }

    fn serialize_char(self, v: char) -> Result<CanonicalValue> {
        Ok(CanonicalValue::Scalar(Scalar::Text(v.to_string())))
    }

    fn serialize_str(self, v: &str) -> Result<CanonicalValue> {
        Ok(CanonicalValue::Scalar(Scalar::Text(v.to_string())))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<CanonicalValue> {
        Ok(CanonicalValue::Sequence(
            v.iter().map(|b| number(b.to_string())).collect(),
        ))
    }

    fn serialize_none(self) -> Result<CanonicalValue> {
        Ok(CanonicalValue::Scalar(Scalar::Null))
    }

    fn serialize_some<T>(self, value: &T) -> Result<CanonicalValue>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<CanonicalValue> {
        Ok(CanonicalValue::Scalar(Scalar::Null))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<CanonicalValue> {
        Ok(CanonicalValue::Scalar(Scalar::Null))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<CanonicalValue> {
        Ok(CanonicalValue::Scalar(Scalar::Text(variant.to_string())))
    }

    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> Result<CanonicalValue>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<CanonicalValue>
    where
        T: Serialize + ?Sized,
    {
        let mut map = BTreeMap::new();
        map.insert(variant.to_string(), nested(value));
        Ok(CanonicalValue::Mapping(map))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqBuilder> {
        Ok(SeqBuilder {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqBuilder> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> Result<SeqBuilder> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantBuilder<SeqBuilder>> {
        Ok(VariantBuilder {
            variant,
            inner: self.serialize_seq(Some(len))?,
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapBuilder> {
        Ok(MapBuilder::default())
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<MapBuilder> {
        Ok(MapBuilder::default())
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<VariantBuilder<MapBuilder>> {
        Ok(VariantBuilder {
            variant,
            inner: MapBuilder::default(),
        })
    }
}

struct SeqBuilder {
    items: Vec<CanonicalValue>,
}

impl SeqBuilder {
    fn push<T: Serialize + ?Sized>(&mut self, value: &T) {
        self.items.push(nested(value));
    }

    fn finish(self) -> CanonicalValue {
        CanonicalValue::Sequence(self.items)
    }
}

impl ser::SerializeSeq for SeqBuilder {
    type Ok = CanonicalValue;
    type Error = CanonicalError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.push(value);
        Ok(())
    }

    fn end(self) -> Result<CanonicalValue> {
        Ok(self.finish())
    }
}

impl ser::SerializeTuple for SeqBuilder {
    type Ok = CanonicalValue;
    type Error = CanonicalError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.push(value);
        Ok(())
    }

    fn end(self) -> Result<CanonicalValue> {
        Ok(self.finish())
    }
}

impl ser::SerializeTupleStruct for SeqBuilder {
    type Ok = CanonicalValue;
    type Error = CanonicalError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.push(value);
        Ok(())
    }

    fn end(self) -> Result<CanonicalValue> {
        Ok(self.finish())
    }
}

#[derive(Default)]
struct MapBuilder {
    entries: BTreeMap<String, CanonicalValue>,
    pending_key: Option<String>,
}

impl MapBuilder {
    fn insert<T: Serialize + ?Sized>(&mut self, key: String, value: &T) {
        self.entries.insert(key, nested(value));
    }

    fn finish(self) -> CanonicalValue {
        CanonicalValue::Mapping(self.entries)
    }
}

impl ser::SerializeMap for MapBuilder {
    type Ok = CanonicalValue;
    type Error = CanonicalError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<()> {
        self.pending_key = Some(key_text(nested(key)));
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| CanonicalError("map value without a key".to_string()))?;
        self.insert(key, value);
        Ok(())
    }

    fn end(self) -> Result<CanonicalValue> {
        Ok(self.finish())
    }
}

impl ser::SerializeStruct for MapBuilder {
    type Ok = CanonicalValue;
    type Error = CanonicalError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, key: &'static str, value: &T) -> Result<()> {
        self.insert(key.to_string(), value);
        Ok(())
    }

    fn end(self) -> Result<CanonicalValue> {
        Ok(self.finish())
    }
}

/// Externally tagged variant: `{variant: inner}`
struct VariantBuilder<B> {
    variant: &'static str,
    inner: B,
}

impl VariantBuilder<SeqBuilder> {
    fn finish(self) -> CanonicalValue {
        let mut map = BTreeMap::new();
        map.insert(self.variant.to_string(), self.inner.finish());
        CanonicalValue::Mapping(map)
    }
}

impl VariantBuilder<MapBuilder> {
    fn finish(self) -> CanonicalValue {
        let mut map = BTreeMap::new();
        map.insert(self.variant.to_string(), self.inner.finish());
        CanonicalValue::Mapping(map)
    }
}

impl ser::SerializeTupleVariant for VariantBuilder<SeqBuilder> {
    type Ok = CanonicalValue;
    type Error = CanonicalError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.inner.push(value);
        Ok(())
    }

    fn end(self) -> Result<CanonicalValue> {
        Ok(self.finish())
    }
}

impl ser::SerializeStructVariant for VariantBuilder<MapBuilder> {
    type Ok = CanonicalValue;
    type Error = CanonicalError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, key: &'static str, value: &T) -> Result<()> {
        self.inner.insert(key.to_string(), value);
        Ok(())
    }

    fn end(self) -> Result<CanonicalValue> {
        Ok(self.finish())
    }
}
