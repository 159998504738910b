//! Reads the name and field list of a `Serialize` struct without encoding
//! any of its values.
//!
//! Fields serde skips entirely (`#[serde(skip)]`) never reach the serializer
//! and are therefore not reported. Fields skipped conditionally
//! (`skip_serializing_if`) are still reported through `skip_field`.

use serde::Serialize;
use serde::ser::{self, Impossible, SerializeStruct};
use thiserror::Error;

/// Name and serialized field keys of a struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelShape {
    pub name: &'static str,
    pub fields: Vec<&'static str>
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ShapeError(String);

impl ShapeError {
    fn not_a_struct(kind: &str) -> Self {
        Self(format!("expected a struct with named fields, found {kind}"))
    }
}

impl ser::Error for ShapeError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Self(msg.to_string())
    }
}

pub fn describe<T: Serialize + ?Sized>(value: &T) -> Result<ModelShape, ShapeError> {
    value.serialize(ShapeSerializer)
}

struct ShapeSerializer;

pub struct StructShape {
    name: &'static str,
    fields: Vec<&'static str>
}

macro_rules! reject_primitives {
    ($($method:ident($ty:ty)),* $(,)?) => {
        $(
            fn $method(self, _value: $ty) -> Result<Self::Ok, Self::Error> {
                Err(ShapeError::not_a_struct(stringify!($ty)))
            }
        )*
    };
}

impl ser::Serializer for ShapeSerializer {
    type Ok = ModelShape;
    type Error = ShapeError;
    type SerializeSeq = Impossible<ModelShape, ShapeError>;
    type SerializeTuple = Impossible<ModelShape, ShapeError>;
    type SerializeTupleStruct = Impossible<ModelShape, ShapeError>;
    type SerializeTupleVariant = Impossible<ModelShape, ShapeError>;
    type SerializeMap = Impossible<ModelShape, ShapeError>;
    type SerializeStruct = StructShape;
    type SerializeStructVariant = Impossible<ModelShape, ShapeError>;

    reject_primitives!(
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_f32(f32),
        serialize_f64(f64),
        serialize_char(char),
        serialize_str(&str),
        serialize_bytes(&[u8]),
    );

    fn serialize_none(self) -> Result<Self::Ok, Self::Error> {
        Err(ShapeError::not_a_struct("None"))
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Self::Ok, Self::Error> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Self::Ok, Self::Error> {
        Err(ShapeError::not_a_struct("()"))
    }

    fn serialize_unit_struct(self, name: &'static str) -> Result<Self::Ok, Self::Error> {
        Err(ShapeError::not_a_struct(&format!("unit struct {name}")))
    }

    fn serialize_unit_variant(
        self,
        name: &'static str,
        _variant_index: u32,
        _variant: &'static str
    ) -> Result<Self::Ok, Self::Error> {
        Err(ShapeError::not_a_struct(&format!("enum {name}")))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        _value: &T
    ) -> Result<Self::Ok, Self::Error> {
        Err(ShapeError::not_a_struct(&format!("newtype {name}")))
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T
    ) -> Result<Self::Ok, Self::Error> {
        Err(ShapeError::not_a_struct(&format!("enum {name}")))
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, Self::Error> {
        Err(ShapeError::not_a_struct("a sequence"))
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, Self::Error> {
        Err(ShapeError::not_a_struct("a tuple"))
    }

    fn serialize_tuple_struct(
        self,
        name: &'static str,
        _len: usize
    ) -> Result<Self::SerializeTupleStruct, Self::Error> {
        Err(ShapeError::not_a_struct(&format!("tuple struct {name}")))
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize
    ) -> Result<Self::SerializeTupleVariant, Self::Error> {
        Err(ShapeError::not_a_struct(&format!("enum {name}")))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, Self::Error> {
        Err(ShapeError::not_a_struct(
            "a map (flattened structs are not supported)"
        ))
    }

    fn serialize_struct(
        self,
        name: &'static str,
        len: usize
    ) -> Result<Self::SerializeStruct, Self::Error> {
        Ok(StructShape {
            name,
            fields: Vec::with_capacity(len)
        })
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize
    ) -> Result<Self::SerializeStructVariant, Self::Error> {
        Err(ShapeError::not_a_struct(&format!("enum {name}")))
    }
}

impl SerializeStruct for StructShape {
    type Ok = ModelShape;
    type Error = ShapeError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        _value: &T
    ) -> Result<(), Self::Error> {
        self.fields.push(key);
        Ok(())
    }

    fn skip_field(&mut self, key: &'static str) -> Result<(), Self::Error> {
        self.fields.push(key);
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(ModelShape {
            name: self.name,
            fields: self.fields
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Order {
        id: i64,
        #[serde(rename = "customer")]
        customer_id: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
        #[serde(skip)]
        cached_total: f64
    }

    #[test]
    fn test_describe_struct() {
        let order = Order {
            id: 1,
            customer_id: 2,
            note: None,
            cached_total: 0.0
        };
        let shape = describe(&order).unwrap();
        assert_eq!(shape.name, "Order");
        assert_eq!(shape.fields, vec!["id", "customer", "note"]);
    }

    #[test]
    fn test_describe_through_option() {
        let order = Some(Order {
            id: 1,
            customer_id: 2,
            note: Some("x".to_string()),
            cached_total: 0.0
        });
        assert_eq!(describe(&order).unwrap().name, "Order");
    }

    #[test]
    fn test_describe_rejects_non_structs() {
        assert!(describe(&42_i32).is_err());
        assert!(describe("text").is_err());
        assert!(describe(&vec![1, 2]).is_err());

        #[derive(Serialize)]
        struct Wrapper(i64);
        let err = describe(&Wrapper(1)).unwrap_err();
        assert!(err.to_string().contains("newtype Wrapper"));
    }
}
