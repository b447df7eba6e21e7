/*
 *
 *    Copyright (c) 2020-2022 Project CHIP Authors
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! An owned, decoded form of a reported attribute value or event payload.
//!
//! The interaction-model layer hands over values already decoded from TLV;
//! the accumulator only needs to store, compare and print them.

use core::fmt;

/// A decoded TLV element.
///
/// Signed and unsigned integers of all widths collapse into `Int` and `UInt`,
/// and the various string length encodings into `Str` and `Bytes`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// A structure, as (context tag, value) pairs in encoding order
    Struct(Vec<(u8, Value)>),
    Array(Vec<Value>),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Return the value as an unsigned integer, also accepting non-negative signed values.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => Some(*v),
            Self::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Return the member of a structure with the given context tag.
    pub fn field(&self, tag: u8) -> Option<&Value> {
        match self {
            Self::Struct(fields) => fields.iter().find(|(t, _)| *t == tag).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Whether this is a list containing `element`.
    pub fn contains(&self, element: &Value) -> bool {
        self.as_array()
            .map(|elements| elements.iter().any(|e| e == element))
            .unwrap_or(false)
    }

    /// Whether this is a structure carrying every one of `fields`.
    ///
    /// Members not named in `fields` are ignored.
    pub fn has_fields(&self, fields: &[(u8, Value)]) -> bool {
        matches!(self, Self::Struct(_))
            && fields
                .iter()
                .all(|(tag, value)| self.field(*tag) == Some(value))
    }

    /// Whether this is a list with a structure element carrying every one of `fields`.
    pub fn contains_fields(&self, fields: &[(u8, Value)]) -> bool {
        self.as_array()
            .map(|elements| elements.iter().any(|e| e.has_fields(fields)))
            .unwrap_or(false)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Bytes(v) => {
                write!(f, "0x")?;
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Self::Struct(fields) => {
                write!(f, "{{")?;
                for (i, (tag, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{tag}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Array(elements) => {
                write!(f, "[")?;
                for (i, value) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

macro_rules! value_from_int {
    ($variant:ident, $as:ty, $($t:ty),+) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Self::$variant(v as $as)
                }
            }
        )+
    };
}

value_from_int!(UInt, u64, u8, u16, u32, u64);
value_from_int!(Int, i64, i8, i16, i32, i64);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v as _)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        assert_eq!(Value::from(5u8).as_u64(), Some(5));
        assert_eq!(Value::from(5i8).as_u64(), Some(5));
        assert_eq!(Value::from(-5i8).as_u64(), None);
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::from("label").as_str(), Some("label"));
        assert!(Value::from(None::<u8>).is_null());

        let entry = Value::Struct(vec![(0, 1u16.into()), (1, Value::Array(vec![1u16.into()]))]);
        assert_eq!(entry.field(0), Some(&Value::UInt(1)));
        assert!(entry.field(1).unwrap().contains(&Value::UInt(1)));
        assert!(entry.field(2).is_none());
    }

    #[test]
    fn test_partial_struct_match() {
        let entry = Value::Struct(vec![(0, 7u16.into()), (1, "kitchen".into())]);

        assert!(entry.has_fields(&[(0, 7u16.into())]));
        assert!(entry.has_fields(&[(1, "kitchen".into()), (0, 7u16.into())]));
        assert!(!entry.has_fields(&[(0, 8u16.into())]));
        assert!(!entry.has_fields(&[(2, Value::Null)]));
        assert!(!Value::from(7u16).has_fields(&[]));

        let list = Value::Array(vec![Value::Null, entry]);
        assert!(list.contains_fields(&[(1, "kitchen".into())]));
        assert!(!list.contains_fields(&[(1, "hall".into())]));
    }

    #[test]
    fn test_display() {
        let value = Value::Struct(vec![
            (0, Value::Bytes(vec![0xab, 0x01])),
            (1, Value::Array(vec!["a".into(), Value::Null])),
        ]);

        assert_eq!(value.to_string(), r#"{0: 0xab01, 1: ["a", null]}"#);
    }
}
