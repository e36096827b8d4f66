//! Indexed attribute types and their key encodings.
//!
//! Keys are stored as raw fixed-width bytes. Only [`AttrType::compare`]
//! interprets them.

use std::cmp::Ordering;

use crate::index::IndexError;

/// Widest string attribute that can be indexed.
pub const MAX_STRING_LEN: usize = 1024;

/// Attribute type tag, stored on disk as `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum AttrType {
    /// 4-byte little-endian signed integer.
    Int = 1,
    /// 4-byte little-endian IEEE float.
    Float = 2,
    /// Fixed-width byte string, NUL-padded.
    String = 3,
}

impl TryFrom<i32> for AttrType {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Int),
            2 => Ok(Self::Float),
            3 => Ok(Self::String),
            _ => Err(value),
        }
    }
}

impl std::fmt::Display for AttrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::String => write!(f, "string"),
        }
    }
}

fn le_bytes(bytes: &[u8]) -> [u8; 4] {
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

/// Bytes before the first NUL.
fn until_nul(bytes: &[u8]) -> &[u8] {
    bytes
        .iter()
        .position(|&b| b == 0)
        .map_or(bytes, |end| &bytes[..end])
}

impl AttrType {
    /// Order two encoded keys.
    ///
    /// Integers and floats compare numerically (floats by IEEE total order);
    /// strings compare byte-wise up to the first NUL.
    #[must_use]
    pub fn compare(self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            Self::Int => i32::from_le_bytes(le_bytes(a)).cmp(&i32::from_le_bytes(le_bytes(b))),
            Self::Float => {
                f32::from_le_bytes(le_bytes(a)).total_cmp(&f32::from_le_bytes(le_bytes(b)))
            }
            Self::String => until_nul(a).cmp(until_nul(b)),
        }
    }
}

/// The indexed attribute: type plus fixed key width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    attr_type: AttrType,
    length: usize,
}

impl Attribute {
    /// Validate a type/width pair.
    ///
    /// Integers and floats must be 4 bytes wide; strings 1 to
    /// [`MAX_STRING_LEN`] bytes.
    pub fn new(attr_type: AttrType, length: usize) -> Result<Self, IndexError> {
        let valid = match attr_type {
            AttrType::Int | AttrType::Float => length == 4,
            AttrType::String => (1..=MAX_STRING_LEN).contains(&length),
        };
        if !valid {
            return Err(IndexError::InvalidAttribute { attr_type, length });
        }
        Ok(Self { attr_type, length })
    }

    #[must_use]
    pub const fn attr_type(self) -> AttrType {
        self.attr_type
    }

    /// Key width in bytes.
    #[must_use]
    pub const fn length(self) -> usize {
        self.length
    }

    #[must_use]
    pub fn compare(self, a: &[u8], b: &[u8]) -> Ordering {
        self.attr_type.compare(a, b)
    }

    /// Reject keys of the wrong width.
    pub const fn check_key(self, key: &[u8]) -> Result<(), IndexError> {
        if key.len() == self.length {
            Ok(())
        } else {
            Err(IndexError::BadKey {
                expected: self.length,
                actual: key.len(),
            })
        }
    }
}

/// A typed key value, for building and printing keys.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i32),
    Float(f32),
    Str(String),
}

impl AttrValue {
    /// Encode to the attribute's fixed width. Strings are NUL-padded.
    pub fn encode(&self, attr: Attribute) -> Result<Vec<u8>, IndexError> {
        match (self, attr.attr_type()) {
            (Self::Int(v), AttrType::Int) => Ok(v.to_le_bytes().to_vec()),
            (Self::Float(v), AttrType::Float) => Ok(v.to_le_bytes().to_vec()),
            (Self::Str(s), AttrType::String) => {
                if s.len() > attr.length() {
                    return Err(IndexError::BadKey {
                        expected: attr.length(),
                        actual: s.len(),
                    });
                }
                let mut key = vec![0u8; attr.length()];
                key[..s.len()].copy_from_slice(s.as_bytes());
                Ok(key)
            }
            (_, expected) => Err(IndexError::TypeMismatch {
                expected,
                value: self.clone(),
            }),
        }
    }

    /// Decode a stored key.
    #[must_use]
    pub fn decode(attr_type: AttrType, key: &[u8]) -> Self {
        match attr_type {
            AttrType::Int => Self::Int(i32::from_le_bytes(le_bytes(key))),
            AttrType::Float => Self::Float(f32::from_le_bytes(le_bytes(key))),
            AttrType::String => Self::Str(String::from_utf8_lossy(until_nul(key)).into_owned()),
        }
    }
}

impl std::fmt::Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_validation() {
        assert!(Attribute::new(AttrType::Int, 4).is_ok());
        assert!(Attribute::new(AttrType::Float, 4).is_ok());
        assert!(Attribute::new(AttrType::String, 1).is_ok());
        assert!(Attribute::new(AttrType::String, MAX_STRING_LEN).is_ok());

        assert!(matches!(
            Attribute::new(AttrType::Int, 8),
            Err(IndexError::InvalidAttribute { length: 8, .. })
        ));
        assert!(Attribute::new(AttrType::String, 0).is_err());
        assert!(Attribute::new(AttrType::String, MAX_STRING_LEN + 1).is_err());
    }

    #[test]
    fn test_attr_type_tags() {
        assert_eq!(AttrType::try_from(1), Ok(AttrType::Int));
        assert_eq!(AttrType::try_from(3), Ok(AttrType::String));
        assert_eq!(AttrType::try_from(9), Err(9));
        assert_eq!(AttrType::Float as i32, 2);
    }

    #[test]
    fn test_int_compare_is_numeric() {
        let a = (-5i32).to_le_bytes();
        let b = 3i32.to_le_bytes();
        assert_eq!(AttrType::Int.compare(&a, &b), Ordering::Less);
        assert_eq!(AttrType::Int.compare(&b, &a), Ordering::Greater);
        assert_eq!(AttrType::Int.compare(&b, &b), Ordering::Equal);
    }

    #[test]
    fn test_float_compare() {
        let a = 1.5f32.to_le_bytes();
        let b = (-2.25f32).to_le_bytes();
        assert_eq!(AttrType::Float.compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn test_string_compare_stops_at_nul() {
        let attr = Attribute::new(AttrType::String, 6).expect("valid");
        let abc = AttrValue::Str("abc".into()).encode(attr).expect("encode");
        let mut abc_junk = abc.clone();
        abc_junk[4] = b'z';
        let abd = AttrValue::Str("abd".into()).encode(attr).expect("encode");

        assert_eq!(attr.compare(&abc, &abc_junk), Ordering::Equal);
        assert_eq!(attr.compare(&abc, &abd), Ordering::Less);
        assert_eq!(
            AttrType::String.compare(b"ab\0", b"abc"),
            Ordering::Less
        );
    }

    #[test]
    fn test_encode_errors() {
        let int = Attribute::new(AttrType::Int, 4).expect("valid");
        assert!(matches!(
            AttrValue::Float(1.0).encode(int),
            Err(IndexError::TypeMismatch {
                expected: AttrType::Int,
                ..
            })
        ));

        let short = Attribute::new(AttrType::String, 2).expect("valid");
        assert!(matches!(
            AttrValue::Str("long".into()).encode(short),
            Err(IndexError::BadKey {
                expected: 2,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_decode_and_display() {
        let key = 42i32.to_le_bytes();
        assert_eq!(AttrValue::decode(AttrType::Int, &key).to_string(), "42");
        assert_eq!(
            AttrValue::decode(AttrType::String, b"hi\0\0").to_string(),
            "\"hi\""
        );
    }

    #[test]
    fn test_check_key_width() {
        let attr = Attribute::new(AttrType::Int, 4).expect("valid");
        assert!(attr.check_key(&[0; 4]).is_ok());
        assert!(matches!(
            attr.check_key(&[0; 3]),
            Err(IndexError::BadKey {
                expected: 4,
                actual: 3
            })
        ));
    }
}
