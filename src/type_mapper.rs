//! Remote type tag to generic type mapping.

use crate::client::CmdArgType;
use crate::error::{Result, TransportError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element kind of a remote value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    /// Signed/unsigned integers of any width
    Integer,
    /// Single/double precision floats
    Float,
    /// Booleans (integer-compatible on the wire)
    Bool,
    /// Text
    String,
    /// Encoded/binary blobs, surfaced as a list of strings
    Bytes,
    /// Labelled enumeration
    Enum,
    /// Device state
    State,
    /// No value
    Void,
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScalarKind::Integer => "int",
            ScalarKind::Float => "float",
            ScalarKind::Bool => "bool",
            ScalarKind::String => "str",
            ScalarKind::Bytes => "bytes",
            ScalarKind::Enum => "enum",
            ScalarKind::State => "DevState",
            ScalarKind::Void => "void",
        };
        f.write_str(label)
    }
}

/// Generic dtype label used in descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dtype {
    /// `"integer"`
    Integer,
    /// `"number"`
    Number,
    /// `"string"`
    String,
    /// `"array"`
    Array,
}

impl Dtype {
    /// Label as it appears in a descriptor.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dtype::Integer => "integer",
            Dtype::Number => "number",
            Dtype::String => "string",
            Dtype::Array => "array",
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generic view of a remote type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeInfo {
    /// Whether the tag is array-shaped
    pub is_array: bool,
    /// Per-element kind
    pub kind: ScalarKind,
    /// Descriptor dtype of a scalar of this kind
    pub description: Dtype,
}

impl TypeInfo {
    const fn new(is_array: bool, kind: ScalarKind, description: Dtype) -> Self {
        Self {
            is_array,
            kind,
            description,
        }
    }
}

/// Map a remote type tag to `(is_array, kind, description)`.
///
/// Fails with [`TransportError::UnsupportedType`] for tags with no generic
/// counterpart (mixed long/double-string arrays, pipe blobs, state arrays).
pub fn map_type(tag: CmdArgType) -> Result<TypeInfo> {
    use CmdArgType::*;
    use ScalarKind as K;

    let info = match tag {
        DevShort | DevLong | DevUShort | DevULong | DevLong64 | DevULong64 | DevInt
        | DevUChar => TypeInfo::new(false, K::Integer, Dtype::Integer),
        DevVarShortArray | DevVarLongArray | DevVarUShortArray | DevVarULongArray
        | DevVarLong64Array | DevVarULong64Array => TypeInfo::new(true, K::Integer, Dtype::Integer),

        DevFloat | DevDouble => TypeInfo::new(false, K::Float, Dtype::Number),
        DevVarFloatArray | DevVarDoubleArray => TypeInfo::new(true, K::Float, Dtype::Number),

        DevBoolean => TypeInfo::new(false, K::Bool, Dtype::Integer),
        DevVarBooleanArray => TypeInfo::new(true, K::Bool, Dtype::Integer),

        DevString | ConstDevString => TypeInfo::new(false, K::String, Dtype::String),
        DevVarStringArray => TypeInfo::new(true, K::String, Dtype::String),

        DevEncoded => TypeInfo::new(false, K::Bytes, Dtype::String),
        DevVarCharArray => TypeInfo::new(true, K::Bytes, Dtype::String),

        DevEnum => TypeInfo::new(false, K::Enum, Dtype::String),
        DevState => TypeInfo::new(false, K::State, Dtype::String),
        DevVoid => TypeInfo::new(false, K::Void, Dtype::String),

        DevVarLongStringArray | DevVarDoubleStringArray | DevPipeBlob | DevVarStateArray => {
            return Err(TransportError::UnsupportedType(tag))
        }
    };
    Ok(info)
}
