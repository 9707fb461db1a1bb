//! Generic descriptor inference from endpoint metadata.
//!
//! A transport may hold two endpoints (read side and write side). Both
//! configs are mapped through [`map_type`] and must agree on format, element
//! kind and dtype before a single [`Descriptor`] is produced. The first
//! config supplies the dimension bounds and enumeration labels.
//!
//! Shapes are row-major: an image of `max_dim_y` rows by `max_dim_x` columns
//! is described as `[max_dim_y, max_dim_x]`. Commands carry no dimension
//! metadata, so an array-valued command is described with a single
//! [`UNBOUNDED_DIM`] axis.

use crate::client::{AttrDataFormat, AttributeInfo, CmdArgType, CommandInfo, DevState};
use crate::error::{Result, TransportError};
use crate::type_mapper::{map_type, Dtype, ScalarKind, TypeInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Axis length used for arrays whose bound the server does not declare.
pub const UNBOUNDED_DIM: usize = usize::MAX;

/// Shape/dtype/choices description of one logical value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Read-side locator
    pub source: String,
    /// Generic dtype
    pub dtype: Dtype,
    /// Axis lengths, empty for scalars
    pub shape: Vec<usize>,
    /// Allowed values of enumerations and states, empty otherwise
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
}

/// Metadata fetched once from an endpoint at connect time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndpointConfig {
    /// Attribute metadata
    Attribute(AttributeInfo),
    /// Command metadata
    Command(CommandInfo),
}

impl EndpointConfig {
    /// Member name the config was fetched for.
    pub fn name(&self) -> &str {
        match self {
            EndpointConfig::Attribute(info) => &info.name,
            EndpointConfig::Command(info) => &info.cmd_name,
        }
    }
}

/// Caller-side expectation of the value type, checked against the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedType {
    /// Any integer width
    Integer,
    /// Any float width
    Float,
    /// Boolean
    Bool,
    /// Text
    String,
    /// Encoded/binary data
    Bytes,
    /// Enumeration with exactly these labels (order-insensitive)
    Enum(Vec<String>),
    /// Device state
    State,
    /// Array of the inner type; nest twice for images
    Array(Box<ExpectedType>),
}

impl ExpectedType {
    /// Shorthand for `Array(Box::new(inner))`.
    pub fn array_of(inner: ExpectedType) -> Self {
        ExpectedType::Array(Box::new(inner))
    }

    /// Number of array levels wrapping the element type.
    pub fn depth(&self) -> usize {
        match self {
            ExpectedType::Array(inner) => 1 + inner.depth(),
            _ => 0,
        }
    }

    /// Innermost element type.
    pub fn element(&self) -> &ExpectedType {
        match self {
            ExpectedType::Array(inner) => inner.element(),
            other => other,
        }
    }

    fn accepts(&self, kind: ScalarKind) -> bool {
        matches!(
            (self, kind),
            (ExpectedType::Integer, ScalarKind::Integer | ScalarKind::Bool)
                | (ExpectedType::Float, ScalarKind::Float)
                | (ExpectedType::Bool, ScalarKind::Bool)
                | (ExpectedType::String, ScalarKind::String)
                | (ExpectedType::Bytes, ScalarKind::Bytes)
                | (ExpectedType::Enum(_), ScalarKind::Enum | ScalarKind::State)
                | (ExpectedType::State, ScalarKind::State)
        )
    }
}

impl fmt::Display for ExpectedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedType::Integer => f.write_str("int"),
            ExpectedType::Float => f.write_str("float"),
            ExpectedType::Bool => f.write_str("bool"),
            ExpectedType::String => f.write_str("str"),
            ExpectedType::Bytes => f.write_str("bytes"),
            ExpectedType::Enum(labels) => write!(f, "enum{:?}", labels),
            ExpectedType::State => f.write_str("DevState"),
            ExpectedType::Array(inner) => write!(f, "array[{}]", inner),
        }
    }
}

/// Per-config inference result.
#[derive(Debug, Clone, PartialEq)]
struct Inferred {
    format: AttrDataFormat,
    info: TypeInfo,
    is_command: bool,
    max_x: usize,
    max_y: usize,
    labels: Vec<String>,
}

impl Inferred {
    fn key(&self) -> (AttrDataFormat, ScalarKind, Dtype) {
        (self.format, self.info.kind, self.info.description)
    }
}

fn infer(locator: &str, config: &EndpointConfig) -> Result<Inferred> {
    match config {
        EndpointConfig::Attribute(attr) => {
            let info = map_type(attr.data_type)?;
            Ok(Inferred {
                format: attr.data_format,
                info,
                is_command: false,
                max_x: attr.max_dim_x,
                max_y: attr.max_dim_y,
                labels: attr.enum_labels.clone(),
            })
        }
        EndpointConfig::Command(cmd) => {
            let tag = command_type(locator, cmd)?;
            let info = map_type(tag)?;
            let format = if info.is_array {
                AttrDataFormat::Spectrum
            } else {
                AttrDataFormat::Scalar
            };
            Ok(Inferred {
                format,
                info,
                is_command: true,
                max_x: UNBOUNDED_DIM,
                max_y: 0,
                labels: Vec::new(),
            })
        }
    }
}

/// The value type of a command: whichever side is not void.
fn command_type(locator: &str, cmd: &CommandInfo) -> Result<CmdArgType> {
    match (cmd.in_type, cmd.out_type) {
        (CmdArgType::DevVoid, out) => Ok(out),
        (input, CmdArgType::DevVoid) => Ok(input),
        (input, out) if input == out => Ok(input),
        (input, out) => Err(TransportError::mismatch(
            locator,
            format!(
                "has a different in ({}) and out ({}) type, commands with asymmetric I/O are not supported",
                input, out
            ),
        )),
    }
}

/// Build the unified descriptor for `source` from every fetched config.
///
/// `configs` pairs each locator with its metadata; all entries must infer to
/// the same format, kind and dtype.
pub fn build_descriptor(
    expected: Option<&ExpectedType>,
    source: &str,
    configs: &[(String, EndpointConfig)],
) -> Result<Descriptor> {
    let mut inferred = Vec::with_capacity(configs.len());
    for (locator, config) in configs {
        inferred.push((locator.as_str(), infer(locator, config)?));
    }

    let (_, first) = inferred
        .first()
        .ok_or_else(|| TransportError::mismatch(source, "has no endpoint configuration"))?;

    if let Some((other, mismatched)) = inferred.iter().find(|(_, i)| i.key() != first.key()) {
        return Err(TransportError::mismatch(
            source,
            format!(
                "has mismatched configs: {:?} != {:?} ({})",
                first.key(),
                mismatched.key(),
                other
            ),
        ));
    }

    let shape = match first.format {
        AttrDataFormat::Scalar => Vec::new(),
        AttrDataFormat::Spectrum => vec![first.max_x],
        AttrDataFormat::Image => vec![first.max_y, first.max_x],
    };
    let is_array = !shape.is_empty();

    if let Some(expected) = expected {
        check_expected(expected, source, first, shape.len())?;
    }

    let choices = match first.info.kind {
        ScalarKind::State => DevState::names(),
        ScalarKind::Enum if !first.is_command => first.labels.clone(),
        _ => Vec::new(),
    };

    let dtype = if is_array {
        Dtype::Array
    } else {
        first.info.description
    };

    Ok(Descriptor {
        source: source.to_string(),
        dtype,
        shape,
        choices,
    })
}

fn check_expected(
    expected: &ExpectedType,
    source: &str,
    inferred: &Inferred,
    dims: usize,
) -> Result<()> {
    let depth = expected.depth();
    if depth == 0 && dims > 0 {
        return Err(TransportError::mismatch(
            source,
            format!("has type [{}] not {}", inferred.info.kind, expected),
        ));
    }
    if depth > 0 && dims == 0 {
        return Err(TransportError::mismatch(
            source,
            format!("has type {} not {}", inferred.info.kind, expected),
        ));
    }
    // Command arrays are one unbounded axis; only attributes declare rank.
    if depth > 0 && !inferred.is_command && depth != dims {
        return Err(TransportError::mismatch(
            source,
            format!("has {} dimensions not {}", dims, depth),
        ));
    }

    let element = expected.element();
    if !element.accepts(inferred.info.kind) {
        return Err(TransportError::mismatch(
            source,
            format!("has type {} not {}", inferred.info.kind, element),
        ));
    }

    if let (ExpectedType::Enum(wanted), ScalarKind::Enum) = (element, inferred.info.kind) {
        if !inferred.is_command {
            let wanted: BTreeSet<&str> = wanted.iter().map(String::as_str).collect();
            let actual: BTreeSet<&str> = inferred.labels.iter().map(String::as_str).collect();
            if wanted != actual {
                return Err(TransportError::mismatch(
                    source,
                    format!(
                        "has choices {:?} not {:?}",
                        inferred.labels,
                        wanted.into_iter().collect::<Vec<_>>()
                    ),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::AttrWriteType;

    const SOURCE: &str = "test/device/1/justvalue";

    fn attr(info: AttributeInfo) -> Vec<(String, EndpointConfig)> {
        vec![(SOURCE.to_string(), EndpointConfig::Attribute(info))]
    }

    fn cmd(input: CmdArgType, out: CmdArgType) -> Vec<(String, EndpointConfig)> {
        vec![(
            "test/device/1/clear".to_string(),
            EndpointConfig::Command(CommandInfo::new("clear", input, out)),
        )]
    }

    #[test]
    fn test_scalar_integer_descriptor() {
        let configs = attr(AttributeInfo::scalar(
            "justvalue",
            CmdArgType::DevLong,
            AttrWriteType::ReadWrite,
        ));
        let d = build_descriptor(None, SOURCE, &configs).unwrap();
        assert_eq!(d.dtype, Dtype::Integer);
        assert!(d.shape.is_empty());
        assert!(d.choices.is_empty());
        assert_eq!(d.source, SOURCE);
    }

    #[test]
    fn test_image_shape_is_rows_first() {
        let configs = attr(AttributeInfo::image(
            "array",
            CmdArgType::DevDouble,
            AttrWriteType::ReadWrite,
            3,
            2,
        ));
        let d = build_descriptor(None, SOURCE, &configs).unwrap();
        assert_eq!(d.dtype, Dtype::Array);
        assert_eq!(d.shape, vec![2, 3]);
    }

    #[test]
    fn test_spectrum_shape() {
        let configs = attr(AttributeInfo::spectrum(
            "spectrum",
            CmdArgType::DevFloat,
            AttrWriteType::Read,
            16,
        ));
        let d = build_descriptor(None, SOURCE, &configs).unwrap();
        assert_eq!(d.shape, vec![16]);
    }

    #[test]
    fn test_command_asymmetric_io_fails() {
        let configs = cmd(CmdArgType::DevLong, CmdArgType::DevString);
        let err = build_descriptor(None, SOURCE, &configs).unwrap_err();
        assert!(matches!(err, TransportError::TypeMismatch { .. }));
    }

    #[test]
    fn test_command_void_side_is_ignored() {
        let d = build_descriptor(None, SOURCE, &cmd(CmdArgType::DevVoid, CmdArgType::DevDouble))
            .unwrap();
        assert_eq!(d.dtype, Dtype::Number);

        let d = build_descriptor(
            None,
            SOURCE,
            &cmd(CmdArgType::DevVarLongArray, CmdArgType::DevVoid),
        )
        .unwrap();
        assert_eq!(d.dtype, Dtype::Array);
        assert_eq!(d.shape, vec![UNBOUNDED_DIM]);
    }

    #[test]
    fn test_state_choices_are_global() {
        let configs = attr(AttributeInfo::scalar(
            "State",
            CmdArgType::DevState,
            AttrWriteType::Read,
        ));
        let d = build_descriptor(Some(&ExpectedType::State), SOURCE, &configs).unwrap();
        assert_eq!(d.choices, DevState::names());
        assert_eq!(d.dtype, Dtype::String);
    }

    #[test]
    fn test_enum_labels_are_set_compared() {
        let configs = attr(
            AttributeInfo::scalar("mode", CmdArgType::DevEnum, AttrWriteType::ReadWrite)
                .with_enum_labels(["AA", "BB", "CC"]),
        );
        let same = ExpectedType::Enum(vec!["CC".into(), "AA".into(), "BB".into()]);
        let d = build_descriptor(Some(&same), SOURCE, &configs).unwrap();
        assert_eq!(d.choices, vec!["AA", "BB", "CC"]);

        let different = ExpectedType::Enum(vec!["AA".into(), "BB".into()]);
        assert!(matches!(
            build_descriptor(Some(&different), SOURCE, &configs),
            Err(TransportError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_command_enum_has_no_choices() {
        let expected = ExpectedType::Enum(vec!["X".into()]);
        let d = build_descriptor(
            Some(&expected),
            SOURCE,
            &cmd(CmdArgType::DevEnum, CmdArgType::DevEnum),
        )
        .unwrap();
        assert!(d.choices.is_empty());
    }

    #[test]
    fn test_expected_type_mismatch() {
        let configs = attr(AttributeInfo::scalar(
            "justvalue",
            CmdArgType::DevDouble,
            AttrWriteType::ReadWrite,
        ));
        assert!(build_descriptor(Some(&ExpectedType::Float), SOURCE, &configs).is_ok());
        assert!(matches!(
            build_descriptor(Some(&ExpectedType::Integer), SOURCE, &configs),
            Err(TransportError::TypeMismatch { .. })
        ));
        assert!(matches!(
            build_descriptor(
                Some(&ExpectedType::array_of(ExpectedType::Float)),
                SOURCE,
                &configs
            ),
            Err(TransportError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_expected_rank_must_match_attribute() {
        let configs = attr(AttributeInfo::image(
            "array",
            CmdArgType::DevDouble,
            AttrWriteType::ReadWrite,
            3,
            2,
        ));
        let image = ExpectedType::array_of(ExpectedType::array_of(ExpectedType::Float));
        assert!(build_descriptor(Some(&image), SOURCE, &configs).is_ok());
        assert!(matches!(
            build_descriptor(
                Some(&ExpectedType::array_of(ExpectedType::Float)),
                SOURCE,
                &configs
            ),
            Err(TransportError::TypeMismatch { .. })
        ));
        assert!(matches!(
            build_descriptor(Some(&ExpectedType::Float), SOURCE, &configs),
            Err(TransportError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_bool_satisfies_integer() {
        let configs = attr(AttributeInfo::scalar(
            "flag",
            CmdArgType::DevBoolean,
            AttrWriteType::ReadWrite,
        ));
        assert!(build_descriptor(Some(&ExpectedType::Integer), SOURCE, &configs).is_ok());
        assert!(build_descriptor(Some(&ExpectedType::Bool), SOURCE, &configs).is_ok());
    }

    #[test]
    fn test_void_rejects_any_expectation() {
        let configs = cmd(CmdArgType::DevVoid, CmdArgType::DevVoid);
        assert!(build_descriptor(None, SOURCE, &configs).is_ok());
        assert!(build_descriptor(Some(&ExpectedType::String), SOURCE, &configs).is_err());
    }

    #[test]
    fn test_disagreeing_configs_fail() {
        let configs = vec![
            (
                "a/b/c/read".to_string(),
                EndpointConfig::Attribute(AttributeInfo::scalar(
                    "read",
                    CmdArgType::DevDouble,
                    AttrWriteType::Read,
                )),
            ),
            (
                "a/b/c/write".to_string(),
                EndpointConfig::Attribute(AttributeInfo::scalar(
                    "write",
                    CmdArgType::DevLong,
                    AttrWriteType::Write,
                )),
            ),
        ];
        assert!(matches!(
            build_descriptor(None, "a/b/c/read", &configs),
            Err(TransportError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_descriptor_json_omits_empty_choices() {
        let d = Descriptor {
            source: SOURCE.into(),
            dtype: Dtype::Number,
            shape: vec![],
            choices: vec![],
        };
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["dtype"], "number");
        assert!(json.get("choices").is_none());
    }
}
