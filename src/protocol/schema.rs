//! Packet definition files.
//!
//! A definition lists the payload fields of one packet version, one field
//! per line as `<type> <name>`. Blank lines and `#` comments are ignored.
//!
//! ```text
//! # C_CHAT.2.def
//! uint32 channel
//! string message
//! ```
//!
//! Strings are UTF-16LE terminated by a NUL code unit. `bytes` consumes the
//! rest of the payload and must therefore be the last field.

use serde_json::{Map, Number, Value};

use crate::error::{ProxyError, Result};

/// Primitive field types understood by the definition format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Byte,
    Bool,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    String,
    Bytes,
}

impl FieldType {
    fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "byte" => FieldType::Byte,
            "bool" => FieldType::Bool,
            "int16" => FieldType::Int16,
            "uint16" => FieldType::UInt16,
            "int32" => FieldType::Int32,
            "uint32" => FieldType::UInt32,
            "int64" => FieldType::Int64,
            "uint64" => FieldType::UInt64,
            "float" => FieldType::Float,
            "double" => FieldType::Double,
            "string" => FieldType::String,
            "bytes" => FieldType::Bytes,
            _ => return None,
        })
    }

    fn default_value(self) -> Value {
        match self {
            FieldType::Bool => Value::Bool(false),
            FieldType::Float | FieldType::Double => Value::from(0.0),
            FieldType::String => Value::String(String::new()),
            FieldType::Bytes => Value::Array(Vec::new()),
            _ => Value::from(0),
        }
    }
}

/// A single named field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
}

/// Ordered field layout of one packet version
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Parse a definition source
    pub fn parse(source: &str) -> Result<Self> {
        let mut fields: Vec<Field> = Vec::new();

        for (lineno, raw) in source.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let mut parts = line.split_whitespace();
            let (Some(ty), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(ProxyError::Schema(format!(
                    "line {}: expected '<type> <name>', got '{line}'",
                    lineno + 1
                )));
            };

            let ty = FieldType::parse(ty).ok_or_else(|| {
                ProxyError::Schema(format!("line {}: unknown type '{ty}'", lineno + 1))
            })?;

            if fields.iter().any(|f| f.name == name) {
                return Err(ProxyError::Schema(format!(
                    "line {}: duplicate field '{name}'",
                    lineno + 1
                )));
            }
            if fields.last().is_some_and(|f| f.ty == FieldType::Bytes) {
                return Err(ProxyError::Schema(format!(
                    "line {}: 'bytes' must be the last field",
                    lineno + 1
                )));
            }

            fields.push(Field {
                name: name.to_string(),
                ty,
            });
        }

        Ok(Self { fields })
    }

    /// Fields in wire order
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Decode a payload into a field map
    pub fn read(&self, payload: &[u8]) -> Result<Map<String, Value>> {
        let mut reader = Reader { buf: payload, pos: 0 };
        let mut out = Map::with_capacity(self.fields.len());

        for field in &self.fields {
            let value = reader
                .read(field.ty)
                .map_err(|e| ProxyError::Codec(format!("field '{}': {e}", field.name)))?;
            out.insert(field.name.clone(), value);
        }

        Ok(out)
    }

    /// Encode a field map as a payload, appending to `out`.
    ///
    /// Missing fields are written as zero values.
    pub fn write(&self, data: &Map<String, Value>, out: &mut Vec<u8>) -> Result<()> {
        for field in &self.fields {
            let default;
            let value = match data.get(&field.name) {
                Some(v) => v,
                None => {
                    default = field.ty.default_value();
                    &default
                }
            };
            write_value(field.ty, value, out)
                .map_err(|e| ProxyError::Codec(format!("field '{}': {e}", field.name)))?;
        }
        Ok(())
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], String> {
        let end = self.pos + n;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| format!("unexpected end of payload at offset {}", self.pos))?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> std::result::Result<[u8; N], String> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read(&mut self, ty: FieldType) -> std::result::Result<Value, String> {
        Ok(match ty {
            FieldType::Byte => Value::from(self.array::<1>()?[0]),
            FieldType::Bool => Value::Bool(self.array::<1>()?[0] != 0),
            FieldType::Int16 => Value::from(i16::from_le_bytes(self.array()?)),
            FieldType::UInt16 => Value::from(u16::from_le_bytes(self.array()?)),
            FieldType::Int32 => Value::from(i32::from_le_bytes(self.array()?)),
            FieldType::UInt32 => Value::from(u32::from_le_bytes(self.array()?)),
            FieldType::Int64 => Value::from(i64::from_le_bytes(self.array()?)),
            FieldType::UInt64 => Value::from(u64::from_le_bytes(self.array()?)),
            FieldType::Float => float_value(f64::from(f32::from_le_bytes(self.array()?)))?,
            FieldType::Double => float_value(f64::from_le_bytes(self.array()?))?,
            FieldType::String => {
                let mut units = Vec::new();
                loop {
                    let unit = u16::from_le_bytes(self.array()?);
                    if unit == 0 {
                        break;
                    }
                    units.push(unit);
                }
                Value::String(
                    String::from_utf16(&units).map_err(|_| "invalid UTF-16 string".to_string())?,
                )
            }
            FieldType::Bytes => {
                let rest = self.take(self.buf.len() - self.pos)?;
                Value::Array(rest.iter().map(|b| Value::from(*b)).collect())
            }
        })
    }
}

fn float_value(v: f64) -> std::result::Result<Value, String> {
    Number::from_f64(v)
        .map(Value::Number)
        .ok_or_else(|| format!("non-finite float {v}"))
}

fn int_value<T: TryFrom<i64> + TryFrom<u64>>(value: &Value) -> std::result::Result<T, String> {
    if let Some(v) = value.as_i64() {
        T::try_from(v).map_err(|_| format!("{v} out of range"))
    } else if let Some(v) = value.as_u64() {
        T::try_from(v).map_err(|_| format!("{v} out of range"))
    } else {
        Err(format!("expected integer, got {value}"))
    }
}

fn write_value(ty: FieldType, value: &Value, out: &mut Vec<u8>) -> std::result::Result<(), String> {
    match ty {
        FieldType::Byte => out.push(int_value::<u8>(value)?),
        FieldType::Bool => {
            let b = value
                .as_bool()
                .ok_or_else(|| format!("expected bool, got {value}"))?;
            out.push(u8::from(b));
        }
        FieldType::Int16 => out.extend_from_slice(&int_value::<i16>(value)?.to_le_bytes()),
        FieldType::UInt16 => out.extend_from_slice(&int_value::<u16>(value)?.to_le_bytes()),
        FieldType::Int32 => out.extend_from_slice(&int_value::<i32>(value)?.to_le_bytes()),
        FieldType::UInt32 => out.extend_from_slice(&int_value::<u32>(value)?.to_le_bytes()),
        FieldType::Int64 => out.extend_from_slice(&int_value::<i64>(value)?.to_le_bytes()),
        FieldType::UInt64 => out.extend_from_slice(&int_value::<u64>(value)?.to_le_bytes()),
        FieldType::Float | FieldType::Double => {
            let v = value
                .as_f64()
                .ok_or_else(|| format!("expected number, got {value}"))?;
            if ty == FieldType::Float {
                out.extend_from_slice(&(v as f32).to_le_bytes());
            } else {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        FieldType::String => {
            let s = value
                .as_str()
                .ok_or_else(|| format!("expected string, got {value}"))?;
            for unit in s.encode_utf16() {
                out.extend_from_slice(&unit.to_le_bytes());
            }
            out.extend_from_slice(&[0, 0]);
        }
        FieldType::Bytes => {
            let items = value
                .as_array()
                .ok_or_else(|| format!("expected byte array, got {value}"))?;
            for item in items {
                out.push(int_value::<u8>(item)?);
            }
        }
    }
    Ok(())
}
