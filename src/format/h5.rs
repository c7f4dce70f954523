//! Hierarchical binary (HDF5) format (feature `h5`).

use std::io::Write;

use hdf5::types::{TypeDescriptor, VarLenAscii, VarLenUnicode};
use serde_json::{Map, Value, json};

use crate::error::{FormatError, SourceProviderError};
use crate::format::{EvalError, FileFormat, Format};
use crate::key::Key;
use crate::storage::ByteStream;

/// A format for querying HDF5 files.
///
/// A key is a slash path addressing a dataset. An optional suffix separated
/// by `@` addresses an attribute on the group or dataset instead of its
/// value; since `@` is a legal HDF5 name character, a literal `@` is written
/// `@@`. All scalars and arrays are normalized to plain JSON values.
#[derive(Debug, Clone, Default)]
pub struct H5;

pub(super) fn h5_from_config(
    args: &Map<String, Value>,
) -> Result<Box<dyn Format>, SourceProviderError> {
    crate::provider::check_fields(args, &[])?;
    Ok(Box::new(H5))
}

/// An open HDF5 file plus the spooled temp file backing it.
#[derive(Debug)]
pub struct ParsedH5 {
    file: hdf5::File,
    _backing: tempfile::NamedTempFile,
}

impl FileFormat for H5 {
    type Data = ParsedH5;

    fn parse_data(&self, stream: &mut dyn ByteStream) -> Result<Self::Data, FormatError> {
        // The HDF5 library only reads from the filesystem; spool the stream
        // to a temp file that lives as long as the parsed handle.
        let mut backing = tempfile::NamedTempFile::new()?;
        std::io::copy(stream, &mut backing)?;
        backing.flush()?;

        let file = hdf5::File::open(backing.path())
            .map_err(|e| FormatError::Parse(e.to_string()))?;
        Ok(ParsedH5 {
            file,
            _backing: backing,
        })
    }

    fn eval_key(&self, data: &Self::Data, key: &Key) -> Result<Value, EvalError> {
        let (path, attr) = split_attr_path(key.key());

        match attr {
            Some(attr_name) => {
                let attr = locate_attr(&data.file, &path, &attr_name)?;
                read_container(&attr)
            }
            None => {
                let dataset = data.file.dataset(&path).map_err(|_| EvalError::NotFound)?;
                read_container(&dataset)
            }
        }
    }
}

/// Split `path@attr` into the object path and the attribute name,
/// unescaping doubled `@` characters.
fn split_attr_path(key: &str) -> (String, Option<String>) {
    let mut path = String::with_capacity(key.len());
    let mut chars = key.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '@' {
            path.push(c);
            continue;
        }
        if chars.peek() == Some(&'@') {
            chars.next();
            path.push('@');
            continue;
        }

        let mut attr = String::new();
        while let Some(c) = chars.next() {
            if c == '@' && chars.peek() == Some(&'@') {
                chars.next();
            }
            attr.push(if c == '@' { '@' } else { c });
        }
        return (path, Some(attr));
    }

    (path, None)
}

/// Find an attribute on the dataset or group the path addresses.
fn locate_attr(
    file: &hdf5::File,
    path: &str,
    name: &str,
) -> Result<hdf5::Attribute, EvalError> {
    if let Ok(dataset) = file.dataset(path) {
        return dataset.attr(name).map_err(|_| EvalError::NotFound);
    }
    if let Ok(group) = file.group(path) {
        return group.attr(name).map_err(|_| EvalError::NotFound);
    }
    Err(EvalError::NotFound)
}

/// Read a dataset or attribute into a plain JSON value.
///
/// No HDF5 scalar or byte-string wrapper types escape this layer.
fn read_container(container: &hdf5::Container) -> Result<Value, EvalError> {
    let descriptor = container
        .dtype()
        .and_then(|dtype| dtype.to_descriptor())
        .map_err(|e| EvalError::Message(e.to_string()))?;

    let shape = container.shape();
    if shape.is_empty() {
        read_scalar(container, &descriptor)
    } else {
        let flat = read_flat(container, &descriptor)?;
        Ok(nest(flat, &shape))
    }
}

fn read_scalar(
    container: &hdf5::Container,
    descriptor: &TypeDescriptor,
) -> Result<Value, EvalError> {
    let value = match descriptor {
        TypeDescriptor::Integer(_) => json!(read_as::<i64>(container.read_scalar())?),
        TypeDescriptor::Unsigned(_) => json!(read_as::<u64>(container.read_scalar())?),
        TypeDescriptor::Float(_) => json!(read_as::<f64>(container.read_scalar())?),
        TypeDescriptor::Boolean => json!(read_as::<bool>(container.read_scalar())?),
        TypeDescriptor::VarLenAscii => {
            json!(read_as::<VarLenAscii>(container.read_scalar())?.as_str())
        }
        TypeDescriptor::VarLenUnicode
        | TypeDescriptor::FixedAscii(_)
        | TypeDescriptor::FixedUnicode(_) => {
            json!(read_as::<VarLenUnicode>(container.read_scalar())?.as_str())
        }
        other => {
            return Err(EvalError::Message(format!(
                "unsupported datatype {other:?}"
            )));
        }
    };
    Ok(value)
}

fn read_flat(
    container: &hdf5::Container,
    descriptor: &TypeDescriptor,
) -> Result<Vec<Value>, EvalError> {
    let values = match descriptor {
        TypeDescriptor::Integer(_) => collect(read_as::<Vec<i64>>(container.read_raw())?),
        TypeDescriptor::Unsigned(_) => collect(read_as::<Vec<u64>>(container.read_raw())?),
        TypeDescriptor::Float(_) => collect(read_as::<Vec<f64>>(container.read_raw())?),
        TypeDescriptor::Boolean => collect(read_as::<Vec<bool>>(container.read_raw())?),
        TypeDescriptor::VarLenAscii => read_as::<Vec<VarLenAscii>>(container.read_raw())?
            .into_iter()
            .map(|s| json!(s.as_str()))
            .collect(),
        TypeDescriptor::VarLenUnicode
        | TypeDescriptor::FixedAscii(_)
        | TypeDescriptor::FixedUnicode(_) => read_as::<Vec<VarLenUnicode>>(container.read_raw())?
            .into_iter()
            .map(|s| json!(s.as_str()))
            .collect(),
        other => {
            return Err(EvalError::Message(format!(
                "unsupported datatype {other:?}"
            )));
        }
    };
    Ok(values)
}

fn read_as<T>(result: Result<T, hdf5::Error>) -> Result<T, EvalError> {
    result.map_err(|e| EvalError::Message(e.to_string()))
}

fn collect<T: Into<Value>>(values: Vec<T>) -> Vec<Value> {
    values.into_iter().map(Into::into).collect()
}

/// Rebuild an n-dimensional array from its flattened values.
fn nest(flat: Vec<Value>, shape: &[usize]) -> Value {
    if shape.len() <= 1 {
        return Value::Array(flat);
    }
    let chunk = flat.len() / shape[0].max(1);
    Value::Array(
        flat.chunks(chunk.max(1))
            .map(|c| nest(c.to_vec(), &shape[1..]))
            .collect(),
    )
}
