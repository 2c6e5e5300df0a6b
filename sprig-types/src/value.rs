use serde::Serialize;
use thiserror::Error;

use crate::payload::{data_set, data_set::data_set_value, metric, DataType};

#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct DateTime {
    /* milliseconds since epoch (Jan 1, 1970) */
    pub date_time: u64,
}

impl DateTime {
    pub fn new(date_time: u64) -> Self {
        Self { date_time }
    }
}

/* Signed values travel in the unsigned wire fields, reinterpreted at their
 * declared width. */

fn i8_to_proto(val: i8) -> u32 {
    let b = val.to_le_bytes();
    u32::from_le_bytes([b[0], 0, 0, 0])
}
fn i16_to_proto(val: i16) -> u32 {
    let b = val.to_le_bytes();
    u32::from_le_bytes([b[0], b[1], 0, 0])
}
fn i32_to_proto(val: i32) -> u32 {
    u32::from_le_bytes(val.to_le_bytes())
}
fn i64_to_proto(val: i64) -> u64 {
    u64::from_le_bytes(val.to_le_bytes())
}
fn proto_to_i8(val: u32) -> i8 {
    let bytes = val.to_le_bytes();
    i8::from_le_bytes([bytes[0]])
}
fn proto_to_i16(val: u32) -> i16 {
    let bytes = val.to_le_bytes();
    i16::from_le_bytes([bytes[0], bytes[1]])
}
fn proto_to_i32(val: u32) -> i32 {
    i32::from_le_bytes(val.to_le_bytes())
}
fn proto_to_i64(val: u64) -> i64 {
    i64::from_le_bytes(val.to_le_bytes())
}

/// Failure to turn a wire metric value into a [MetricKind]
#[derive(Debug, Error)]
pub enum FromValueError {
    #[error("value does not match declared datatype {0:?}")]
    TypeMismatch(DataType),
    #[error("datatype {0:?} is not supported")]
    UnsupportedDataType(DataType),
    #[error("{0} is not a known datatype")]
    InvalidDataType(u32),
    #[error(transparent)]
    BadShape(#[from] DataSetShapeError),
}

/// A dataset column or row does not line up with the rest of the table
#[derive(Debug, Error, PartialEq)]
pub enum DataSetShapeError {
    #[error("all columns must have the same number of rows, got lengths {0:?}")]
    UnevenColumns(Vec<usize>),
    #[error("row has {got} elements, expected {expected}")]
    RowWidthMismatch { expected: usize, got: usize },
}

/// A single slot of a dataset table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DataSetValue {
    Int(i64),
    Double(f64),
    Bool(bool),
    Text(String),
}

impl DataSetValue {
    fn datatype(&self) -> DataType {
        match self {
            DataSetValue::Int(_) => DataType::Int64,
            DataSetValue::Double(_) => DataType::Double,
            DataSetValue::Bool(_) => DataType::Boolean,
            DataSetValue::Text(_) => DataType::String,
        }
    }

    fn to_proto(&self) -> data_set_value::Value {
        match self {
            DataSetValue::Int(v) => data_set_value::Value::LongValue(i64_to_proto(*v)),
            DataSetValue::Double(v) => data_set_value::Value::DoubleValue(*v),
            DataSetValue::Bool(v) => data_set_value::Value::BooleanValue(*v),
            DataSetValue::Text(v) => data_set_value::Value::StringValue(v.clone()),
        }
    }

    fn try_from_proto(value: data_set_value::Value) -> Result<Self, FromValueError> {
        match value {
            data_set_value::Value::IntValue(v) => Ok(DataSetValue::Int(proto_to_i32(v) as i64)),
            data_set_value::Value::LongValue(v) => Ok(DataSetValue::Int(proto_to_i64(v))),
            data_set_value::Value::FloatValue(v) => Ok(DataSetValue::Double(v as f64)),
            data_set_value::Value::DoubleValue(v) => Ok(DataSetValue::Double(v)),
            data_set_value::Value::BooleanValue(v) => Ok(DataSetValue::Bool(v)),
            data_set_value::Value::StringValue(v) => Ok(DataSetValue::Text(v)),
            data_set_value::Value::ExtensionValue(_) => {
                Err(FromValueError::UnsupportedDataType(DataType::Unknown))
            }
        }
    }
}

impl From<i64> for DataSetValue {
    fn from(value: i64) -> Self {
        DataSetValue::Int(value)
    }
}
impl From<f64> for DataSetValue {
    fn from(value: f64) -> Self {
        DataSetValue::Double(value)
    }
}
impl From<bool> for DataSetValue {
    fn from(value: bool) -> Self {
        DataSetValue::Bool(value)
    }
}
impl From<&str> for DataSetValue {
    fn from(value: &str) -> Self {
        DataSetValue::Text(value.into())
    }
}
impl From<String> for DataSetValue {
    fn from(value: String) -> Self {
        DataSetValue::Text(value)
    }
}

/// A table shaped metric value. Columns are named and ordered, every column
/// holds the same number of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct DataSet {
    columns: Vec<String>,
    /* column major, values[i] belongs to columns[i] */
    values: Vec<Vec<DataSetValue>>,
}

impl DataSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dataset from `(column name, column values)` pairs, rejecting
    /// columns of differing lengths before anything touches the wire
    pub fn from_columns<S, C>(columns: C) -> Result<Self, DataSetShapeError>
    where
        S: Into<String>,
        C: IntoIterator<Item = (S, Vec<DataSetValue>)>,
    {
        let mut names = Vec::new();
        let mut values = Vec::new();
        for (name, column) in columns {
            names.push(name.into());
            values.push(column);
        }
        let ds = Self {
            columns: names,
            values,
        };
        ds.check_shape()?;
        Ok(ds)
    }

    fn check_shape(&self) -> Result<(), DataSetShapeError> {
        if let Some(first) = self.values.first() {
            let expected = first.len();
            if self.values.iter().any(|col| col.len() != expected) {
                return Err(DataSetShapeError::UnevenColumns(
                    self.values.iter().map(|col| col.len()).collect(),
                ));
            }
        }
        Ok(())
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&[DataSetValue]> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(&self.values[idx])
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.values.first().map(|col| col.len()).unwrap_or(0)
    }

    /// Produce the wire `{columns, types, rows}` table. Column types are
    /// taken from the first row, each element is still encoded by its own
    /// kind.
    pub fn to_proto(&self) -> Result<crate::payload::DataSet, DataSetShapeError> {
        self.check_shape()?;
        let num_rows = self.num_rows();
        let types = if num_rows > 0 {
            self.values.iter().map(|col| col[0].datatype() as u32).collect()
        } else {
            Vec::new()
        };
        let mut rows = Vec::with_capacity(num_rows);
        for i in 0..num_rows {
            let elements = self
                .values
                .iter()
                .map(|col| data_set::DataSetValue {
                    value: Some(col[i].to_proto()),
                })
                .collect();
            rows.push(data_set::Row { elements });
        }
        Ok(crate::payload::DataSet {
            num_of_columns: Some(self.columns.len() as u64),
            columns: self.columns.clone(),
            types,
            rows,
        })
    }

    /// Rebuild the column keyed table from the wire form. Rows whose width
    /// disagrees with the column list are an error, never truncated.
    pub fn try_from_proto(proto: crate::payload::DataSet) -> Result<Self, FromValueError> {
        let expected = proto.columns.len();
        let mut values: Vec<Vec<DataSetValue>> =
            vec![Vec::with_capacity(proto.rows.len()); expected];
        for row in proto.rows {
            if row.elements.len() != expected {
                return Err(DataSetShapeError::RowWidthMismatch {
                    expected,
                    got: row.elements.len(),
                }
                .into());
            }
            for (idx, element) in row.elements.into_iter().enumerate() {
                let value = element
                    .value
                    .ok_or(FromValueError::TypeMismatch(DataType::DataSet))?;
                values[idx].push(DataSetValue::try_from_proto(value)?);
            }
        }
        Ok(Self {
            columns: proto.columns,
            values,
        })
    }
}

/// A typed metric value, the kind is fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricKind {
    Int(i64),
    Double(f64),
    Bool(bool),
    Text(String),
    Bytes(Vec<u8>),
    DateTime(DateTime),
    Uuid(String),
    DataSet(DataSet),
    File(Vec<u8>),
}

impl MetricKind {
    /// File content carried as bytes. The wire erases the difference
    /// between a file and a plain byte buffer, only the datatype differs.
    pub fn file(content: Vec<u8>) -> Self {
        MetricKind::File(content)
    }

    /// A UUID in its canonical string form
    pub fn uuid<S: Into<String>>(value: S) -> Self {
        MetricKind::Uuid(value.into())
    }

    pub fn datatype(&self) -> DataType {
        match self {
            MetricKind::Int(_) => DataType::Int64,
            MetricKind::Double(_) => DataType::Double,
            MetricKind::Bool(_) => DataType::Boolean,
            MetricKind::Text(_) => DataType::Text,
            MetricKind::Bytes(_) => DataType::Bytes,
            MetricKind::DateTime(_) => DataType::DateTime,
            MetricKind::Uuid(_) => DataType::Uuid,
            MetricKind::DataSet(_) => DataType::DataSet,
            MetricKind::File(_) => DataType::File,
        }
    }

    /// Whether two values are of the same kind, regardless of content.
    pub fn same_kind(&self, other: &MetricKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn to_proto(&self) -> Result<metric::Value, DataSetShapeError> {
        let value = match self {
            MetricKind::Int(v) => metric::Value::LongValue(i64_to_proto(*v)),
            MetricKind::Double(v) => metric::Value::DoubleValue(*v),
            MetricKind::Bool(v) => metric::Value::BooleanValue(*v),
            MetricKind::Text(v) => metric::Value::StringValue(v.clone()),
            MetricKind::Bytes(v) => metric::Value::BytesValue(v.clone()),
            MetricKind::DateTime(v) => metric::Value::LongValue(v.date_time),
            MetricKind::Uuid(v) => metric::Value::StringValue(v.clone()),
            MetricKind::DataSet(v) => metric::Value::DatasetValue(v.to_proto()?),
            MetricKind::File(v) => metric::Value::BytesValue(v.clone()),
        };
        Ok(value)
    }

    /// Decode a wire value according to its declared datatype. Signed
    /// integers are reconstructed at their declared width, unsigned widths
    /// are taken as they are.
    pub fn try_from_proto(
        datatype: DataType,
        value: metric::Value,
    ) -> Result<Self, FromValueError> {
        let mismatch = || FromValueError::TypeMismatch(datatype);
        let out = match datatype {
            DataType::Int8 => match value {
                metric::Value::IntValue(v) => MetricKind::Int(proto_to_i8(v) as i64),
                _ => return Err(mismatch()),
            },
            DataType::Int16 => match value {
                metric::Value::IntValue(v) => MetricKind::Int(proto_to_i16(v) as i64),
                _ => return Err(mismatch()),
            },
            DataType::Int32 => match value {
                metric::Value::IntValue(v) => MetricKind::Int(proto_to_i32(v) as i64),
                _ => return Err(mismatch()),
            },
            DataType::Int64 => match value {
                metric::Value::LongValue(v) => MetricKind::Int(proto_to_i64(v)),
                _ => return Err(mismatch()),
            },
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 => match value {
                metric::Value::IntValue(v) => MetricKind::Int(v as i64),
                _ => return Err(mismatch()),
            },
            DataType::UInt64 => match value {
                metric::Value::LongValue(v) => MetricKind::Int(proto_to_i64(v)),
                _ => return Err(mismatch()),
            },
            DataType::Float => match value {
                metric::Value::FloatValue(v) => MetricKind::Double(v as f64),
                _ => return Err(mismatch()),
            },
            DataType::Double => match value {
                metric::Value::DoubleValue(v) => MetricKind::Double(v),
                _ => return Err(mismatch()),
            },
            DataType::Boolean => match value {
                metric::Value::BooleanValue(v) => MetricKind::Bool(v),
                _ => return Err(mismatch()),
            },
            DataType::String | DataType::Text => match value {
                metric::Value::StringValue(v) => MetricKind::Text(v),
                _ => return Err(mismatch()),
            },
            DataType::DateTime => match value {
                metric::Value::LongValue(v) => MetricKind::DateTime(DateTime::new(v)),
                _ => return Err(mismatch()),
            },
            DataType::Uuid => match value {
                metric::Value::StringValue(v) => MetricKind::Uuid(v),
                _ => return Err(mismatch()),
            },
            DataType::Bytes => match value {
                metric::Value::BytesValue(v) => MetricKind::Bytes(v),
                _ => return Err(mismatch()),
            },
            DataType::File => match value {
                metric::Value::BytesValue(v) => MetricKind::File(v),
                _ => return Err(mismatch()),
            },
            DataType::DataSet => match value {
                metric::Value::DatasetValue(v) => MetricKind::DataSet(DataSet::try_from_proto(v)?),
                _ => return Err(mismatch()),
            },
            other => return Err(FromValueError::UnsupportedDataType(other)),
        };
        Ok(out)
    }
}

macro_rules! impl_metric_kind_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for MetricKind {
                fn from(value: $t) -> Self {
                    MetricKind::Int(value as i64)
                }
            }
        )*
    };
}

impl_metric_kind_from_int!(i8, i16, i32, i64, u8, u16, u32, u64);

impl From<f32> for MetricKind {
    fn from(value: f32) -> Self {
        MetricKind::Double(value as f64)
    }
}
impl From<f64> for MetricKind {
    fn from(value: f64) -> Self {
        MetricKind::Double(value)
    }
}
impl From<bool> for MetricKind {
    fn from(value: bool) -> Self {
        MetricKind::Bool(value)
    }
}
impl From<&str> for MetricKind {
    fn from(value: &str) -> Self {
        MetricKind::Text(value.into())
    }
}
impl From<String> for MetricKind {
    fn from(value: String) -> Self {
        MetricKind::Text(value)
    }
}
impl From<Vec<u8>> for MetricKind {
    fn from(value: Vec<u8>) -> Self {
        MetricKind::Bytes(value)
    }
}
impl From<DateTime> for MetricKind {
    fn from(value: DateTime) -> Self {
        MetricKind::DateTime(value)
    }
}
impl From<DataSet> for MetricKind {
    fn from(value: DataSet) -> Self {
        MetricKind::DataSet(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! assert_int_round_trip {
        ($datatype:expr, $wire:expr, $value:expr) => {
            let decoded = MetricKind::try_from_proto($datatype, $wire).unwrap();
            assert_eq!(decoded, MetricKind::Int($value));
        };
    }

    #[test]
    fn signed_values_reconstructed_at_their_width() {
        assert_int_round_trip!(DataType::Int8, metric::Value::IntValue(i8_to_proto(-1)), -1);
        assert_int_round_trip!(DataType::Int8, metric::Value::IntValue(i8_to_proto(-128)), -128);
        assert_int_round_trip!(
            DataType::Int16,
            metric::Value::IntValue(i16_to_proto(-12345)),
            -12345
        );
        assert_int_round_trip!(
            DataType::Int32,
            metric::Value::IntValue(i32_to_proto(-123456789)),
            -123456789
        );
        assert_int_round_trip!(
            DataType::Int64,
            metric::Value::LongValue(i64_to_proto(i64::MIN)),
            i64::MIN
        );
    }

    #[test]
    fn negative_int_wire_form_is_twos_complement() {
        assert_eq!(i8_to_proto(-1), 255);
        assert_eq!(i16_to_proto(-1), 65535);
        assert_eq!(i32_to_proto(-1), u32::MAX);
        assert_eq!(i64_to_proto(-1), u64::MAX);
        assert_eq!(i8_to_proto(-128), 128);
    }

    #[test]
    fn unsigned_values_pass_through() {
        assert_int_round_trip!(DataType::UInt8, metric::Value::IntValue(255), 255);
        assert_int_round_trip!(DataType::UInt16, metric::Value::IntValue(65535), 65535);
        assert_int_round_trip!(
            DataType::UInt32,
            metric::Value::IntValue(u32::MAX),
            u32::MAX as i64
        );
    }

    #[test]
    fn uint64_wraps_at_the_64_bit_boundary() {
        assert_int_round_trip!(DataType::UInt64, metric::Value::LongValue(u64::MAX), -1);
    }

    #[test]
    fn float_upcasts_to_double() {
        let decoded =
            MetricKind::try_from_proto(DataType::Float, metric::Value::FloatValue(1.5)).unwrap();
        assert_eq!(decoded, MetricKind::Double(1.5));
    }

    #[test]
    fn kind_construction_resolves_datatype() {
        assert_eq!(MetricKind::from(7u8).datatype(), DataType::Int64);
        assert_eq!(MetricKind::from(7.0).datatype(), DataType::Double);
        assert_eq!(MetricKind::from(true).datatype(), DataType::Boolean);
        assert_eq!(MetricKind::from("x").datatype(), DataType::Text);
        assert_eq!(MetricKind::from(vec![1u8]).datatype(), DataType::Bytes);
        assert_eq!(MetricKind::file(vec![1u8]).datatype(), DataType::File);
        assert_eq!(
            MetricKind::uuid("123e4567-e89b-12d3-a456-426614174000").datatype(),
            DataType::Uuid
        );
    }

    #[test]
    fn file_decodes_to_raw_bytes() {
        let decoded =
            MetricKind::try_from_proto(DataType::File, metric::Value::BytesValue(vec![1, 2, 3]))
                .unwrap();
        assert_eq!(decoded, MetricKind::File(vec![1, 2, 3]));
    }

    #[test]
    fn declared_type_and_value_must_agree() {
        let res =
            MetricKind::try_from_proto(DataType::Int64, metric::Value::StringValue("x".into()));
        assert!(matches!(res, Err(FromValueError::TypeMismatch(DataType::Int64))));
    }

    #[test]
    fn dataset_round_trips_column_keyed() {
        let ds = DataSet::from_columns([
            ("A", vec![DataSetValue::Int(1), DataSetValue::Int(2)]),
            ("B", vec![DataSetValue::Int(3), DataSetValue::Int(4)]),
        ])
        .unwrap();
        let wire = ds.to_proto().unwrap();
        assert_eq!(wire.num_of_columns, Some(2));
        assert_eq!(wire.columns, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(wire.types, vec![DataType::Int64 as u32, DataType::Int64 as u32]);
        assert_eq!(wire.rows.len(), 2);

        let back = DataSet::try_from_proto(wire).unwrap();
        assert_eq!(back.column("A").unwrap(), &[DataSetValue::Int(1), DataSetValue::Int(2)]);
        assert_eq!(back.column("B").unwrap(), &[DataSetValue::Int(3), DataSetValue::Int(4)]);
        assert_eq!(back, ds);
    }

    #[test]
    fn uneven_dataset_columns_rejected_before_encode() {
        let res = DataSet::from_columns([
            ("A", vec![DataSetValue::Int(1), DataSetValue::Int(2)]),
            ("B", vec![DataSetValue::Int(3)]),
        ]);
        assert_eq!(res, Err(DataSetShapeError::UnevenColumns(vec![2, 1])));
    }

    #[test]
    fn short_dataset_row_rejected_on_decode() {
        let ds = DataSet::from_columns([
            ("A", vec![DataSetValue::Int(1)]),
            ("B", vec![DataSetValue::Int(2)]),
        ])
        .unwrap();
        let mut wire = ds.to_proto().unwrap();
        wire.rows[0].elements.pop();
        let res = DataSet::try_from_proto(wire);
        assert!(matches!(
            res,
            Err(FromValueError::BadShape(DataSetShapeError::RowWidthMismatch {
                expected: 2,
                got: 1
            }))
        ));
    }
}
