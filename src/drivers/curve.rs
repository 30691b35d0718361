use ndarray::{s, Array2, ArrayView1, Axis};
use crate::drivers::ScanError;
/// Name and unit of one value inside a measurement package.
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub unit: String,
}
impl Column {
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
        }
    }
    pub fn header(&self) -> String {
        format!("{} [{}]", self.name, self.unit)
    }
}
/// One measurement curve: rows are packages in acquisition order, column 0 is the
/// applied potential and column 1 the working-electrode current.
#[derive(Clone, Debug)]
pub struct Curve {
    pub columns: Vec<Column>,
    pub data: Array2<f64>, // packages x variables
}
impl Curve {
    pub fn from_rows(columns: Vec<Column>, rows: &[Vec<f64>]) -> Result<Self, ScanError> {
        let width = columns.len();
        if let Some(bad) = rows.iter().position(|r| r.len() != width) {
            return Err(ScanError::CurveShape(format!(
                "package {bad} has {} values, expected {width}",
                rows[bad].len()
            )));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let data = Array2::from_shape_vec((rows.len(), width), flat)
            .map_err(|e| ScanError::CurveShape(e.to_string()))?;
        Ok(Self { columns, data })
    }
    pub fn len(&self) -> usize {
        self.data.nrows()
    }
    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }
    pub fn column(&self, index: usize) -> Option<ArrayView1<'_, f64>> {
        (index < self.data.ncols()).then(|| self.data.column(index))
    }
    pub fn column_vec(&self, index: usize) -> Result<Vec<f64>, ScanError> {
        self.column(index)
            .map(|c| c.to_vec())
            .ok_or_else(|| ScanError::CurveShape(format!("curve has no column {index}")))
    }
    pub fn potentials(&self) -> Result<Vec<f64>, ScanError> {
        self.column_vec(0)
    }
    pub fn currents(&self) -> Result<Vec<f64>, ScanError> {
        self.column_vec(1)
    }
    /// Appends a scan label to a column name, e.g. `WE current baseline_5hz`.
    pub fn tag_column(&mut self, index: usize, label: &str) {
        if let Some(column) = self.columns.get_mut(index) {
            column.name = format!("{} {}", column.name, label);
        }
    }
    /// Adds a derived column (for example the filtered current).
    pub fn with_column(mut self, column: Column, values: &[f64]) -> Result<Self, ScanError> {
        if values.len() != self.len() {
            return Err(ScanError::CurveShape(format!(
                "derived column has {} values for {} packages",
                values.len(),
                self.len()
            )));
        }
        let extra = ArrayView1::from(values);
        self.data
            .push_column(extra)
            .map_err(|e| ScanError::CurveShape(e.to_string()))?;
        self.columns.push(column);
        Ok(self)
    }
    /// Appends the value columns of `other`, dropping its potential column.
    /// Rows missing on either side are filled with NaN.
    pub fn append_scan(&self, other: &Curve) -> Curve {
        let rows = self.len().max(other.len());
        let extra = other.data.ncols().saturating_sub(1);
        let mut data = Array2::from_elem((rows, self.data.ncols() + extra), f64::NAN);
        data.slice_mut(s![..self.len(), ..self.data.ncols()])
            .assign(&self.data);
        if extra > 0 {
            data.slice_mut(s![..other.len(), self.data.ncols()..])
                .assign(&other.data.slice(s![.., 1..]));
        }
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().skip(1).cloned());
        Curve { columns, data }
    }
    /// `(x, y)` pairs of column 0 against `y_column`, skipping NaN padding.
    pub fn points(&self, y_column: usize) -> Vec<(f64, f64)> {
        if y_column >= self.data.ncols() || self.data.ncols() == 0 {
            return Vec::new();
        }
        self.data
            .axis_iter(Axis(0))
            .map(|row| (row[0], row[y_column]))
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .collect()
    }
}
