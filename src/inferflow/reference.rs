//! Reference Containers
//!
//! This module provides [`Reference`], the rectangular, named-axis value container
//! that inference steps read and write, together with the three combinators that
//! steps use to merge and transform references:
//!
//! - [`cross_product`]: merge references whose shared axes agree in extent
//! - [`cross_action`]: apply a reference of callables to a reference of values
//! - [`element_action`]: element-wise application over aligned references
//!
//! # Cells and the skip value
//!
//! Every cell of a reference is a [`Cell`]: a small discriminated union over the
//! scalar kinds steps produce, nested lists (cross products store the per-input
//! tuple of a cell as a list), and [`Applier`]s (callables stored by actuator
//! steps and consumed by [`cross_action`]). Missing cells are represented by the
//! reserved skip value [`Cell::Skip`], which serialises as the marker string
//! `"@#SKIP#@"`. Skip is a sentinel, not an error: combinators propagate it and
//! failed applications collapse to it, so a partially-populated reference flows
//! through a sequence without raising.
//!
//! # Shape invariants
//!
//! A reference always satisfies:
//! - axis count == extent count == data depth,
//! - every row is padded with skip to the axis extent,
//! - axis names are unique.
//!
//! [`Reference::set`] upholds the padding invariant by auto-extending an axis
//! when given an out-of-bounds index and filling the gap with skip.
//!
//! # Example
//!
//! ```rust
//! use inferflow::reference::{Cell, Reference};
//!
//! let mut grades = Reference::new(&["student", "assignment"], &[2, 3]).unwrap();
//! grades.set(Cell::Int(85), &[("student", 0), ("assignment", 0)]).unwrap();
//! grades.set(Cell::Int(90), &[("student", 0), ("assignment", 1)]).unwrap();
//!
//! // Out-of-bounds set extends the axis and pads with skip.
//! grades.set(Cell::Int(70), &[("student", 0), ("assignment", 4)]).unwrap();
//! assert_eq!(grades.extents(), &[2, 5]);
//! assert!(grades.get(&[("student", 0), ("assignment", 3)]).unwrap().is_skip());
//! ```

use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Wire representation of [`Cell::Skip`].
pub const SKIP_MARKER: &str = "@#SKIP#@";

/// Name of the synthetic axis produced by [`Reference::slice`] with an empty
/// selection. Removed automatically whenever at least one real axis remains.
pub const NONE_AXIS: &str = "_none_axis";

/// Errors produced by reference construction and combinators.
#[derive(Debug, Clone)]
pub enum ReferenceError {
    /// Axis name referenced but not present on the reference.
    UnknownAxis(String),
    /// The same axis name appears twice in a definition or selection.
    DuplicateAxis(String),
    /// Axis/extent/data arity disagreement.
    ShapeMismatch(String),
    /// A shared axis has different extents across inputs.
    ExtentMismatch(String),
    /// A cell expected to hold a callable held something else.
    NotCallable(String),
    /// An operation was given no inputs.
    EmptyInput(String),
    /// An applier failed in a way the caller chose not to collapse to skip.
    ApplyFailed(String),
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceError::UnknownAxis(msg) => write!(f, "Unknown axis: {}", msg),
            ReferenceError::DuplicateAxis(msg) => write!(f, "Duplicate axis: {}", msg),
            ReferenceError::ShapeMismatch(msg) => write!(f, "Shape mismatch: {}", msg),
            ReferenceError::ExtentMismatch(msg) => write!(f, "Extent mismatch: {}", msg),
            ReferenceError::NotCallable(msg) => write!(f, "Not callable: {}", msg),
            ReferenceError::EmptyInput(msg) => write!(f, "Empty input: {}", msg),
            ReferenceError::ApplyFailed(msg) => write!(f, "Apply failed: {}", msg),
        }
    }
}

impl Error for ReferenceError {}

/// Future type returned by [`Applier`] invocations.
pub type ApplyFuture = Pin<Box<dyn Future<Output = Result<Vec<Cell>, ReferenceError>> + Send>>;

/// A named, shareable callable stored inside reference cells.
///
/// Actuator steps fill references with appliers (for example a generation
/// function built from a prompt template and a language model); the
/// [`cross_action`] combinator later applies them to value cells. Appliers are
/// async because the underlying work may be a tool call; pure appliers can be
/// built with [`Applier::sync`].
#[derive(Clone)]
pub struct Applier {
    name: Arc<str>,
    func: Arc<dyn Fn(Cell) -> ApplyFuture + Send + Sync>,
}

impl Applier {
    /// Create an applier from an async closure.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Cell) -> ApplyFuture + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            func: Arc::new(func),
        }
    }

    /// Create an applier from a synchronous closure.
    pub fn sync<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Cell) -> Result<Vec<Cell>, ReferenceError> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        Self::new(name, move |input| {
            let func = func.clone();
            Box::pin(async move { func(input) })
        })
    }

    /// Invoke the applier on one input cell.
    pub async fn apply(&self, input: Cell) -> Result<Vec<Cell>, ReferenceError> {
        (self.func)(input).await
    }

    /// Name of the applier, used for diagnostics and serialisation.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Applier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Applier({})", self.name)
    }
}

/// One cell of a [`Reference`].
#[derive(Debug, Clone)]
pub enum Cell {
    /// The reserved skip value marking a missing cell.
    Skip,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Nested values: cross products store per-input tuples as lists, and
    /// appliers return their output rows as lists.
    List(Vec<Cell>),
    /// A callable consumed by [`cross_action`].
    Apply(Applier),
}

impl Cell {
    /// True when the cell is the reserved skip value.
    pub fn is_skip(&self) -> bool {
        matches!(self, Cell::Skip)
    }

    /// Convenience constructor for text cells.
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    /// Borrow the textual content of a text cell.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the applier of an apply cell.
    pub fn as_applier(&self) -> Option<&Applier> {
        match self {
            Cell::Apply(a) => Some(a),
            _ => None,
        }
    }

    /// True when the cell or any nested cell is skip.
    pub fn contains_skip(&self) -> bool {
        match self {
            Cell::Skip => true,
            Cell::List(items) => items.iter().any(Cell::contains_skip),
            _ => false,
        }
    }

    /// Convert a JSON value into a cell. The skip marker string becomes
    /// [`Cell::Skip`]; objects are rendered as their compact JSON text.
    pub fn from_json(value: &serde_json::Value) -> Cell {
        match value {
            serde_json::Value::Null => Cell::Null,
            serde_json::Value::Bool(b) => Cell::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Cell::Int(i)
                } else {
                    Cell::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) if s == SKIP_MARKER => Cell::Skip,
            serde_json::Value::String(s) => Cell::Text(s.clone()),
            serde_json::Value::Array(items) => {
                Cell::List(items.iter().map(Cell::from_json).collect())
            }
            other => Cell::Text(other.to_string()),
        }
    }

    /// Convert the cell into a JSON value. Skip becomes the marker string and
    /// appliers become an angle-bracketed placeholder carrying their name.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Cell::Skip => serde_json::Value::String(SKIP_MARKER.to_string()),
            Cell::Null => serde_json::Value::Null,
            Cell::Bool(b) => serde_json::Value::Bool(*b),
            Cell::Int(i) => serde_json::Value::from(*i),
            Cell::Float(x) => serde_json::Value::from(*x),
            Cell::Text(s) => serde_json::Value::String(s.clone()),
            Cell::List(items) => serde_json::Value::Array(items.iter().map(Cell::to_json).collect()),
            Cell::Apply(a) => serde_json::Value::String(format!("<applier:{}>", a.name())),
        }
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Cell::Skip, Cell::Skip) => true,
            (Cell::Null, Cell::Null) => true,
            (Cell::Bool(a), Cell::Bool(b)) => a == b,
            (Cell::Int(a), Cell::Int(b)) => a == b,
            (Cell::Float(a), Cell::Float(b)) => a == b,
            (Cell::Text(a), Cell::Text(b)) => a == b,
            (Cell::List(a), Cell::List(b)) => a == b,
            // Appliers compare by name: two generation functions built from the
            // same template are interchangeable for workspace bookkeeping.
            (Cell::Apply(a), Cell::Apply(b)) => a.name() == b.name(),
            _ => false,
        }
    }
}

/// Per-axis selection used by [`Reference::get`] internals: a fixed index or
/// the whole axis.
#[derive(Debug, Clone, Copy, PartialEq)]
enum AxisSelect {
    At(usize),
    All,
}

/// A rectangular, named-axis container of [`Cell`]s.
///
/// Storage is row-major over the axis extents; the nested-list view the wire
/// format uses is produced on demand by [`Reference::tensor`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    axes: Vec<String>,
    extents: Vec<usize>,
    data: Vec<Cell>,
}

impl Reference {
    /// Create a reference with the given axes and extents, every cell null.
    pub fn new(axes: &[&str], extents: &[usize]) -> Result<Self, ReferenceError> {
        Self::filled(axes, extents, Cell::Null)
    }

    /// Create a reference with every cell set to `fill`.
    pub fn filled(axes: &[&str], extents: &[usize], fill: Cell) -> Result<Self, ReferenceError> {
        if axes.len() != extents.len() {
            return Err(ReferenceError::ShapeMismatch(format!(
                "{} axes vs {} extents",
                axes.len(),
                extents.len()
            )));
        }
        let mut seen = HashSet::new();
        for axis in axes {
            if !seen.insert(*axis) {
                return Err(ReferenceError::DuplicateAxis((*axis).to_string()));
            }
        }
        if extents.iter().any(|&e| e == 0) {
            return Err(ReferenceError::ShapeMismatch(
                "extents must be positive".to_string(),
            ));
        }
        let len = extents.iter().product::<usize>();
        Ok(Self {
            axes: axes.iter().map(|s| s.to_string()).collect(),
            extents: extents.to_vec(),
            data: vec![fill; len],
        })
    }

    /// Build a one-axis reference from a list of cells.
    pub fn from_values(axis: &str, values: Vec<Cell>) -> Result<Self, ReferenceError> {
        if values.is_empty() {
            return Err(ReferenceError::EmptyInput(format!(
                "no values for axis '{}'",
                axis
            )));
        }
        let mut reference = Self::filled(&[axis], &[values.len()], Cell::Skip)?;
        reference.data = values;
        Ok(reference)
    }

    /// Create a reference from nested data, discovering the extents.
    ///
    /// The nesting depth that counts as axes is `axis_names.len()` when names
    /// are given; deeper lists stay as leaf cells. Without names, the full
    /// nesting depth of the first spine is used and axes are named `axis_0`,
    /// `axis_1`, … Irregular rows are padded with skip.
    pub fn from_data(data: &Cell, axis_names: Option<&[&str]>) -> Result<Self, ReferenceError> {
        let rank = match axis_names {
            Some(names) => names.len(),
            None => nesting_depth(data),
        };
        if rank == 0 {
            return Err(ReferenceError::EmptyInput(
                "data must be a nested list".to_string(),
            ));
        }
        let mut extents = vec![0usize; rank];
        measure_extents(data, 0, &mut extents);
        if extents.iter().any(|&e| e == 0) {
            return Err(ReferenceError::EmptyInput(
                "data has an empty dimension".to_string(),
            ));
        }
        let owned_names: Vec<String> = match axis_names {
            Some(names) => names.iter().map(|s| s.to_string()).collect(),
            None => (0..rank).map(|i| format!("axis_{}", i)).collect(),
        };
        let name_refs: Vec<&str> = owned_names.iter().map(|s| s.as_str()).collect();
        let mut reference = Self::filled(&name_refs, &extents, Cell::Skip)?;
        fill_from_nested(&mut reference, data, &mut Vec::new());
        Ok(reference)
    }

    /// Ordered axis names.
    pub fn axes(&self) -> &[String] {
        &self.axes
    }

    /// Extents, in axis order.
    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    /// Position of an axis by name.
    pub fn axis_index(&self, axis: &str) -> Option<usize> {
        self.axes.iter().position(|a| a == axis)
    }

    /// Rename one axis, keeping data and extents.
    pub fn rename_axis(&mut self, from: &str, to: &str) -> Result<(), ReferenceError> {
        if self.axes.iter().any(|a| a == to) && from != to {
            return Err(ReferenceError::DuplicateAxis(to.to_string()));
        }
        match self.axes.iter_mut().find(|a| a.as_str() == from) {
            Some(slot) => {
                *slot = to.to_string();
                Ok(())
            }
            None => Err(ReferenceError::UnknownAxis(from.to_string())),
        }
    }

    fn selection(&self, indices: &[(&str, usize)]) -> Result<Vec<AxisSelect>, ReferenceError> {
        for (axis, _) in indices {
            if self.axis_index(axis).is_none() {
                return Err(ReferenceError::UnknownAxis(format!(
                    "'{}' not in {:?}",
                    axis, self.axes
                )));
            }
        }
        Ok(self
            .axes
            .iter()
            .map(|axis| {
                indices
                    .iter()
                    .find(|(name, _)| *name == axis.as_str())
                    .map(|(_, i)| AxisSelect::At(*i))
                    .unwrap_or(AxisSelect::All)
            })
            .collect())
    }

    /// Get cells by named indices. Axes not mentioned are sliced whole, so the
    /// result is a scalar cell when every axis is fixed and nested lists
    /// otherwise. Out-of-bounds indices yield skip.
    pub fn get(&self, indices: &[(&str, usize)]) -> Result<Cell, ReferenceError> {
        let selection = self.selection(indices)?;
        Ok(self.get_selected(&selection, 0, 0))
    }

    fn stride(&self, axis: usize) -> usize {
        self.extents[axis + 1..].iter().product()
    }

    fn get_selected(&self, selection: &[AxisSelect], axis: usize, offset: usize) -> Cell {
        if axis == self.axes.len() {
            return self.data[offset].clone();
        }
        let stride = self.stride(axis);
        match selection[axis] {
            AxisSelect::At(i) => {
                if i >= self.extents[axis] {
                    Cell::Skip
                } else {
                    self.get_selected(selection, axis + 1, offset + i * stride)
                }
            }
            AxisSelect::All => Cell::List(
                (0..self.extents[axis])
                    .map(|i| self.get_selected(selection, axis + 1, offset + i * stride))
                    .collect(),
            ),
        }
    }

    /// Set cells by named indices. Axes not mentioned are broadcast across.
    /// An out-of-bounds index extends that axis, padding new cells with skip.
    pub fn set(&mut self, value: Cell, indices: &[(&str, usize)]) -> Result<(), ReferenceError> {
        for (axis, index) in indices {
            let position = self
                .axis_index(axis)
                .ok_or_else(|| ReferenceError::UnknownAxis((*axis).to_string()))?;
            if *index >= self.extents[position] {
                self.extend_axis(position, index + 1);
            }
        }
        let selection = self.selection(indices)?;
        self.set_selected(&selection, 0, 0, &value);
        Ok(())
    }

    fn set_selected(&mut self, selection: &[AxisSelect], axis: usize, offset: usize, value: &Cell) {
        if axis == self.axes.len() {
            self.data[offset] = value.clone();
            return;
        }
        let stride = self.stride(axis);
        match selection[axis] {
            AxisSelect::At(i) => self.set_selected(selection, axis + 1, offset + i * stride, value),
            AxisSelect::All => {
                for i in 0..self.extents[axis] {
                    self.set_selected(selection, axis + 1, offset + i * stride, value);
                }
            }
        }
    }

    /// Grow one axis to `new_extent`, padding fresh cells with skip.
    fn extend_axis(&mut self, axis: usize, new_extent: usize) {
        let old = std::mem::replace(&mut self.data, Vec::new());
        let old_extents = self.extents.clone();
        self.extents[axis] = new_extent;
        let len = self.extents.iter().product::<usize>();
        self.data = vec![Cell::Skip; len];
        // Copy every old cell to its position under the widened layout.
        let mut index = vec![0usize; old_extents.len()];
        for cell in old {
            let mut offset = 0;
            for (position, &i) in index.iter().enumerate() {
                offset += i * self.stride(position);
            }
            self.data[offset] = cell;
            for position in (0..index.len()).rev() {
                index[position] += 1;
                if index[position] < old_extents[position] {
                    break;
                }
                index[position] = 0;
            }
        }
    }

    /// Nested-list view of the data, skip cells included.
    pub fn tensor(&self) -> Cell {
        self.get_selected(&vec![AxisSelect::All; self.axes.len()], 0, 0)
    }

    /// Nested-list view with skip cells elided row-wise.
    pub fn tensor_without_skip(&self) -> Cell {
        fn strip(cell: &Cell) -> Option<Cell> {
            match cell {
                Cell::Skip => None,
                Cell::List(items) => {
                    let kept: Vec<Cell> = items.iter().filter_map(strip).collect();
                    if kept.is_empty() {
                        None
                    } else {
                        Some(Cell::List(kept))
                    }
                }
                other => Some(other.clone()),
            }
        }
        strip(&self.tensor()).unwrap_or(Cell::List(Vec::new()))
    }

    /// Select `selected_axes` and collapse the rest.
    ///
    /// Each result cell holds the sub-tensor over the unselected axes; a
    /// sub-tensor containing any skip collapses to skip. An empty selection
    /// yields a single-cell reference on the synthetic [`NONE_AXIS`].
    pub fn slice(&self, selected_axes: &[&str]) -> Result<Reference, ReferenceError> {
        if selected_axes.is_empty() {
            let mut reference = Reference::filled(&[NONE_AXIS], &[1], Cell::Skip)?;
            reference.data[0] = self.tensor();
            return Ok(reference);
        }
        let mut seen = HashSet::new();
        for axis in selected_axes {
            if self.axis_index(axis).is_none() {
                return Err(ReferenceError::UnknownAxis(format!(
                    "'{}' not in {:?}",
                    axis, self.axes
                )));
            }
            if !seen.insert(*axis) {
                return Err(ReferenceError::DuplicateAxis((*axis).to_string()));
            }
        }
        let new_extents: Vec<usize> = selected_axes
            .iter()
            .map(|axis| self.extents[self.axis_index(axis).unwrap()])
            .collect();
        let mut reference = Reference::filled(selected_axes, &new_extents, Cell::Skip)?;
        let mut index = vec![0usize; selected_axes.len()];
        loop {
            let fixed: Vec<(&str, usize)> = selected_axes
                .iter()
                .zip(index.iter())
                .map(|(axis, &i)| (*axis, i))
                .collect();
            let sub = self.get(&fixed)?;
            let cell = if sub.contains_skip() { Cell::Skip } else { sub };
            reference.set(cell, &fixed)?;
            if !advance(&mut index, &new_extents) {
                break;
            }
        }
        Ok(reference)
    }

    /// Apply a named-axes view: select the listed axes, or all axes when the
    /// view is empty.
    pub fn shape_view(&self, view: &[&str]) -> Result<Reference, ReferenceError> {
        if view.is_empty() {
            let all: Vec<&str> = self.axes.iter().map(|s| s.as_str()).collect();
            self.slice(&all)
        } else {
            self.slice(view)
        }
    }

    /// Remove the synthetic [`NONE_AXIS`] when at least one real axis remains.
    pub fn without_none_axis(self) -> Reference {
        if self.axes.len() <= 1 {
            return self;
        }
        let position = match self.axes.iter().position(|a| a == NONE_AXIS) {
            Some(p) => p,
            None => return self,
        };
        let mut axes: Vec<String> = self.axes.clone();
        axes.remove(position);
        let mut extents = self.extents.clone();
        extents.remove(position);
        let names: Vec<&str> = axes.iter().map(|s| s.as_str()).collect();
        let mut result = Reference::filled(&names, &extents, Cell::Skip)
            .unwrap_or_else(|_| self.clone());
        let mut index = vec![0usize; extents.len()];
        loop {
            let mut fixed: Vec<(&str, usize)> = names
                .iter()
                .zip(index.iter())
                .map(|(axis, &i)| (*axis, i))
                .collect();
            fixed.push((NONE_AXIS, 0));
            if let Ok(cell) = self.get(&fixed) {
                let target: Vec<(&str, usize)> = fixed[..fixed.len() - 1].to_vec();
                let _ = result.set(cell, &target);
            }
            if !advance(&mut index, &extents) {
                break;
            }
        }
        result
    }

    /// JSON view of the reference for events and the working configuration.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "axes": self.axes,
            "shape": self.extents,
            "data": self.tensor().to_json(),
        })
    }
}

fn advance(index: &mut [usize], extents: &[usize]) -> bool {
    for position in (0..index.len()).rev() {
        index[position] += 1;
        if index[position] < extents[position] {
            return true;
        }
        index[position] = 0;
    }
    false
}

fn nesting_depth(cell: &Cell) -> usize {
    match cell {
        Cell::List(items) => 1 + items.iter().map(nesting_depth).max().unwrap_or(0),
        _ => 0,
    }
}

fn measure_extents(cell: &Cell, depth: usize, extents: &mut [usize]) {
    if depth == extents.len() {
        return;
    }
    if let Cell::List(items) = cell {
        if items.len() > extents[depth] {
            extents[depth] = items.len();
        }
        for item in items {
            measure_extents(item, depth + 1, extents);
        }
    }
}

fn fill_from_nested(reference: &mut Reference, cell: &Cell, index: &mut Vec<usize>) {
    if index.len() == reference.axes.len() {
        let axes = reference.axes.clone();
        let fixed: Vec<(&str, usize)> = axes
            .iter()
            .zip(index.iter())
            .map(|(axis, &i)| (axis.as_str(), i))
            .collect();
        let _ = reference.set(cell.clone(), &fixed);
        return;
    }
    if let Cell::List(items) = cell {
        for (i, item) in items.iter().enumerate() {
            index.push(i);
            fill_from_nested(reference, item, index);
            index.pop();
        }
    }
}

/// Merge references whose shared axes agree in extent.
///
/// The combined reference's axes are the ordered union of the input axes; each
/// cell holds the list of per-reference cells at the aligned indices. Any skip
/// input propagates to a skip cell. The synthetic [`NONE_AXIS`] is removed
/// from the result when a real axis remains.
pub fn cross_product(references: &[Reference]) -> Result<Reference, ReferenceError> {
    if references.is_empty() {
        return Err(ReferenceError::EmptyInput(
            "cross_product needs at least one reference".to_string(),
        ));
    }
    let (axes, extents) = combined_axes(references)?;
    let names: Vec<&str> = axes.iter().map(|s| s.as_str()).collect();
    let mut result = Reference::filled(&names, &extents, Cell::Skip)?;
    let mut index = vec![0usize; axes.len()];
    loop {
        let mut cells = Vec::with_capacity(references.len());
        let mut skip = false;
        for reference in references {
            let fixed = project(reference, &axes, &index);
            let cell = reference.get(&fixed)?;
            if cell.is_skip() {
                skip = true;
                break;
            }
            cells.push(cell);
        }
        let fixed: Vec<(&str, usize)> = names
            .iter()
            .zip(index.iter())
            .map(|(axis, &i)| (*axis, i))
            .collect();
        result.set(if skip { Cell::Skip } else { Cell::List(cells) }, &fixed)?;
        if !advance(&mut index, &extents) {
            break;
        }
    }
    Ok(result.without_none_axis())
}

/// Apply a reference of callables to a reference of values.
///
/// `a` holds [`Applier`] cells and `b` holds their inputs. The result cell at
/// (a-indices, b-indices) is the applier's output row laid along a trailing
/// axis named `new_axis`; a skip operand or a failed application collapses to
/// skip. The trailing extent is the longest produced row, shorter rows padded
/// with skip.
pub async fn cross_action(
    a: &Reference,
    b: &Reference,
    new_axis: &str,
) -> Result<Reference, ReferenceError> {
    let inputs = [a.clone(), b.clone()];
    let (axes, extents) = combined_axes(&inputs)?;
    if axes.iter().any(|axis| axis == new_axis) {
        return Err(ReferenceError::DuplicateAxis(new_axis.to_string()));
    }

    let mut rows: Vec<Option<Vec<Cell>>> = Vec::new();
    let mut index = vec![0usize; axes.len()];
    let mut trailing = 1usize;
    loop {
        let func_cell = a.get(&project(a, &axes, &index))?;
        let input_cell = b.get(&project(b, &axes, &index))?;
        let row = if func_cell.is_skip() || input_cell.is_skip() {
            None
        } else {
            let applier = func_cell
                .as_applier()
                .ok_or_else(|| {
                    ReferenceError::NotCallable(format!("cell at {:?} in A", index))
                })?
                .clone();
            match applier.apply(input_cell).await {
                Ok(cells) if cells.iter().any(Cell::is_skip) => None,
                Ok(cells) => Some(cells),
                Err(_) => None,
            }
        };
        if let Some(ref cells) = row {
            if cells.len() > trailing {
                trailing = cells.len();
            }
        }
        rows.push(row);
        if !advance(&mut index, &extents) {
            break;
        }
    }

    let mut result_axes: Vec<&str> = axes.iter().map(|s| s.as_str()).collect();
    result_axes.push(new_axis);
    let mut result_extents = extents.clone();
    result_extents.push(trailing);
    let mut result = Reference::filled(&result_axes, &result_extents, Cell::Skip)?;

    let mut index = vec![0usize; axes.len()];
    let mut row_iter = rows.into_iter();
    loop {
        let row = row_iter.next().unwrap_or(None);
        if let Some(cells) = row {
            for (i, cell) in cells.into_iter().enumerate() {
                let mut fixed: Vec<(&str, usize)> = axes
                    .iter()
                    .zip(index.iter())
                    .map(|(axis, &j)| (axis.as_str(), j))
                    .collect();
                fixed.push((new_axis, i));
                result.set(cell, &fixed)?;
            }
        }
        if !advance(&mut index, &extents) {
            break;
        }
    }
    Ok(result.without_none_axis())
}

/// Element-wise application over aligned references.
///
/// `f` receives the per-reference cells at each aligned index, plus the index
/// map when `index_awareness` is set. Any skip input or `f` error yields a
/// skip cell. Pure: `f` must not perform I/O.
pub fn element_action<F>(
    f: F,
    references: &[Reference],
    index_awareness: bool,
) -> Result<Reference, ReferenceError>
where
    F: Fn(&[Cell], Option<&[(String, usize)]>) -> Result<Cell, ReferenceError>,
{
    if references.is_empty() {
        return Err(ReferenceError::EmptyInput(
            "element_action needs at least one reference".to_string(),
        ));
    }
    let (axes, extents) = combined_axes(references)?;
    let names: Vec<&str> = axes.iter().map(|s| s.as_str()).collect();
    let mut result = Reference::filled(&names, &extents, Cell::Skip)?;
    let mut index = vec![0usize; axes.len()];
    loop {
        let mut cells = Vec::with_capacity(references.len());
        let mut skip = false;
        for reference in references {
            let cell = reference.get(&project(reference, &axes, &index))?;
            if cell.is_skip() {
                skip = true;
            }
            cells.push(cell);
        }
        let fixed: Vec<(&str, usize)> = names
            .iter()
            .zip(index.iter())
            .map(|(axis, &i)| (*axis, i))
            .collect();
        let cell = if skip {
            Cell::Skip
        } else {
            let index_map: Vec<(String, usize)> = axes
                .iter()
                .zip(index.iter())
                .map(|(axis, &i)| (axis.clone(), i))
                .collect();
            let view = if index_awareness {
                Some(index_map.as_slice())
            } else {
                None
            };
            f(&cells, view).unwrap_or(Cell::Skip)
        };
        result.set(cell, &fixed)?;
        if !advance(&mut index, &extents) {
            break;
        }
    }
    Ok(result.without_none_axis())
}

/// Ordered union of axes with extent agreement checking.
fn combined_axes(references: &[Reference]) -> Result<(Vec<String>, Vec<usize>), ReferenceError> {
    let mut axes: Vec<String> = Vec::new();
    let mut extents: Vec<usize> = Vec::new();
    for reference in references {
        for (position, axis) in reference.axes.iter().enumerate() {
            match axes.iter().position(|a| a == axis) {
                None => {
                    axes.push(axis.clone());
                    extents.push(reference.extents[position]);
                }
                Some(existing) => {
                    if extents[existing] != reference.extents[position] {
                        return Err(ReferenceError::ExtentMismatch(format!(
                            "axis '{}': {} vs {}",
                            axis, reference.extents[position], extents[existing]
                        )));
                    }
                }
            }
        }
    }
    Ok((axes, extents))
}

/// Project a combined index onto the axes one reference actually has.
fn project<'a>(
    reference: &'a Reference,
    axes: &'a [String],
    index: &[usize],
) -> Vec<(&'a str, usize)> {
    reference
        .axes
        .iter()
        .filter_map(|axis| {
            axes.iter()
                .position(|a| a == axis)
                .map(|position| (axis.as_str(), index[position]))
        })
        .collect()
}
