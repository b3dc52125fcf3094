//! Grouper
//!
//! Grouped reductions over references, in the two composition patterns that
//! grouping steps use:
//!
//! - **AND-IN** ([`Grouper::and_in`]): every input contributes to every result
//!   cell. Each input is annotated with its label, the annotated references
//!   are cross-producted on their shared axes, and a template is applied per
//!   cell.
//! - **OR-ACROSS** ([`Grouper::or_across`]): alternatives are flattened. The
//!   input is sliced down to the group axes, each collapsed cell is flattened
//!   into its list of leaves, and a template is applied per cell.
//!
//! Templates use `{label}` placeholders for AND groups and `{items}` for OR
//! groups; without a template, annotated parts are joined with `", "`. The
//! grouper is pure: no I/O, skip cells propagate.

use crate::inferflow::reference::{
    cross_product, element_action, Cell, Reference, ReferenceError,
};
use std::error::Error;
use std::fmt;

/// Errors raised by grouped reductions.
#[derive(Debug, Clone)]
pub enum GrouperError {
    /// No inputs were provided.
    EmptyGroup(String),
    /// An underlying reference operation failed.
    Reference(ReferenceError),
}

impl fmt::Display for GrouperError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrouperError::EmptyGroup(msg) => write!(f, "Empty group: {}", msg),
            GrouperError::Reference(err) => write!(f, "Reference operation failed: {}", err),
        }
    }
}

impl Error for GrouperError {}

impl From<ReferenceError> for GrouperError {
    fn from(err: ReferenceError) -> Self {
        GrouperError::Reference(err)
    }
}

/// Render a cell for annotation and template substitution.
fn render_cell(cell: &Cell) -> String {
    match cell {
        Cell::Skip => String::new(),
        Cell::Null => String::new(),
        Cell::Bool(b) => b.to_string(),
        Cell::Int(i) => i.to_string(),
        Cell::Float(x) => x.to_string(),
        Cell::Text(s) => s.clone(),
        Cell::List(items) => items
            .iter()
            .map(render_cell)
            .collect::<Vec<_>>()
            .join(", "),
        Cell::Apply(a) => format!("<applier:{}>", a.name()),
    }
}

/// Flatten a cell into its leaf renderings.
fn flatten_cell(cell: &Cell, out: &mut Vec<String>) {
    match cell {
        Cell::List(items) => {
            for item in items {
                flatten_cell(item, out);
            }
        }
        Cell::Skip | Cell::Null => {}
        other => out.push(render_cell(other)),
    }
}

/// One labelled input to an AND group.
#[derive(Debug, Clone)]
pub struct GroupInput {
    /// Annotation label; also the template placeholder name.
    pub label: String,
    pub reference: Reference,
    /// Axes to keep before crossing; empty keeps every axis. When the group
    /// keeps all but the innermost axis, the innermost is collapsed into the
    /// cell, which is what "slice out the innermost axis" means here.
    pub keep_axes: Vec<String>,
}

impl GroupInput {
    pub fn new(label: impl Into<String>, reference: Reference) -> Self {
        Self {
            label: label.into(),
            reference,
            keep_axes: Vec::new(),
        }
    }

    pub fn with_keep_axes(mut self, keep_axes: &[&str]) -> Self {
        self.keep_axes = keep_axes.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Grouped reductions over references.
pub struct Grouper;

impl Grouper {
    /// Annotate each input cell with its label: `"<label>: <value>"`.
    fn annotate(input: &GroupInput) -> Result<Reference, GrouperError> {
        let label = input.label.clone();
        let annotated = element_action(
            move |cells, _| {
                Ok(Cell::Text(format!("{}: {}", label, render_cell(&cells[0]))))
            },
            &[input.reference.clone()],
            false,
        )?;
        Ok(annotated)
    }

    /// AND-IN composition: annotate, optionally slice each input down to its
    /// `keep_axes`, cross-product on shared axes, then apply `template` per
    /// cell (placeholders `{label}`; default is `", "`-joined annotations).
    pub fn and_in(
        inputs: &[GroupInput],
        template: Option<&str>,
    ) -> Result<Reference, GrouperError> {
        if inputs.is_empty() {
            return Err(GrouperError::EmptyGroup(
                "and_in needs at least one input".to_string(),
            ));
        }
        let mut annotated = Vec::with_capacity(inputs.len());
        for input in inputs {
            let mut reference = Self::annotate(input)?;
            if !input.keep_axes.is_empty() {
                let keep: Vec<&str> = input.keep_axes.iter().map(|s| s.as_str()).collect();
                reference = reference.slice(&keep)?;
            }
            annotated.push(reference);
        }
        let crossed = cross_product(&annotated)?;

        let labels: Vec<String> = inputs.iter().map(|i| i.label.clone()).collect();
        let template = template.map(|t| t.to_string());
        let composed = element_action(
            move |cells, _| {
                // Each crossed cell is the list of per-input annotations.
                let parts: Vec<String> = match &cells[0] {
                    Cell::List(items) => items.iter().map(render_cell).collect(),
                    other => vec![render_cell(other)],
                };
                let text = match &template {
                    None => parts.join(", "),
                    Some(template) => {
                        let mut text = template.clone();
                        for (label, part) in labels.iter().zip(parts.iter()) {
                            text = text.replace(&format!("{{{}}}", label), part);
                        }
                        text
                    }
                };
                Ok(Cell::Text(text))
            },
            &[crossed],
            false,
        )?;
        Ok(composed)
    }

    /// OR-ACROSS composition: slice the input down to `group_axes`, flatten
    /// each collapsed cell into its leaves, and apply `template` per cell
    /// (placeholder `{items}`; default is `", "`-joined leaves).
    pub fn or_across(
        input: &Reference,
        group_axes: &[&str],
        template: Option<&str>,
    ) -> Result<Reference, GrouperError> {
        let sliced = input.slice(group_axes)?;
        let template = template.map(|t| t.to_string());
        let flattened = element_action(
            move |cells, _| {
                let mut leaves = Vec::new();
                flatten_cell(&cells[0], &mut leaves);
                let joined = leaves.join(", ");
                let text = match &template {
                    None => joined,
                    Some(template) => template.replace("{items}", &joined),
                };
                Ok(Cell::Text(text))
            },
            &[sliced],
            false,
        )?;
        Ok(flattened)
    }
}
