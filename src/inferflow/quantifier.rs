//! Quantifier
//!
//! The [`Quantifier`] drives an iterated reduction over the elements of a
//! "to-loop" reference: a quantifying step retrieves the next unprocessed base
//! element, downstream steps compute per-element results and store them back,
//! and once every base element has been looped the per-concept results are
//! combined into a single reference.
//!
//! All quantifier storage lives in one workspace [`Subspace`] keyed by
//! `"<loop_index>_<loop_base_concept_name>"`, so a re-entrant sequence picks
//! up exactly where the previous pass left off. Inside the subspace, stored
//! elements are keyed `loop_index → concept_name → Reference` with 1-based
//! loop indices.
//!
//! The quantifier is pure over its workspace: it performs no I/O.

use crate::inferflow::reference::{element_action, cross_product, Cell, Reference, ReferenceError};
use crate::inferflow::state::{Subspace, Workspace};
use std::error::Error;
use std::fmt;

/// Errors raised by quantifier bookkeeping.
#[derive(Debug, Clone)]
pub enum QuantifierError {
    /// An in-loop element was stored against a base element that was never
    /// itself stored.
    BaseNotStored(String),
    /// An underlying reference operation failed.
    Reference(ReferenceError),
}

impl fmt::Display for QuantifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuantifierError::BaseNotStored(msg) => {
                write!(f, "Base element not in subspace: {}", msg)
            }
            QuantifierError::Reference(err) => write!(f, "Reference operation failed: {}", err),
        }
    }
}

impl Error for QuantifierError {}

impl From<ReferenceError> for QuantifierError {
    fn from(err: ReferenceError) -> Self {
        QuantifierError::Reference(err)
    }
}

/// Iterated reduction over a workspace subspace.
pub struct Quantifier<'a> {
    subspace: &'a mut Subspace,
    loop_base_concept_name: String,
}

impl<'a> Quantifier<'a> {
    /// Open (or create) the subspace for `loop_base_concept_name` at
    /// `loop_concept_index` inside the run's workspace.
    pub fn new(
        workspace: &'a mut Workspace,
        loop_base_concept_name: &str,
        loop_concept_index: usize,
    ) -> Self {
        let key = Workspace::subspace_key(loop_concept_index, loop_base_concept_name);
        log::debug!(
            "quantifier opening subspace '{}' for base concept '{}'",
            key,
            loop_base_concept_name
        );
        Self {
            subspace: workspace.subspace_mut(&key),
            loop_base_concept_name: loop_base_concept_name.to_string(),
        }
    }

    /// Extract the element at `position` from every cell of `to_loop`.
    ///
    /// Cells that are not lists, or too short, yield null; the element
    /// reference keeps the axes of `to_loop`.
    fn element_at(to_loop: &Reference, position: usize) -> Result<Reference, ReferenceError> {
        element_action(
            |cells, _| {
                Ok(match &cells[0] {
                    Cell::List(items) if position < items.len() => items[position].clone(),
                    _ => Cell::Null,
                })
            },
            &[to_loop.clone()],
            false,
        )
    }

    /// True when every leaf of the tensor is null or skip: the position is
    /// past the end of every cell's element list.
    fn is_exhausted(cell: &Cell) -> bool {
        match cell {
            Cell::Null | Cell::Skip => true,
            Cell::List(items) => items.iter().all(Self::is_exhausted),
            _ => false,
        }
    }

    /// Loop index the base element is stored under, if it is stored.
    fn stored_index_of(&self, base: &Reference) -> Option<usize> {
        self.subspace.loop_indices().into_iter().find(|&index| {
            self.subspace
                .get(index, &self.loop_base_concept_name)
                .map(|stored| stored.tensor() == base.tensor())
                .unwrap_or(false)
        })
    }

    /// Return the next element of `to_loop` that has not been processed, as
    /// `(element_reference, element_position)`; skips the provided current
    /// element and any element already stored in the subspace. `None` when all
    /// elements are consumed.
    pub fn retrieve_next_base_element(
        &self,
        to_loop: &Reference,
        current: Option<&Reference>,
    ) -> Result<Option<(Reference, usize)>, QuantifierError> {
        let mut position = 0usize;
        loop {
            let element = Self::element_at(to_loop, position)?;
            if Self::is_exhausted(&element.tensor()) {
                return Ok(None);
            }
            if let Some(current) = current {
                if element.tensor() == current.tensor() {
                    position += 1;
                    continue;
                }
            }
            if self.stored_index_of(&element).is_some() {
                position += 1;
                continue;
            }
            return Ok(Some((element, position)));
        }
    }

    /// Store a base element, reusing its loop index if it is already present.
    /// Returns the loop index used.
    pub fn store_new_base_element(&mut self, base: Reference) -> usize {
        let loop_index = self
            .stored_index_of(&base)
            .unwrap_or_else(|| self.subspace.next_loop_index());
        let name = self.loop_base_concept_name.clone();
        self.subspace.insert(loop_index, &name, base);
        loop_index
    }

    /// Store an in-loop element under `concept_name`, attached to the loop
    /// index of its base element. The base must already be stored.
    pub fn store_new_in_loop_element(
        &mut self,
        base: &Reference,
        concept_name: &str,
        reference: Reference,
    ) -> Result<usize, QuantifierError> {
        let loop_index = self.stored_index_of(base).ok_or_else(|| {
            QuantifierError::BaseNotStored(format!(
                "no '{}' entry matching the given base",
                self.loop_base_concept_name
            ))
        })?;
        self.subspace.insert(loop_index, concept_name, reference);
        Ok(loop_index)
    }

    /// True when every element of `to_loop` has a stored base entry, and
    /// (when `in_loop_name` is given) a stored in-loop entry as well.
    pub fn check_all_base_elements_looped(
        &self,
        to_loop: &Reference,
        in_loop_name: Option<&str>,
    ) -> Result<bool, QuantifierError> {
        let mut position = 0usize;
        loop {
            let element = Self::element_at(to_loop, position)?;
            if Self::is_exhausted(&element.tensor()) {
                return Ok(true);
            }
            match self.stored_index_of(&element) {
                None => return Ok(false),
                Some(loop_index) => {
                    if let Some(name) = in_loop_name {
                        if !self.subspace.has_concept(loop_index, name) {
                            return Ok(false);
                        }
                    }
                }
            }
            position += 1;
        }
    }

    /// Cross-product the stored references for `concept_name` across loop
    /// indices, in element order of `to_loop`, renaming the trailing axis to
    /// the concept's axis. `None` when nothing was stored for the concept.
    pub fn combine_all_looped_elements_by_concept(
        &self,
        to_loop: &Reference,
        concept_name: &str,
    ) -> Result<Option<Reference>, QuantifierError> {
        let mut collected: Vec<Reference> = Vec::new();
        let mut position = 0usize;
        loop {
            let element = Self::element_at(to_loop, position)?;
            if Self::is_exhausted(&element.tensor()) {
                break;
            }
            match self.stored_index_of(&element) {
                Some(loop_index) => {
                    if let Some(reference) = self.subspace.get(loop_index, concept_name) {
                        collected.push(reference.clone());
                    } else {
                        log::warn!(
                            "no '{}' stored for loop index {}",
                            concept_name,
                            loop_index
                        );
                    }
                }
                None => {
                    log::warn!("element at position {} was never stored", position);
                }
            }
            position += 1;
        }
        if collected.is_empty() {
            return Ok(None);
        }
        let mut combined = cross_product(&collected)?;
        if combined.axis_index(concept_name).is_none() {
            if let Some(last) = combined.axes().last().cloned() {
                let _ = combined.rename_axis(&last, concept_name);
            }
        }
        Ok(Some(combined))
    }

    /// Retrieve the in-loop element for `concept_name` at
    /// `current_loop_index - carry_index` (carry-over mode). `None` while the
    /// loop has not yet produced a value to carry.
    pub fn retrieve_next_in_loop_element(
        &self,
        concept_name: &str,
        current_loop_index: usize,
        carry_index: usize,
    ) -> Option<Reference> {
        if current_loop_index > carry_index {
            self.subspace
                .get(current_loop_index - carry_index, concept_name)
                .cloned()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A to-loop reference whose single cell holds the element list.
    fn to_loop(values: &[&str]) -> Reference {
        let cells = vec![Cell::List(values.iter().map(|v| Cell::text(*v)).collect())];
        Reference::from_values("group", cells).unwrap()
    }

    #[test]
    fn retrieves_elements_in_order_and_skips_stored() {
        let mut workspace = Workspace::new();
        let mut quantifier = Quantifier::new(&mut workspace, "item", 0);
        let source = to_loop(&["a", "b"]);

        let (first, position) = quantifier
            .retrieve_next_base_element(&source, None)
            .unwrap()
            .unwrap();
        assert_eq!(position, 0);
        assert_eq!(first.get(&[("group", 0)]).unwrap(), Cell::text("a"));

        quantifier.store_new_base_element(first);
        let (second, position) = quantifier
            .retrieve_next_base_element(&source, None)
            .unwrap()
            .unwrap();
        assert_eq!(position, 1);
        assert_eq!(second.get(&[("group", 0)]).unwrap(), Cell::text("b"));

        quantifier.store_new_base_element(second);
        assert!(quantifier
            .retrieve_next_base_element(&source, None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn loop_indices_start_at_one() {
        let mut workspace = Workspace::new();
        let mut quantifier = Quantifier::new(&mut workspace, "item", 0);
        let source = to_loop(&["a"]);
        let (element, _) = quantifier
            .retrieve_next_base_element(&source, None)
            .unwrap()
            .unwrap();
        assert_eq!(quantifier.store_new_base_element(element), 1);
    }

    #[test]
    fn storing_in_loop_requires_stored_base() {
        let mut workspace = Workspace::new();
        let mut quantifier = Quantifier::new(&mut workspace, "item", 0);
        let source = to_loop(&["a"]);
        let (element, _) = quantifier
            .retrieve_next_base_element(&source, None)
            .unwrap()
            .unwrap();

        let result = Reference::from_values("result", vec![Cell::text("A")]).unwrap();
        assert!(matches!(
            quantifier.store_new_in_loop_element(&element, "result", result.clone()),
            Err(QuantifierError::BaseNotStored(_))
        ));

        quantifier.store_new_base_element(element.clone());
        assert_eq!(
            quantifier
                .store_new_in_loop_element(&element, "result", result)
                .unwrap(),
            1
        );
    }

    #[test]
    fn termination_predicate_checks_in_loop_entries() {
        let mut workspace = Workspace::new();
        let mut quantifier = Quantifier::new(&mut workspace, "item", 0);
        let source = to_loop(&["a", "b"]);

        assert!(!quantifier
            .check_all_base_elements_looped(&source, None)
            .unwrap());

        while let Some((element, _)) = quantifier
            .retrieve_next_base_element(&source, None)
            .unwrap()
        {
            quantifier.store_new_base_element(element.clone());
            let upper =
                Reference::from_values("out", vec![Cell::text("X")]).unwrap();
            quantifier
                .store_new_in_loop_element(&element, "out", upper)
                .unwrap();
        }

        assert!(quantifier
            .check_all_base_elements_looped(&source, None)
            .unwrap());
        assert!(quantifier
            .check_all_base_elements_looped(&source, Some("out"))
            .unwrap());
        assert!(!quantifier
            .check_all_base_elements_looped(&source, Some("missing"))
            .unwrap());
    }

    #[test]
    fn combine_crosses_stored_results_and_renames_trailing_axis() {
        let mut workspace = Workspace::new();
        let mut quantifier = Quantifier::new(&mut workspace, "item", 0);
        let source = to_loop(&["a", "b"]);

        let mut n = 0;
        while let Some((element, _)) = quantifier
            .retrieve_next_base_element(&source, None)
            .unwrap()
        {
            quantifier.store_new_base_element(element.clone());
            let axis = format!("out_{}", n);
            let result =
                Reference::from_values(&axis, vec![Cell::Int(n as i64)]).unwrap();
            quantifier
                .store_new_in_loop_element(&element, "out", result)
                .unwrap();
            n += 1;
        }

        let combined = quantifier
            .combine_all_looped_elements_by_concept(&source, "out")
            .unwrap()
            .unwrap();
        assert_eq!(combined.axes().last().unwrap(), "out");
        assert!(quantifier
            .combine_all_looped_elements_by_concept(&source, "nothing")
            .unwrap()
            .is_none());
    }

    #[test]
    fn carry_over_retrieval_respects_the_carry_offset() {
        let mut workspace = Workspace::new();
        let mut quantifier = Quantifier::new(&mut workspace, "item", 0);
        let source = to_loop(&["a"]);
        let (element, _) = quantifier
            .retrieve_next_base_element(&source, None)
            .unwrap()
            .unwrap();
        quantifier.store_new_base_element(element.clone());
        let carried = Reference::from_values("out", vec![Cell::text("v")]).unwrap();
        quantifier
            .store_new_in_loop_element(&element, "out", carried)
            .unwrap();

        assert!(quantifier.retrieve_next_in_loop_element("out", 1, 1).is_none());
        assert!(quantifier.retrieve_next_in_loop_element("out", 2, 1).is_some());
    }
}
