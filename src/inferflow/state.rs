//! Working State
//!
//! The typed working memory of one sequence run. A run owns exactly one
//! [`InterpretationState`]; steps consume it, append entries to its reference
//! blocks, and the runner advances its [`SequenceState`] cursor. Nothing in
//! here is shared between runs.
//!
//! The state is organised the way steps think:
//!
//! - [`SequenceState`]: the ordered step descriptors plus the current cursor
//! - a free-form *working configuration* seeded from the run's input data
//! - an optional [`SyntaxSpec`] describing grouping/quantification for the
//!   sequence
//! - a [`Workspace`] holding quantifier subspaces
//! - four reference blocks (`function`, `values`, `context`, `inference`),
//!   each an append-only list of step entries
//!
//! Block accessors return the entries of the *earliest* step index that holds
//! a non-null value: a downstream step reading "the perception references"
//! gets the first ones produced, not the latest.

use crate::inferflow::concept::Concept;
use crate::inferflow::reference::Reference;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// The closed set of step names.
///
/// Sequences are composed only of these steps; there is no user-defined step
/// name. The short forms are the canonical spelling used in sequence
/// definitions, events, and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepName {
    #[serde(rename = "IWI")]
    Iwi,
    #[serde(rename = "IR")]
    Ir,
    #[serde(rename = "GR")]
    Gr,
    #[serde(rename = "QR")]
    Qr,
    #[serde(rename = "MFP")]
    Mfp,
    #[serde(rename = "MVP")]
    Mvp,
    #[serde(rename = "TVA")]
    Tva,
    #[serde(rename = "TIP")]
    Tip,
    #[serde(rename = "MIA")]
    Mia,
    #[serde(rename = "OR")]
    Or,
    #[serde(rename = "OWI")]
    Owi,
    #[serde(rename = "IWC")]
    Iwc,
    #[serde(rename = "CP")]
    Cp,
    #[serde(rename = "PA")]
    Pa,
    #[serde(rename = "MA")]
    Ma,
    #[serde(rename = "RR")]
    Rr,
    #[serde(rename = "OWC")]
    Owc,
    #[serde(rename = "AP")]
    Ap,
    #[serde(rename = "PTA")]
    Pta,
    #[serde(rename = "ASP")]
    Asp,
}

impl StepName {
    /// Canonical short spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Iwi => "IWI",
            StepName::Ir => "IR",
            StepName::Gr => "GR",
            StepName::Qr => "QR",
            StepName::Mfp => "MFP",
            StepName::Mvp => "MVP",
            StepName::Tva => "TVA",
            StepName::Tip => "TIP",
            StepName::Mia => "MIA",
            StepName::Or => "OR",
            StepName::Owi => "OWI",
            StepName::Iwc => "IWC",
            StepName::Cp => "CP",
            StepName::Pa => "PA",
            StepName::Ma => "MA",
            StepName::Rr => "RR",
            StepName::Owc => "OWC",
            StepName::Ap => "AP",
            StepName::Pta => "PTA",
            StepName::Asp => "ASP",
        }
    }

    /// Long display name.
    pub fn full_name(&self) -> &'static str {
        match self {
            StepName::Iwi => "Input-Working-Interpretation",
            StepName::Ir => "Interpretation-References",
            StepName::Gr => "Grouping-References",
            StepName::Qr => "Quantifying-References",
            StepName::Mfp => "Memorized-Function-Perception",
            StepName::Mvp => "Memorized-Values-Perception",
            StepName::Tva => "Tool-Values-Actuation",
            StepName::Tip => "Tool-Inference-Perception",
            StepName::Mia => "Memory-Inference-Actuation",
            StepName::Or => "Output-References",
            StepName::Owi => "Output-Working-Interpretation",
            StepName::Iwc => "Input-Working-Configuration",
            StepName::Cp => "Cross-Perception",
            StepName::Pa => "Perception-Actuation",
            StepName::Ma => "Memory-Actuation",
            StepName::Rr => "Return-Reference",
            StepName::Owc => "Output-Working-Configuration",
            StepName::Ap => "Actuator-Perception",
            StepName::Pta => "Perception-Tool-Actuation",
            StepName::Asp => "Action-Specification-Perception",
        }
    }

    /// All step names, in declaration order.
    pub fn all() -> &'static [StepName] {
        &[
            StepName::Iwi,
            StepName::Ir,
            StepName::Gr,
            StepName::Qr,
            StepName::Mfp,
            StepName::Mvp,
            StepName::Tva,
            StepName::Tip,
            StepName::Mia,
            StepName::Or,
            StepName::Owi,
            StepName::Iwc,
            StepName::Cp,
            StepName::Pa,
            StepName::Ma,
            StepName::Rr,
            StepName::Owc,
            StepName::Ap,
            StepName::Pta,
            StepName::Asp,
        ]
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepName {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        StepName::all()
            .iter()
            .find(|name| name.as_str() == value)
            .copied()
            .ok_or_else(|| format!("unknown step name '{}'", value))
    }
}

/// One step of a sequence: its name and 1-based position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDescriptor {
    pub step_name: StepName,
    pub step_index: usize,
}

/// The ordered steps of one run plus the execution cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceState {
    sequence: Vec<StepDescriptor>,
    /// 1-based index of the current step; 0 when the sequence is empty or has
    /// not started.
    current_step_index: usize,
}

impl SequenceState {
    /// Build a sequence state from ordered step names, assigning 1-based
    /// indices. The cursor starts at the first step.
    pub fn new(steps: &[StepName]) -> Self {
        let sequence = steps
            .iter()
            .enumerate()
            .map(|(i, name)| StepDescriptor {
                step_name: *name,
                step_index: i + 1,
            })
            .collect::<Vec<_>>();
        Self {
            current_step_index: if sequence.is_empty() { 0 } else { 1 },
            sequence,
        }
    }

    /// The ordered step descriptors.
    pub fn steps(&self) -> &[StepDescriptor] {
        &self.sequence
    }

    /// The current step, if the cursor points at one.
    pub fn current(&self) -> Option<StepDescriptor> {
        if self.current_step_index == 0 {
            None
        } else {
            self.sequence.get(self.current_step_index - 1).copied()
        }
    }

    /// 1-based index of the current step (0 when empty).
    pub fn current_step_index(&self) -> usize {
        self.current_step_index
    }

    /// Move the cursor to the next step. Returns the new current step, or
    /// `None` when the sequence is exhausted.
    pub fn advance(&mut self) -> Option<StepDescriptor> {
        if self.current_step_index >= self.sequence.len() {
            self.current_step_index = self.sequence.len() + 1;
            return None;
        }
        self.current_step_index += 1;
        self.current()
    }

    /// True once the cursor has run past the last step (or the sequence is
    /// empty).
    pub fn is_exhausted(&self) -> bool {
        self.sequence.is_empty() || self.current_step_index > self.sequence.len()
    }
}

/// Fields shared by every block entry.
#[derive(Debug, Clone, Default)]
pub struct StepEntry {
    pub step_name: Option<StepName>,
    pub step_index: usize,
    pub concept: Option<Concept>,
    pub reference: Option<Reference>,
}

impl StepEntry {
    /// Entry for one step, with no payload yet.
    pub fn at(step: StepDescriptor) -> Self {
        Self {
            step_name: Some(step.step_name),
            step_index: step.step_index,
            concept: None,
            reference: None,
        }
    }

    pub fn with_concept(mut self, concept: Concept) -> Self {
        self.concept = Some(concept);
        self
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }
}

/// Access to the shared fields of a typed block entry.
pub trait BlockEntry {
    fn entry(&self) -> &StepEntry;
    fn entry_mut(&mut self) -> &mut StepEntry;
}

macro_rules! impl_block_entry {
    ($type:ty) => {
        impl BlockEntry for $type {
            fn entry(&self) -> &StepEntry {
                &self.entry
            }
            fn entry_mut(&mut self) -> &mut StepEntry {
                &mut self.entry
            }
        }
    };
}

/// Function-block entry (typically written by MFP / AP / PA).
#[derive(Debug, Clone, Default)]
pub struct FunctionEntry {
    pub entry: StepEntry,
    /// Order in which value concepts feed the function.
    pub value_order: Vec<String>,
    /// Model name the function was built against, when tool-backed.
    pub model: Option<String>,
}
impl_block_entry!(FunctionEntry);

/// Values-block entry (typically written by MVP / TVA / IR).
#[derive(Debug, Clone, Default)]
pub struct ValuesEntry {
    pub entry: StepEntry,
    pub extraction: Option<String>,
    pub quantification: Option<String>,
    pub value_order: Vec<String>,
    pub memory: Option<MemorySpec>,
}
impl_block_entry!(ValuesEntry);

/// Context-block entry (typically written by IR / CP).
#[derive(Debug, Clone, Default)]
pub struct ContextEntry {
    pub entry: StepEntry,
    pub extraction: Option<String>,
    pub quantification: Option<String>,
}
impl_block_entry!(ContextEntry);

/// Inference-block entry (typically written by TIP / MIA / RR).
#[derive(Debug, Clone, Default)]
pub struct InferenceEntry {
    pub entry: StepEntry,
    pub extraction: Option<String>,
    pub quantification: Option<String>,
    pub tools: Vec<ToolSpec>,
}
impl_block_entry!(InferenceEntry);

/// An append-only list of block entries with earliest-step accessors.
#[derive(Debug, Clone, Default)]
pub struct Block<T: BlockEntry> {
    entries: Vec<T>,
}

impl<T: BlockEntry> Block<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an entry. Returns `false` (and drops the entry) if this step
    /// already contributed a reference for the same concept: a reference is
    /// appended at most once per step and concept.
    pub fn push(&mut self, entry: T) -> bool {
        if entry.entry().reference.is_some() {
            let concept = entry.entry().concept.as_ref().map(|c| c.name.as_str());
            let duplicate = self.entries.iter().any(|existing| {
                existing.entry().step_index == entry.entry().step_index
                    && existing.entry().reference.is_some()
                    && existing.entry().concept.as_ref().map(|c| c.name.as_str()) == concept
            });
            if duplicate {
                return false;
            }
        }
        self.entries.push(entry);
        true
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries of the earliest step index holding a non-null reference.
    pub fn earliest(&self) -> Vec<&T> {
        let earliest = self
            .entries
            .iter()
            .filter(|e| e.entry().reference.is_some())
            .map(|e| e.entry().step_index)
            .min();
        match earliest {
            None => Vec::new(),
            Some(index) => self
                .entries
                .iter()
                .filter(|e| e.entry().step_index == index && e.entry().reference.is_some())
                .collect(),
        }
    }

    /// References of the earliest contributing step.
    pub fn earliest_references(&self) -> Vec<&Reference> {
        self.earliest()
            .into_iter()
            .filter_map(|e| e.entry().reference.as_ref())
            .collect()
    }

    /// Concepts of the earliest step index holding a non-null concept.
    pub fn earliest_concepts(&self) -> Vec<&Concept> {
        let earliest = self
            .entries
            .iter()
            .filter(|e| e.entry().concept.is_some())
            .map(|e| e.entry().step_index)
            .min();
        match earliest {
            None => Vec::new(),
            Some(index) => self
                .entries
                .iter()
                .filter(|e| e.entry().step_index == index)
                .filter_map(|e| e.entry().concept.as_ref())
                .collect(),
        }
    }

    /// Entries contributed by a named step.
    pub fn for_step(&self, step_name: StepName) -> Vec<&T> {
        self.entries
            .iter()
            .filter(|e| e.entry().step_name == Some(step_name))
            .collect()
    }
}

/// Grouping marker for grouped reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMarker {
    In,
    Across,
    Only,
}

/// Specification of grouping behaviour (AND-IN / OR-ACROSS patterns).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrouperSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub group_marker: Option<GroupMarker>,
    #[serde(default)]
    pub by_axes: Vec<Vec<String>>,
    #[serde(default)]
    pub annotation_list: Vec<String>,
    pub template: Option<String>,
}

/// Specification of quantification behaviour for value/inference steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantifierSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub loop_base_concept_name: String,
    pub mode: Option<String>,
    #[serde(default)]
    pub start_index: usize,
    #[serde(default)]
    pub carry_index: usize,
}

/// Memory configuration for value steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value_order: Vec<String>,
    #[serde(default)]
    pub cross_values: bool,
}

/// Static definition of a tool and its affordances, as carried by inference
/// entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub tool_name: String,
    #[serde(default)]
    pub affordances: Vec<AffordanceSpec>,
}

/// Runtime binding of one tool affordance to concrete parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffordanceSpec {
    pub affordance_name: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Variable name the composed plan reads after this affordance runs.
    pub output: Option<String>,
}

/// Parsed syntax for the sequence being run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "syntax", rename_all = "lowercase")]
pub enum SyntaxSpec {
    Grouping(GrouperSpec),
    Quantifying(QuantifierSpec),
    Imperative,
}

/// Quantifier working storage: `loop_index → concept_name → Reference`.
#[derive(Debug, Clone, Default)]
pub struct Subspace {
    entries: BTreeMap<usize, HashMap<String, Reference>>,
}

impl Subspace {
    pub fn get(&self, loop_index: usize, concept_name: &str) -> Option<&Reference> {
        self.entries.get(&loop_index).and_then(|m| m.get(concept_name))
    }

    pub fn insert(&mut self, loop_index: usize, concept_name: &str, reference: Reference) {
        self.entries
            .entry(loop_index)
            .or_insert_with(HashMap::new)
            .insert(concept_name.to_string(), reference);
    }

    pub fn has_concept(&self, loop_index: usize, concept_name: &str) -> bool {
        self.get(loop_index, concept_name).is_some()
    }

    /// Loop indices in ascending order.
    pub fn loop_indices(&self) -> Vec<usize> {
        self.entries.keys().copied().collect()
    }

    /// One past the highest occupied loop index. Loop indices are 1-based, so
    /// an empty subspace yields 1.
    pub fn next_loop_index(&self) -> usize {
        self.entries.keys().next_back().map(|i| i + 1).unwrap_or(1)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The free-form workspace of one run, organised into keyed subspaces.
///
/// Keys follow the `"<loop_index>_<loop_base_concept_name>"` scheme so that
/// re-entrant quantifier steps land on the same subspace deterministically.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    subspaces: HashMap<String, Subspace>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// The canonical subspace key.
    pub fn subspace_key(loop_concept_index: usize, loop_base_concept_name: &str) -> String {
        format!("{}_{}", loop_concept_index, loop_base_concept_name)
    }

    pub fn subspace(&self, key: &str) -> Option<&Subspace> {
        self.subspaces.get(key)
    }

    /// Get or create a subspace.
    pub fn subspace_mut(&mut self, key: &str) -> &mut Subspace {
        self.subspaces
            .entry(key.to_string())
            .or_insert_with(Subspace::default)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.subspaces.keys().map(|k| k.as_str()).collect()
    }
}

/// The working memory of one sequence run.
#[derive(Debug, Clone, Default)]
pub struct InterpretationState {
    pub sequence: SequenceState,
    /// Parsed syntax for the current sequence, when one applies.
    pub syntax: Option<SyntaxSpec>,
    /// Input/output working configuration (a JSON object).
    pub working_configuration: serde_json::Value,
    pub workspace: Workspace,
    pub function: Block<FunctionEntry>,
    pub values: Block<ValuesEntry>,
    pub context: Block<ContextEntry>,
    pub inference: Block<InferenceEntry>,
}

impl Default for SequenceState {
    fn default() -> Self {
        SequenceState::new(&[])
    }
}

impl InterpretationState {
    /// Fresh state for the given steps, seeded with the run's input data.
    pub fn new(steps: &[StepName], input_data: serde_json::Value) -> Self {
        Self {
            sequence: SequenceState::new(steps),
            syntax: None,
            working_configuration: input_data,
            workspace: Workspace::new(),
            function: Block::new(),
            values: Block::new(),
            context: Block::new(),
            inference: Block::new(),
        }
    }
}
