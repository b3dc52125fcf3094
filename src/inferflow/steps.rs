//! Step Registry
//!
//! Maps every name of the closed step set to its implementation. A step is an
//! async function from `(state, tools, context)` to a new state: pure over
//! the [`InterpretationState`] it mutates, with side effects only through the
//! injected (monitored) tool bundle. The runner invokes steps strictly in
//! sequence order.
//!
//! Step implementations here follow the step contracts: each reads its
//! configuration from the state's working configuration and the sequence's
//! syntax spec, appends its results to the reference blocks, and treats
//! missing configuration as a no-op (the runner still advances). Failing
//! tools surface as step errors unless the step's own policy degrades the
//! cell to skip.
//!
//! The registry is replaceable per facade, so embedders and tests can
//! override individual steps with custom implementations.

use crate::inferflow::concept::{Concept, ConceptKind};
use crate::inferflow::event::InputKind;
use crate::inferflow::grouper::{GroupInput, Grouper};
use crate::inferflow::quantifier::Quantifier;
use crate::inferflow::reference::{
    cross_action, cross_product, element_action, Applier, Cell, Reference, ReferenceError,
};
use crate::inferflow::runner::{StepContext, StepError};
use crate::inferflow::state::{
    ContextEntry, FunctionEntry, InferenceEntry, InterpretationState, StepDescriptor, StepEntry,
    StepName, SyntaxSpec, ValuesEntry, Workspace,
};
use crate::inferflow::tools::{ToolBundle, ToolFn};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by a step function.
pub type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<(), StepError>> + Send + 'a>>;

/// A step implementation.
pub type StepFn = Arc<
    dyn for<'a> Fn(&'a mut InterpretationState, &'a ToolBundle, &'a StepContext) -> StepFuture<'a>
        + Send
        + Sync,
>;

/// Registry of step implementations keyed by step name.
pub struct StepRegistry {
    handlers: HashMap<StepName, StepFn>,
}

// Function-item shims implement the higher-ranked Fn bound that closures
// cannot always be inferred to satisfy.
macro_rules! step_fn {
    ($function:path) => {{
        fn shim<'a>(
            state: &'a mut InterpretationState,
            tools: &'a ToolBundle,
            context: &'a StepContext,
        ) -> StepFuture<'a> {
            Box::pin($function(state, tools, context))
        }
        Arc::new(shim) as StepFn
    }};
}

impl StepRegistry {
    /// Registry with no handlers; every step is a no-op.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The standard step set.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(StepName::Iwi, step_fn!(input_working));
        registry.register(StepName::Iwc, step_fn!(input_working));
        registry.register(StepName::Ir, step_fn!(interpretation_references));
        registry.register(StepName::Gr, step_fn!(grouping_references));
        registry.register(StepName::Qr, step_fn!(quantifying_references));
        registry.register(StepName::Mfp, step_fn!(memorized_function_perception));
        registry.register(StepName::Mvp, step_fn!(memorized_values_perception));
        registry.register(StepName::Cp, step_fn!(cross_perception));
        registry.register(StepName::Pa, step_fn!(perception_actuation));
        registry.register(StepName::Ap, step_fn!(actuator_perception));
        registry.register(StepName::Pta, step_fn!(perception_tool_actuation));
        registry.register(StepName::Asp, step_fn!(action_specification_perception));
        registry.register(StepName::Tva, step_fn!(tool_values_actuation));
        registry.register(StepName::Tip, step_fn!(tool_inference_perception));
        registry.register(StepName::Ma, step_fn!(memory_actuation));
        registry.register(StepName::Mia, step_fn!(memory_actuation));
        registry.register(StepName::Rr, step_fn!(return_reference));
        registry.register(StepName::Or, step_fn!(return_reference));
        registry.register(StepName::Owi, step_fn!(output_working));
        registry.register(StepName::Owc, step_fn!(output_working));
        registry
    }

    /// Install (or replace) the handler for one step name.
    pub fn register(&mut self, name: StepName, handler: StepFn) {
        self.handlers.insert(name, handler);
    }

    /// Execute one step; unhandled names are no-ops.
    pub async fn execute(
        &self,
        name: StepName,
        state: &mut InterpretationState,
        tools: &ToolBundle,
        context: &StepContext,
    ) -> Result<(), StepError> {
        match self.handlers.get(&name) {
            Some(handler) => handler(state, tools, context).await,
            None => {
                log::warn!("no handler for step {}, treating as no-op", name);
                Ok(())
            }
        }
    }
}

fn current_step(state: &InterpretationState) -> Result<StepDescriptor, StepError> {
    state
        .sequence
        .current()
        .ok_or_else(|| StepError::Failed("no current step".to_string()))
}

fn display_text(cell: &Cell) -> String {
    match cell {
        Cell::Skip | Cell::Null => String::new(),
        Cell::Bool(b) => b.to_string(),
        Cell::Int(i) => i.to_string(),
        Cell::Float(x) => x.to_string(),
        Cell::Text(s) => s.clone(),
        Cell::List(items) => items
            .iter()
            .map(display_text)
            .collect::<Vec<_>>()
            .join(", "),
        Cell::Apply(a) => format!("<applier:{}>", a.name()),
    }
}

/// Build a one-axis reference from a configured value (scalar or list).
fn reference_from_config(axis: &str, value: &serde_json::Value) -> Option<Reference> {
    let cells = match value {
        serde_json::Value::Array(items) => items.iter().map(Cell::from_json).collect(),
        serde_json::Value::Null => return None,
        other => vec![Cell::from_json(other)],
    };
    Reference::from_values(axis, cells).ok()
}

/// Named per-concept references from a working-configuration section.
fn references_from_section(section: &serde_json::Value) -> Vec<(String, Reference)> {
    let mut named = Vec::new();
    if let serde_json::Value::Object(entries) = section {
        for (name, value) in entries {
            if let Some(reference) = reference_from_config(name, value) {
                named.push((name.clone(), reference));
            }
        }
    }
    named.sort_by(|a, b| a.0.cmp(&b.0));
    named
}

/// Wrap a generation function as a cell applier: the cell's text becomes the
/// `{input}` substitution, the output row is the generated text.
fn generation_applier(name: &str, function: ToolFn) -> Applier {
    Applier::new(name, move |cell| {
        let function = function.clone();
        Box::pin(async move {
            let params = match &cell {
                Cell::List(items) => serde_json::json!({
                    "input": display_text(&cell),
                    "values": Cell::List(items.clone()).to_json(),
                }),
                other => serde_json::json!({ "input": display_text(other) }),
            };
            let output = function
                .invoke(params)
                .await
                .map_err(|error| ReferenceError::ApplyFailed(error.to_string()))?;
            Ok(vec![Cell::from_json(&output)])
        })
    })
}

/// Concluding reference of a run: the earliest inference result, else the
/// earliest function result.
fn concluding_reference(state: &InterpretationState) -> Option<Reference> {
    state
        .inference
        .earliest_references()
        .first()
        .cloned()
        .cloned()
        .or_else(|| state.function.earliest_references().first().cloned().cloned())
}

// ── Working-configuration boundary steps ─────────────────────────────────

/// IWI / IWC: seed the values and context blocks from the input working
/// configuration. With no `values`/`context` sections this is the identity.
async fn input_working(
    state: &mut InterpretationState,
    _tools: &ToolBundle,
    _context: &StepContext,
) -> Result<(), StepError> {
    let step = current_step(state)?;
    let configuration = state.working_configuration.clone();

    for (name, reference) in references_from_section(&configuration["values"]) {
        let concept =
            Concept::new(name.clone(), name, ConceptKind::Object).with_reference(&reference);
        state.values.push(ValuesEntry {
            entry: StepEntry::at(step)
                .with_concept(concept)
                .with_reference(reference),
            ..Default::default()
        });
    }
    for (name, reference) in references_from_section(&configuration["context"]) {
        let concept =
            Concept::new(name.clone(), name, ConceptKind::Object).with_reference(&reference);
        state.context.push(ContextEntry {
            entry: StepEntry::at(step)
                .with_concept(concept)
                .with_reference(reference),
            ..Default::default()
        });
    }
    Ok(())
}

/// OWI / OWC: copy the concluding reference into the working configuration's
/// `output` slot. Identity when nothing concluded yet.
async fn output_working(
    state: &mut InterpretationState,
    _tools: &ToolBundle,
    _context: &StepContext,
) -> Result<(), StepError> {
    current_step(state)?;
    if let Some(reference) = concluding_reference(state) {
        let output = reference.to_json();
        match &mut state.working_configuration {
            serde_json::Value::Object(entries) => {
                entries.insert("output".to_string(), output);
            }
            other => {
                *other = serde_json::json!({ "output": output });
            }
        }
    }
    Ok(())
}

// ── Perception steps ─────────────────────────────────────────────────────

/// IR: append context references from the working configuration.
async fn interpretation_references(
    state: &mut InterpretationState,
    _tools: &ToolBundle,
    _context: &StepContext,
) -> Result<(), StepError> {
    let step = current_step(state)?;
    let configuration = state.working_configuration.clone();
    for (name, reference) in references_from_section(&configuration["context"]) {
        let concept =
            Concept::new(name.clone(), name, ConceptKind::Object).with_reference(&reference);
        state.context.push(ContextEntry {
            entry: StepEntry::at(step)
                .with_concept(concept)
                .with_reference(reference),
            extraction: Some("working_configuration".to_string()),
            ..Default::default()
        });
    }
    Ok(())
}

/// MVP: build per-concept value references from the working configuration.
async fn memorized_values_perception(
    state: &mut InterpretationState,
    _tools: &ToolBundle,
    _context: &StepContext,
) -> Result<(), StepError> {
    let step = current_step(state)?;
    let configuration = state.working_configuration.clone();
    let order: Vec<String> = references_from_section(&configuration["values"])
        .iter()
        .map(|(name, _)| name.clone())
        .collect();
    for (name, reference) in references_from_section(&configuration["values"]) {
        let concept =
            Concept::new(name.clone(), name, ConceptKind::Object).with_reference(&reference);
        state.values.push(ValuesEntry {
            entry: StepEntry::at(step)
                .with_concept(concept)
                .with_reference(reference),
            value_order: order.clone(),
            ..Default::default()
        });
    }
    Ok(())
}

/// MFP: one language-model round-trip over the configured prompt; the
/// response becomes the function-block entry.
async fn memorized_function_perception(
    state: &mut InterpretationState,
    tools: &ToolBundle,
    _context: &StepContext,
) -> Result<(), StepError> {
    let step = current_step(state)?;
    let configuration = state.working_configuration.clone();
    let prompt = match configuration["prompt"].as_str() {
        Some(prompt) => prompt.to_string(),
        None => return Ok(()),
    };
    let system = configuration["system_message"].as_str();

    let language_model = tools.language_model()?;
    let response = language_model.generate(&prompt, system).await?;

    let concept_name = configuration["function"]["name"]
        .as_str()
        .unwrap_or("function");
    let reference = Reference::from_values(concept_name, vec![Cell::Text(response)])?;
    let concept = Concept::new(concept_name, concept_name, ConceptKind::Imperative)
        .with_reference(&reference);
    state.function.push(FunctionEntry {
        entry: StepEntry::at(step)
            .with_concept(concept)
            .with_reference(reference),
        model: Some(language_model.model_name()),
        ..Default::default()
    });
    Ok(())
}

/// CP: cross-product the earliest value references into the crossed
/// perception.
async fn cross_perception(
    state: &mut InterpretationState,
    _tools: &ToolBundle,
    _context: &StepContext,
) -> Result<(), StepError> {
    let step = current_step(state)?;
    let references: Vec<Reference> = state
        .values
        .earliest_references()
        .into_iter()
        .cloned()
        .collect();
    if references.is_empty() {
        return Ok(());
    }
    let crossed = cross_product(&references)?;
    state.context.push(ContextEntry {
        entry: StepEntry::at(step).with_reference(crossed),
        extraction: Some("cross_perception".to_string()),
        ..Default::default()
    });
    Ok(())
}

// ── Actuation steps ──────────────────────────────────────────────────────

/// PA: build a generation function over the configured function template and
/// store it as an applier reference.
async fn perception_actuation(
    state: &mut InterpretationState,
    tools: &ToolBundle,
    _context: &StepContext,
) -> Result<(), StepError> {
    let step = current_step(state)?;
    let configuration = state.working_configuration.clone();
    let template = match configuration["function"]["template"].as_str() {
        Some(template) => template.to_string(),
        None => return Ok(()),
    };
    let concept_name = configuration["function"]["name"]
        .as_str()
        .unwrap_or("function");

    let language_model = tools.language_model()?;
    let function = language_model.create_generation_function(&template)?;
    let applier = generation_applier(concept_name, function);

    let mut reference = Reference::filled(&[concept_name], &[1], Cell::Skip)?;
    reference.set(Cell::Apply(applier), &[(concept_name, 0)])?;
    let concept = Concept::new(concept_name, concept_name, ConceptKind::Imperative)
        .with_reference(&reference);
    state.function.push(FunctionEntry {
        entry: StepEntry::at(step)
            .with_concept(concept)
            .with_reference(reference),
        model: Some(language_model.model_name()),
        ..Default::default()
    });
    Ok(())
}

/// AP: like PA, but the template comes from the actuator section, optionally
/// loaded from the prompt store by name.
async fn actuator_perception(
    state: &mut InterpretationState,
    tools: &ToolBundle,
    _context: &StepContext,
) -> Result<(), StepError> {
    let step = current_step(state)?;
    let configuration = state.working_configuration.clone();
    let actuator = &configuration["actuator"];
    let template = if let Some(template) = actuator["template"].as_str() {
        template.to_string()
    } else if let Some(template_name) = actuator["template_name"].as_str() {
        tools.prompts()?.read(template_name).await?
    } else {
        return Ok(());
    };
    let concept_name = actuator["name"].as_str().unwrap_or("actuator");

    let language_model = tools.language_model()?;
    let function = language_model.create_generation_function(&template)?;
    let applier = generation_applier(concept_name, function);

    let mut reference = Reference::filled(&[concept_name], &[1], Cell::Skip)?;
    reference.set(Cell::Apply(applier), &[(concept_name, 0)])?;
    let concept = Concept::new(concept_name, concept_name, ConceptKind::Imperative)
        .with_reference(&reference);
    state.function.push(FunctionEntry {
        entry: StepEntry::at(step)
            .with_concept(concept)
            .with_reference(reference),
        model: Some(language_model.model_name()),
        ..Default::default()
    });
    Ok(())
}

/// PTA: apply the earliest applier reference to the crossed perception; the
/// applied result becomes an inference entry. Failed cells become skip, not
/// errors.
async fn perception_tool_actuation(
    state: &mut InterpretationState,
    _tools: &ToolBundle,
    _context: &StepContext,
) -> Result<(), StepError> {
    let step = current_step(state)?;
    let functions: Vec<Reference> = state
        .function
        .earliest_references()
        .into_iter()
        .cloned()
        .collect();
    let perception = state
        .context
        .earliest_references()
        .first()
        .cloned()
        .cloned()
        .or_else(|| state.values.earliest_references().first().cloned().cloned());
    let (functions, perception) = match (functions.first(), perception) {
        (Some(functions), Some(perception)) => (functions.clone(), perception),
        _ => return Ok(()),
    };

    let applied = cross_action(&functions, &perception, "result").await?;
    state.inference.push(InferenceEntry {
        entry: StepEntry::at(step).with_reference(applied),
        extraction: Some("cross_action".to_string()),
        ..Default::default()
    });
    Ok(())
}

/// ASP: strip the element wrapper from every applied cell, producing the
/// action specification.
async fn action_specification_perception(
    state: &mut InterpretationState,
    tools: &ToolBundle,
    _context: &StepContext,
) -> Result<(), StepError> {
    let step = current_step(state)?;
    let applied = match state.inference.earliest_references().first() {
        Some(reference) => (*reference).clone(),
        None => return Ok(()),
    };
    let formatter = tools.formatter()?;
    let stripped = element_action(
        move |cells, _| {
            Ok(Cell::Text(formatter.strip(&display_text(&cells[0]))))
        },
        &[applied],
        false,
    )?;
    state.inference.push(InferenceEntry {
        entry: StepEntry::at(step).with_reference(stripped),
        extraction: Some("strip_element_wrapper".to_string()),
        ..Default::default()
    });
    Ok(())
}

// ── Tool-driven steps ────────────────────────────────────────────────────

fn input_kind_from_config(request: &serde_json::Value) -> InputKind {
    match request["kind"].as_str() {
        Some("confirm") => InputKind::Confirm,
        Some("code") => InputKind::Code {
            language: request["language"].as_str().unwrap_or("text").to_string(),
        },
        Some("select") => InputKind::Select {
            options: request["options"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default(),
        },
        Some("editor") => InputKind::Editor {
            initial_content: request["initial_content"]
                .as_str()
                .unwrap_or("")
                .to_string(),
        },
        _ => InputKind::Text,
    }
}

/// TVA: acquire a value from a human observer. Confirmation answers are not
/// fatal either way; a cancelled request cancels the step.
async fn tool_values_actuation(
    state: &mut InterpretationState,
    tools: &ToolBundle,
    _context: &StepContext,
) -> Result<(), StepError> {
    let step = current_step(state)?;
    let configuration = state.working_configuration.clone();
    let request = &configuration["input_request"];
    if !request.is_object() {
        return Ok(());
    }
    let prompt = request["prompt"].as_str().unwrap_or("Please provide input:");
    let concept_name = request["name"].as_str().unwrap_or("user input");
    let kind = input_kind_from_config(request);

    let human = tools.human_input()?;
    let cell = match kind {
        InputKind::Confirm => Cell::Bool(human.confirm(prompt).await?),
        other => {
            let answer = human
                .await_input(prompt, other, request["options"].clone())
                .await?;
            Cell::from_json(&answer)
        }
    };

    let reference = Reference::from_values(concept_name, vec![cell])?;
    let concept =
        Concept::new(concept_name, concept_name, ConceptKind::Object).with_reference(&reference);
    state.values.push(ValuesEntry {
        entry: StepEntry::at(step)
            .with_concept(concept)
            .with_reference(reference),
        extraction: Some("user_input".to_string()),
        ..Default::default()
    });
    Ok(())
}

/// TIP: build a function executor over the configured script and invoke it
/// once per configured invocation; the results become an inference entry.
async fn tool_inference_perception(
    state: &mut InterpretationState,
    tools: &ToolBundle,
    _context: &StepContext,
) -> Result<(), StepError> {
    let step = current_step(state)?;
    let configuration = state.working_configuration.clone();
    let script = &configuration["script"];
    let source = match script["source"].as_str() {
        Some(source) => source.to_string(),
        None => return Ok(()),
    };

    let interpreter = tools.interpreter()?;
    let executor = interpreter.create_function_executor(&source)?;

    let invocations: Vec<serde_json::Value> = script["invocations"]
        .as_array()
        .cloned()
        .unwrap_or_else(|| vec![serde_json::json!({})]);
    let mut cells = Vec::with_capacity(invocations.len());
    for params in invocations {
        let output = executor.invoke(params).await?;
        cells.push(Cell::from_json(&output));
    }

    let axis = script["name"].as_str().unwrap_or("script result");
    let reference = Reference::from_values(axis, cells)?;
    state.inference.push(InferenceEntry {
        entry: StepEntry::at(step).with_reference(reference),
        extraction: Some("function_executor".to_string()),
        ..Default::default()
    });
    Ok(())
}

// ── Grouping and quantification ──────────────────────────────────────────

/// GR: compose the earliest value references under the sequence's grouping
/// syntax.
async fn grouping_references(
    state: &mut InterpretationState,
    _tools: &ToolBundle,
    _context: &StepContext,
) -> Result<(), StepError> {
    let step = current_step(state)?;
    let spec = match &state.syntax {
        Some(SyntaxSpec::Grouping(spec)) => spec.clone(),
        _ => return Ok(()),
    };
    let entries = state.values.earliest();
    let mut inputs: Vec<GroupInput> = Vec::with_capacity(entries.len());
    for (position, entry) in entries.iter().enumerate() {
        let reference = match &entry.entry.reference {
            Some(reference) => reference.clone(),
            None => continue,
        };
        let label = spec
            .annotation_list
            .get(position)
            .cloned()
            .or_else(|| entry.entry.concept.as_ref().map(|c| c.name.clone()))
            .unwrap_or_else(|| format!("value_{}", position));
        let mut input = GroupInput::new(label, reference);
        if let Some(keep) = spec.by_axes.get(position) {
            let keep: Vec<&str> = keep.iter().map(|s| s.as_str()).collect();
            input = input.with_keep_axes(&keep);
        }
        inputs.push(input);
    }
    if inputs.is_empty() {
        return Ok(());
    }

    let grouped = match spec.group_marker {
        Some(crate::inferflow::state::GroupMarker::Across) => {
            let reference = inputs[0].reference.clone();
            let keep: Vec<&str> = spec
                .by_axes
                .get(0)
                .map(|axes| axes.iter().map(|s| s.as_str()).collect())
                .unwrap_or_default();
            Grouper::or_across(&reference, &keep, spec.template.as_deref())?
        }
        _ => Grouper::and_in(&inputs, spec.template.as_deref())?,
    };

    state.values.push(ValuesEntry {
        entry: StepEntry::at(step).with_reference(grouped),
        quantification: Some(spec.kind.clone()),
        ..Default::default()
    });
    Ok(())
}

/// QR: loop the grouped reference's elements through the quantifier
/// subspace, then append the per-concept combination.
async fn quantifying_references(
    state: &mut InterpretationState,
    _tools: &ToolBundle,
    _context: &StepContext,
) -> Result<(), StepError> {
    let step = current_step(state)?;
    let spec = match &state.syntax {
        Some(SyntaxSpec::Quantifying(spec)) => spec.clone(),
        _ => return Ok(()),
    };
    let to_loop = state
        .values
        .for_step(StepName::Gr)
        .last()
        .and_then(|entry| entry.entry.reference.clone())
        .or_else(|| state.values.earliest_references().first().cloned().cloned());
    let to_loop = match to_loop {
        Some(reference) => reference,
        None => return Ok(()),
    };

    let combined = {
        let mut quantifier = Quantifier::new(
            &mut state.workspace,
            &spec.loop_base_concept_name,
            spec.start_index,
        );
        while let Some((element, _)) =
            quantifier.retrieve_next_base_element(&to_loop, None)?
        {
            quantifier.store_new_base_element(element);
        }
        if quantifier.check_all_base_elements_looped(&to_loop, None)? {
            quantifier
                .combine_all_looped_elements_by_concept(&to_loop, &spec.loop_base_concept_name)?
        } else {
            None
        }
    };

    if let Some(reference) = combined {
        state.values.push(ValuesEntry {
            entry: StepEntry::at(step).with_reference(reference),
            quantification: Some(spec.kind.clone()),
            ..Default::default()
        });
    }
    Ok(())
}

// ── Memory and return steps ──────────────────────────────────────────────

/// MA / MIA: store the concluding reference into the run's workspace memory.
async fn memory_actuation(
    state: &mut InterpretationState,
    _tools: &ToolBundle,
    _context: &StepContext,
) -> Result<(), StepError> {
    current_step(state)?;
    let reference = match concluding_reference(state) {
        Some(reference) => reference,
        None => return Ok(()),
    };
    let concept_name = state.working_configuration["concept_to_infer"]["name"]
        .as_str()
        .or_else(|| state.working_configuration["concept_to_infer"].as_str())
        .unwrap_or("result")
        .to_string();
    let key = Workspace::subspace_key(0, &concept_name);
    state
        .workspace
        .subspace_mut(&key)
        .insert(1, &concept_name, reference);
    Ok(())
}

/// RR / OR: attach the concluding reference to the concept to infer.
async fn return_reference(
    state: &mut InterpretationState,
    _tools: &ToolBundle,
    _context: &StepContext,
) -> Result<(), StepError> {
    let step = current_step(state)?;
    let reference = match concluding_reference(state) {
        Some(reference) => reference,
        None => return Ok(()),
    };
    let concept_name = state.working_configuration["concept_to_infer"]["name"]
        .as_str()
        .or_else(|| state.working_configuration["concept_to_infer"].as_str())
        .unwrap_or("inferred")
        .to_string();
    let concept = Concept::new(concept_name.clone(), concept_name, ConceptKind::Object)
        .with_reference(&reference);
    state.inference.push(InferenceEntry {
        entry: StepEntry::at(step)
            .with_concept(concept)
            .with_reference(reference),
        extraction: Some("return_reference".to_string()),
        ..Default::default()
    });
    Ok(())
}
