//! Static process model: definitions and executable elements.
//!
//! A [`ProcessDefinition`] is compiled once (here: parsed from YAML and
//! validated) and is read-only during execution. The engine shares it via
//! `Arc`; element instances only hold element ids into the tree.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// The closed set of element kinds the engine knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    /// Root container of a process instance
    Process,

    /// Embedded sub-process scope
    SubProcess,

    /// Invokes another process definition as a child process instance
    CallActivity,

    /// Scope created by a declared start event firing, never by command
    EventSubProcess,

    /// Sequential/parallel repetition of its single inner element
    MultiInstanceBody,

    /// Entry point of a scope
    StartEvent,

    /// Exit point of a scope
    EndEvent,

    /// Generic wait-state activity, completed by an external worker
    Task,

    /// Event attached to an activity's edge
    BoundaryEvent,
}

impl ElementKind {
    /// Containers own child element instances and a variable scope.
    pub fn is_container(self) -> bool {
        matches!(
            self,
            ElementKind::Process
                | ElementKind::SubProcess
                | ElementKind::CallActivity
                | ElementKind::EventSubProcess
                | ElementKind::MultiInstanceBody
        )
    }

    /// Activities can carry boundary events.
    pub fn is_activity(self) -> bool {
        matches!(
            self,
            ElementKind::SubProcess
                | ElementKind::CallActivity
                | ElementKind::MultiInstanceBody
                | ElementKind::Task
        )
    }
}

/// Whether a multi-instance body runs its children one at a time or all at
/// once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    Sequential,
    Parallel,
}

/// Static multi-instance configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopCharacteristics {
    /// Sequential or parallel child creation
    pub mode: LoopMode,

    /// Expression yielding the input collection (must evaluate to an array)
    pub input_collection: String,

    /// Variable holding the current item in each child scope
    #[serde(default)]
    pub input_element: Option<String>,

    /// Variable in the body scope collecting one output entry per child
    #[serde(default)]
    pub output_collection: Option<String>,

    /// Expression evaluated in the child scope to produce its output entry
    #[serde(default)]
    pub output_element: Option<String>,
}

/// One input or output variable mapping.
///
/// `source` is an expression evaluated in the source scope; `target` is the
/// variable name written in the target scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub source: String,
    pub target: String,
}

/// Message declaration on a catching element (boundary event or start
/// event of an event sub-process / message-started process).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDecl {
    /// Message name matched on publish
    pub name: String,
}

fn default_true() -> bool {
    true
}

/// A single node of the compiled process graph. Read-only during execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutableElement {
    /// Element id (unique within the definition)
    pub id: String,

    /// What the element is
    pub kind: ElementKind,

    /// Ids of the elements activated in the flow scope when this one
    /// completes
    #[serde(default)]
    pub outgoing: Vec<String>,

    /// Structural children (containers only)
    #[serde(default, rename = "elements")]
    pub children: Vec<ExecutableElement>,

    /// Input variable mappings, applied when the element activates
    #[serde(default)]
    pub inputs: Vec<Mapping>,

    /// Output variable mappings, applied when the element completes
    #[serde(default)]
    pub outputs: Vec<Mapping>,

    /// Multi-instance configuration (multi-instance bodies only)
    #[serde(default, rename = "loop")]
    pub loop_characteristics: Option<LoopCharacteristics>,

    /// Message this element catches (boundary/start events)
    #[serde(default)]
    pub message: Option<MessageDecl>,

    /// Expression yielding the called process id (call activities only)
    #[serde(default)]
    pub called_element: Option<String>,

    /// Copy all caller-visible variables into the called process root scope
    #[serde(default = "default_true")]
    pub propagate_all_parent_variables: bool,

    /// Copy all called-process root variables back on completion
    #[serde(default = "default_true")]
    pub propagate_all_child_variables: bool,

    /// Id of the activity this boundary event is attached to
    #[serde(default)]
    pub attached_to: Option<String>,

    /// Whether the event interrupts its scope/activity when it fires
    #[serde(default = "default_true")]
    pub interrupting: bool,
}

impl ExecutableElement {
    /// The none start event of this container, if any.
    pub fn none_start_event(&self) -> Option<&ExecutableElement> {
        self.children
            .iter()
            .find(|e| e.kind == ElementKind::StartEvent && e.message.is_none())
    }

    /// The message start event matching `name`, if any.
    pub fn message_start_event(&self, name: &str) -> Option<&ExecutableElement> {
        self.children.iter().find(|e| {
            e.kind == ElementKind::StartEvent
                && e.message.as_ref().map(|m| m.name.as_str()) == Some(name)
        })
    }

    /// Boundary events of this container attached to the given activity.
    pub fn boundary_events_for<'a>(
        &'a self,
        activity_id: &'a str,
    ) -> impl Iterator<Item = &'a ExecutableElement> {
        self.children.iter().filter(move |e| {
            e.kind == ElementKind::BoundaryEvent
                && e.attached_to.as_deref() == Some(activity_id)
        })
    }

    /// Event sub-processes declared directly in this container.
    pub fn event_sub_processes(&self) -> impl Iterator<Item = &ExecutableElement> {
        self.children
            .iter()
            .filter(|e| e.kind == ElementKind::EventSubProcess)
    }

    /// Direct child by id.
    pub fn child(&self, id: &str) -> Option<&ExecutableElement> {
        self.children.iter().find(|e| e.id == id)
    }

    /// The single inner element of a multi-instance body.
    pub fn inner_element(&self) -> Option<&ExecutableElement> {
        if self.kind == ElementKind::MultiInstanceBody {
            self.children.first()
        } else {
            None
        }
    }

    fn find(&self, id: &str) -> Option<&ExecutableElement> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    fn find_scope_of(&self, id: &str) -> Option<&ExecutableElement> {
        if self.children.iter().any(|c| c.id == id) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_scope_of(id))
    }
}

/// A complete, deployable process definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    /// Process id referenced by run commands and call activities
    pub id: String,

    /// Root-level elements of the process
    pub elements: Vec<ExecutableElement>,
}

impl ProcessDefinition {
    /// Load a definition from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read definition file: {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse a definition from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse process definition YAML")
    }

    /// The synthetic root element representing the process itself.
    ///
    /// Built on demand so lookups can treat the process like any other
    /// container.
    pub fn root(&self) -> ExecutableElement {
        ExecutableElement {
            id: self.id.clone(),
            kind: ElementKind::Process,
            outgoing: Vec::new(),
            children: self.elements.clone(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            loop_characteristics: None,
            message: None,
            called_element: None,
            propagate_all_parent_variables: true,
            propagate_all_child_variables: true,
            attached_to: None,
            interrupting: true,
        }
    }

    /// Find any element in the tree by id. The process id resolves to the
    /// synthetic root.
    pub fn element(&self, id: &str) -> Option<ExecutableElement> {
        if id == self.id {
            return Some(self.root());
        }
        self.elements.iter().find_map(|e| e.find(id)).cloned()
    }

    /// The container element that owns `id` as a direct child.
    pub fn scope_of(&self, id: &str) -> Option<ExecutableElement> {
        if self.elements.iter().any(|e| e.id == id) {
            return Some(self.root());
        }
        self.elements
            .iter()
            .find_map(|e| e.find_scope_of(id))
            .cloned()
    }

    /// Whether the process declares a none start event at the root.
    pub fn has_none_start_event(&self) -> bool {
        self.root().none_start_event().is_some()
    }

    /// Validate the definition before deployment.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            anyhow::bail!("Process id cannot be empty");
        }
        if self.elements.is_empty() {
            anyhow::bail!("Process '{}' has no elements", self.id);
        }

        let mut seen = std::collections::HashSet::new();
        self.validate_scope(&self.root(), &mut seen)?;
        Ok(())
    }

    fn validate_scope(
        &self,
        scope: &ExecutableElement,
        seen: &mut std::collections::HashSet<String>,
    ) -> Result<()> {
        for element in &scope.children {
            if element.id.is_empty() {
                anyhow::bail!("Element in scope '{}' has an empty id", scope.id);
            }
            if !seen.insert(element.id.clone()) {
                anyhow::bail!("Duplicate element id '{}'", element.id);
            }

            for target in &element.outgoing {
                if scope.child(target).is_none() {
                    anyhow::bail!(
                        "Element '{}' has outgoing flow to unknown element '{}'",
                        element.id,
                        target
                    );
                }
            }

            match element.kind {
                ElementKind::MultiInstanceBody => {
                    if element.loop_characteristics.is_none() {
                        anyhow::bail!(
                            "Multi-instance body '{}' is missing loop characteristics",
                            element.id
                        );
                    }
                    if element.children.len() != 1 {
                        anyhow::bail!(
                            "Multi-instance body '{}' must wrap exactly one inner element",
                            element.id
                        );
                    }
                }
                ElementKind::CallActivity => {
                    if element.called_element.is_none() {
                        anyhow::bail!(
                            "Call activity '{}' is missing a called element",
                            element.id
                        );
                    }
                }
                ElementKind::SubProcess => {
                    if element.none_start_event().is_none() {
                        anyhow::bail!(
                            "Sub-process '{}' needs a none start event",
                            element.id
                        );
                    }
                }
                ElementKind::EventSubProcess => {
                    let has_event_start = element
                        .children
                        .iter()
                        .any(|c| c.kind == ElementKind::StartEvent && c.message.is_some());
                    if !has_event_start {
                        anyhow::bail!(
                            "Event sub-process '{}' needs a start event with an event declaration",
                            element.id
                        );
                    }
                }
                ElementKind::BoundaryEvent => {
                    let attached = element.attached_to.as_deref().unwrap_or_default();
                    match scope.child(attached) {
                        Some(activity) if activity.kind.is_activity() => {}
                        Some(_) => anyhow::bail!(
                            "Boundary event '{}' is attached to non-activity '{}'",
                            element.id,
                            attached
                        ),
                        None => anyhow::bail!(
                            "Boundary event '{}' is attached to unknown element '{}'",
                            element.id,
                            attached
                        ),
                    }
                }
                _ => {}
            }

            if element.kind.is_container() {
                self.validate_scope(element, seen)?;
            }
        }
        Ok(())
    }
}

/// A deployed definition: the immutable tree plus its assigned identity.
#[derive(Debug, Clone)]
pub struct DeployedDefinition {
    /// Monotonic definition key assigned at deployment
    pub key: u64,

    /// Version, bumped when the content digest changes
    pub version: u32,

    /// Content digest used for deployment de-duplication
    pub digest: String,

    /// The definition tree, shared across the engine
    pub definition: Arc<ProcessDefinition>,
}
