//! Navigation instructions
//!
//! A navigation request is normalized into a [`ViewportInstructionTree`]: an
//! ordered forest of [`ViewportInstruction`]s, each naming a component, an
//! optional target viewport, parameters, and child instructions. Trees are
//! immutable after creation and compared structurally, which is what makes
//! no-op detection and `is_active` checks cheap.
//!
//! The component of an instruction is a [`NavigationInstruction`]: a tagged
//! union over the ways application code can specify a component (route
//! string, nested instruction, resolved definition, lazy loader, or live
//! instance), each with its own equality semantics.

use crate::component::{ComponentDefinition, ComponentInstance, LazyComponent};
use crate::options::NavigationOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Params
// =============================================================================

/// Route parameters: string keys to string values.
///
/// Positional parameters use their zero-based index as key (`"0"`, `"1"`, …).
/// Comparison is shallow value equality, which is also what the default
/// transition-plan selection uses to distinguish re-entry from change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Look up a parameter value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Insert a parameter value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Remove a parameter value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Whether no parameters are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Produce a new set with `other`'s entries layered over `self`'s.
    #[must_use = "This method returns a new Params and does not modify self"]
    pub fn merged_with(&self, other: &Params) -> Params {
        let mut merged = self.0.clone();
        for (k, v) in &other.0 {
            merged.insert(k.clone(), v.clone());
        }
        Params(merged)
    }

    /// Whether every entry of `other` is present in `self` with the same value.
    pub fn contains_all(&self, other: &Params) -> bool {
        other
            .0
            .iter()
            .all(|(k, v)| self.0.get(k).is_some_and(|own| own == v))
    }

    /// Build from an iterator of pairs.
    pub fn from_pairs<K: Into<String>, V: Into<String>>(
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// =============================================================================
// Trigger
// =============================================================================

/// What produced a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationTrigger {
    /// Host history traversal (back/forward).
    Popstate,
    /// Host hash fragment change.
    Hashchange,
    /// Programmatic `load()` call.
    Api,
}

impl fmt::Display for NavigationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Popstate => write!(f, "popstate"),
            Self::Hashchange => write!(f, "hashchange"),
            Self::Api => write!(f, "api"),
        }
    }
}

// =============================================================================
// NavigationInstruction — the typed component union
// =============================================================================

/// How a component was specified in a navigation request.
#[derive(Clone)]
pub enum NavigationInstruction {
    /// A route string fragment, resolved against a context's route table.
    Path(String),
    /// A nested viewport instruction, compared structurally.
    Instruction(Box<ViewportInstruction>),
    /// An already-resolved component definition, compared by identity.
    Definition(Arc<ComponentDefinition>),
    /// A lazy component loader, compared by loader identity.
    Lazy(LazyComponent),
    /// A live component instance, compared by instance identity.
    Instance(Arc<ComponentInstance>),
}

impl NavigationInstruction {
    /// The component name this instruction refers to, if statically known.
    pub fn component_name(&self) -> Option<&str> {
        match self {
            Self::Path(value) => Some(value.as_str()),
            Self::Instruction(vi) => vi.component.component_name(),
            Self::Definition(def) => Some(def.name.as_str()),
            Self::Lazy(_) => None,
            Self::Instance(instance) => Some(instance.definition.name.as_str()),
        }
    }

    /// Tag-aware equality: strings by value, definitions and instances by
    /// identity, nested instructions structurally.
    pub fn equals(&self, other: &NavigationInstruction) -> bool {
        match (self, other) {
            (Self::Path(a), Self::Path(b)) => a == b,
            (Self::Instruction(a), Self::Instruction(b)) => a.equals(b),
            (Self::Definition(a), Self::Definition(b)) => Arc::ptr_eq(a, b),
            (Self::Lazy(a), Self::Lazy(b)) => a.ptr_eq(b),
            (Self::Instance(a), Self::Instance(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for NavigationInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(value) => write!(f, "Path({value:?})"),
            Self::Instruction(vi) => write!(f, "Instruction({vi:?})"),
            Self::Definition(def) => write!(f, "Definition({})", def.name),
            Self::Lazy(_) => write!(f, "Lazy(..)"),
            Self::Instance(instance) => write!(f, "Instance({})", instance.definition.name),
        }
    }
}

// =============================================================================
// ViewportInstruction
// =============================================================================

/// One requested (component, params, viewport, children) unit.
///
/// `open`/`close` carry the grouping depth produced by parenthesized route
/// expressions; `append` marks instructions that add to the current state
/// instead of replacing it.
#[derive(Debug, Clone)]
pub struct ViewportInstruction {
    /// Grouping depth opened before this instruction.
    pub open: usize,
    /// Grouping depth closed after this instruction.
    pub close: usize,
    /// Whether this instruction appends to the current state.
    pub append: bool,
    /// The component being navigated to.
    pub component: NavigationInstruction,
    /// Target viewport name, if explicitly specified.
    pub viewport: Option<String>,
    /// Parameters for the component.
    pub params: Params,
    /// Child instructions, to be resolved in the component's own scope.
    pub children: Vec<ViewportInstruction>,
}

impl ViewportInstruction {
    /// Create an instruction for a component with no params or children.
    pub fn new(component: NavigationInstruction) -> Self {
        Self {
            open: 0,
            close: 0,
            append: false,
            component,
            viewport: None,
            params: Params::new(),
            children: Vec::new(),
        }
    }

    /// Create an instruction from a component name.
    pub fn for_component(name: impl Into<String>) -> Self {
        Self::new(NavigationInstruction::Path(name.into()))
    }

    /// Create an instruction from a component definition.
    pub fn for_definition(definition: Arc<ComponentDefinition>) -> Self {
        Self::new(NavigationInstruction::Definition(definition))
    }

    /// Set the target viewport.
    #[must_use = "This method returns a new ViewportInstruction and does not modify self"]
    pub fn with_viewport(mut self, viewport: impl Into<String>) -> Self {
        self.viewport = Some(viewport.into());
        self
    }

    /// Set the parameters.
    #[must_use = "This method returns a new ViewportInstruction and does not modify self"]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Set the child instructions.
    #[must_use = "This method returns a new ViewportInstruction and does not modify self"]
    pub fn with_children(mut self, children: Vec<ViewportInstruction>) -> Self {
        self.children = children;
        self
    }

    /// Set the append flag.
    #[must_use = "This method returns a new ViewportInstruction and does not modify self"]
    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Structural equality: component (tag-aware), viewport, params and
    /// children all match. Grouping depth and append flags are presentation
    /// detail and do not participate.
    pub fn equals(&self, other: &ViewportInstruction) -> bool {
        self.component.equals(&other.component)
            && self.viewport == other.viewport
            && self.params == other.params
            && self.children.len() == other.children.len()
            && self
                .children
                .iter()
                .zip(other.children.iter())
                .all(|(a, b)| a.equals(b))
    }

    /// Containment, used for "is this route active" checks: `other` is
    /// contained if its component matches, its params are a subset, its
    /// viewport (when specified) matches, and each of its children is
    /// contained in some child of `self`.
    pub fn contains(&self, other: &ViewportInstruction) -> bool {
        let components_match = match (
            self.component.component_name(),
            other.component.component_name(),
        ) {
            (Some(a), Some(b)) => a == b,
            _ => self.component.equals(&other.component),
        };
        components_match
            && self.params.contains_all(&other.params)
            && other
                .viewport
                .as_ref()
                .is_none_or(|vp| self.viewport.as_ref() == Some(vp))
            && other
                .children
                .iter()
                .all(|oc| self.children.iter().any(|sc| sc.contains(oc)))
    }

    /// Serialize this instruction (and its subtree) back to route-string form.
    pub fn to_url(&self) -> String {
        let mut out = String::new();
        match &self.component {
            NavigationInstruction::Path(value) => out.push_str(value),
            NavigationInstruction::Instruction(vi) => out.push_str(&vi.to_url()),
            NavigationInstruction::Definition(def) => out.push_str(&def.name),
            NavigationInstruction::Lazy(_) => out.push_str("<lazy>"),
            NavigationInstruction::Instance(instance) => out.push_str(&instance.definition.name),
        }
        if !self.params.is_empty() {
            let entries: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| {
                    if k.parse::<usize>().is_ok() {
                        v.to_string()
                    } else {
                        format!("{k}={v}")
                    }
                })
                .collect();
            out.push('(');
            out.push_str(&entries.join(","));
            out.push(')');
        }
        if let Some(viewport) = &self.viewport {
            out.push('@');
            out.push_str(viewport);
        }
        match self.children.len() {
            0 => {}
            1 => {
                out.push('/');
                out.push_str(&self.children[0].to_url());
            }
            _ => {
                let children: Vec<String> = self.children.iter().map(|c| c.to_url()).collect();
                out.push_str("/(");
                out.push_str(&children.join("+"));
                out.push(')');
            }
        }
        out
    }
}

// =============================================================================
// ViewportInstructionTree
// =============================================================================

/// A complete, normalized navigation request.
#[derive(Clone)]
pub struct ViewportInstructionTree {
    /// The options the request was created with.
    pub options: NavigationOptions,
    /// Whether the request is absolute (anchored at the root scope).
    pub is_absolute: bool,
    /// Top-level sibling instructions.
    pub children: Vec<ViewportInstruction>,
    /// Query parameters.
    pub query_params: Params,
    /// URL fragment.
    pub fragment: Option<String>,
}

impl ViewportInstructionTree {
    /// An empty request (matches nothing, navigates nowhere).
    pub fn empty(options: NavigationOptions) -> Self {
        Self {
            options,
            is_absolute: false,
            children: Vec::new(),
            query_params: Params::new(),
            fragment: None,
        }
    }

    /// Normalize a [`NavigationRequest`] into a tree.
    ///
    /// Route strings go through the expression parser; structured requests are
    /// wrapped directly. The options' own query params and fragment are layered
    /// under any that the request itself carries.
    pub fn create(
        request: NavigationRequest,
        options: NavigationOptions,
    ) -> crate::error::RouterResult<Self> {
        match request {
            NavigationRequest::Path(path) => {
                let expression = crate::expression::RouteExpression::parse(&path)?;
                Ok(expression.to_instruction_tree(options))
            }
            NavigationRequest::Instruction(instruction) => {
                let append = options.append || instruction.append;
                let query_params = options.query_params.clone();
                let fragment = options.fragment.clone();
                let mut instruction = instruction;
                instruction.append = append;
                Ok(Self {
                    options,
                    is_absolute: false,
                    children: vec![instruction],
                    query_params,
                    fragment,
                })
            }
            NavigationRequest::Instructions(instructions) => {
                let query_params = options.query_params.clone();
                let fragment = options.fragment.clone();
                Ok(Self {
                    options,
                    is_absolute: false,
                    children: instructions,
                    query_params,
                    fragment,
                })
            }
            NavigationRequest::Tree(tree) => Ok(tree),
        }
    }

    /// Structural equality over children, query params and fragment.
    pub fn equals(&self, other: &ViewportInstructionTree) -> bool {
        self.children.len() == other.children.len()
            && self
                .children
                .iter()
                .zip(other.children.iter())
                .all(|(a, b)| a.equals(b))
            && self.query_params == other.query_params
            && self.fragment == other.fragment
    }

    /// Serialize the request back to URL form.
    pub fn to_url(&self) -> String {
        let mut out = String::from("/");
        let children: Vec<String> = self.children.iter().map(|c| c.to_url()).collect();
        out.push_str(&children.join("+"));
        if !self.query_params.is_empty() {
            let entries: Vec<String> = self
                .query_params
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            out.push('?');
            out.push_str(&entries.join("&"));
        }
        if let Some(fragment) = &self.fragment {
            out.push('#');
            out.push_str(fragment);
        }
        out
    }
}

impl fmt::Debug for ViewportInstructionTree {
    // Log lines want the URL form, not the structural dump.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ViewportInstructionTree({})", self.to_url())
    }
}

// =============================================================================
// NavigationRequest
// =============================================================================

/// The accepted inputs of `Router::load` and `Router::is_active`.
#[derive(Debug, Clone)]
pub enum NavigationRequest {
    /// A route string (`"products/(list+detail(id=1))"`).
    Path(String),
    /// A single structured instruction.
    Instruction(ViewportInstruction),
    /// Multiple sibling instructions.
    Instructions(Vec<ViewportInstruction>),
    /// An already-built tree, used verbatim.
    Tree(ViewportInstructionTree),
}

impl From<&str> for NavigationRequest {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

impl From<String> for NavigationRequest {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

impl From<ViewportInstruction> for NavigationRequest {
    fn from(instruction: ViewportInstruction) -> Self {
        Self::Instruction(instruction)
    }
}

impl From<Vec<ViewportInstruction>> for NavigationRequest {
    fn from(instructions: Vec<ViewportInstruction>) -> Self {
        Self::Instructions(instructions)
    }
}

impl From<ViewportInstructionTree> for NavigationRequest {
    fn from(tree: ViewportInstructionTree) -> Self {
        Self::Tree(tree)
    }
}

// =============================================================================
// Tests
// =============================================================================
