//! GraphQL operation types for the composite planner.
//!
//! These are analogues of the apollo-compiler executable types with these changes:
//! - Selection sets are reference counted, and the allocation *is* the identity of a selection
//!   set. Two structurally identical selection sets at different places in an operation are
//!   different selection sets. Rewriting a selection set always produces a new allocation; the
//!   [`SelectionSetIndex`](crate::query_plan::selection_set_index::SelectionSetIndex) ties such
//!   rewrites back to the selection set they were derived from.
//! - Named fragment spreads are expanded into inline fragments when converting a document.
//! - Fields remember their schema definition so they can be converted back for printing.

use std::fmt;
use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::executable;
use apollo_compiler::name;
use apollo_compiler::schema::NamedType;
use apollo_compiler::validation::Valid;
use indexmap::IndexSet;
use serde::Serialize;

use crate::error::CompositeError;
use crate::error::SingleCompositeError;
use crate::internal_error;

pub(crate) mod merging;
mod path;

pub use merging::FieldAlias;
pub use path::PathSegment;
pub use path::SelectionPath;

pub(crate) const TYPENAME_FIELD: Name = name!("__typename");
const INTROSPECTION_SCHEMA_FIELD: Name = name!("__schema");
const INTROSPECTION_TYPE_FIELD: Name = name!("__type");

/// An operation ready to be planned, or one produced for a single source schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub(crate) operation_type: executable::OperationType,
    pub(crate) name: Option<Name>,
    pub(crate) variables: Arc<Vec<Node<executable::VariableDefinition>>>,
    pub(crate) directives: Arc<executable::DirectiveList>,
    pub(crate) selection_set: SelectionSet,
}

impl Operation {
    /// Converts the (possibly named) operation of a validated document.
    ///
    /// Fragment spreads are expanded and top-level introspection fields are removed: those are
    /// answered by the gateway itself and never reach a source schema.
    pub fn from_document(
        document: &Valid<ExecutableDocument>,
        operation_name: Option<&str>,
    ) -> Result<Self, CompositeError> {
        let operation = document.operations.get(operation_name).map_err(|_| {
            SingleCompositeError::UnknownOperation {
                name: operation_name.map(str::to_owned),
            }
        })?;
        let converter = SelectionSetConverter {
            document: Some(&**document),
        };
        let selection_set = converter
            .convert(&operation.selection_set)?
            .without_root_introspection();
        Ok(Self {
            operation_type: operation.operation_type,
            name: operation.name.clone(),
            variables: Arc::new(operation.variables.clone()),
            directives: Arc::new(operation.directives.clone()),
            selection_set,
        })
    }

    pub fn operation_type(&self) -> executable::OperationType {
        self.operation_type
    }

    pub fn name(&self) -> Option<&Name> {
        self.name.as_ref()
    }

    pub fn selection_set(&self) -> &SelectionSet {
        &self.selection_set
    }

    pub fn variables(&self) -> &[Node<executable::VariableDefinition>] {
        &self.variables
    }
}

/// A selection set along with the composite type it selects from.
///
/// Cloning a `SelectionSet` is cheap and preserves its identity; see [`SelectionSet::ptr_eq`].
#[derive(Clone)]
pub struct SelectionSet {
    inner: Arc<SelectionSetData>,
}

struct SelectionSetData {
    ty: NamedType,
    selections: Vec<Selection>,
}

impl SelectionSet {
    pub(crate) fn new(ty: NamedType, selections: Vec<Selection>) -> Self {
        Self {
            inner: Arc::new(SelectionSetData { ty, selections }),
        }
    }

    /// The selection set `{ __typename }` on the given type.
    pub(crate) fn typename_only(ty: NamedType, typename: Node<ast::FieldDefinition>) -> Self {
        let field = FieldSelection {
            definition: typename,
            alias: None,
            name: TYPENAME_FIELD,
            arguments: Vec::new(),
            directives: Default::default(),
            selection_set: None,
        };
        Self::new(ty, vec![Selection::Field(Arc::new(field))])
    }

    pub fn ty(&self) -> &NamedType {
        &self.inner.ty
    }

    pub fn selections(&self) -> &[Selection] {
        &self.inner.selections
    }

    pub fn is_empty(&self) -> bool {
        self.inner.selections.is_empty()
    }

    /// Whether both values are the very same selection set, as opposed to structurally equal.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// An identity key for this selection set. It is only meaningful while the selection set is
    /// alive.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    /// Finds the field selection with the given response key at this level.
    pub fn field(&self, response_key: &str) -> Option<&Arc<FieldSelection>> {
        self.selections().iter().find_map(|selection| match selection {
            Selection::Field(field) if field.response_key() == response_key => Some(field),
            _ => None,
        })
    }

    /// Collects every variable referenced by arguments or directives in this selection set.
    pub(crate) fn collect_variables<'a>(&'a self, variables: &mut IndexSet<&'a Name>) {
        for selection in self.selections() {
            match selection {
                Selection::Field(field) => {
                    for argument in &field.arguments {
                        collect_value_variables(&argument.value, variables);
                    }
                    collect_directive_variables(&field.directives, variables);
                    if let Some(selection_set) = &field.selection_set {
                        selection_set.collect_variables(variables);
                    }
                }
                Selection::InlineFragment(fragment) => {
                    collect_directive_variables(&fragment.directives, variables);
                    fragment.selection_set.collect_variables(variables);
                }
            }
        }
    }

    /// Visits this selection set and every nested selection set, parents before children.
    pub(crate) fn for_each_selection_set<'a>(&'a self, visit: &mut impl FnMut(&'a SelectionSet)) {
        visit(self);
        for selection in self.selections() {
            if let Some(selection_set) = selection.selection_set() {
                selection_set.for_each_selection_set(visit);
            }
        }
    }

    /// A structurally equal copy in which every selection set, nested ones included, is a new
    /// allocation, so the copy can be bound to identities of its own.
    pub(crate) fn fresh_copy(&self) -> Self {
        let selections = self
            .selections()
            .iter()
            .map(|selection| match selection {
                Selection::Field(field) => Selection::Field(Arc::new(field.with_selection_set(
                    field.selection_set.as_ref().map(SelectionSet::fresh_copy),
                ))),
                Selection::InlineFragment(fragment) => Selection::InlineFragment(Arc::new(
                    fragment.with_selection_set(fragment.selection_set.fresh_copy()),
                )),
            })
            .collect();
        Self::new(self.ty().clone(), selections)
    }

    fn without_root_introspection(self) -> Self {
        let is_introspection = |selection: &Selection| {
            matches!(selection, Selection::Field(field) if field.alias.is_none() && (
                field.name == TYPENAME_FIELD
                    || field.name == INTROSPECTION_SCHEMA_FIELD
                    || field.name == INTROSPECTION_TYPE_FIELD
            ))
        };
        if !self.selections().iter().any(is_introspection) {
            return self;
        }
        let selections = self
            .selections()
            .iter()
            .filter(|selection| !is_introspection(selection))
            .cloned()
            .collect();
        Self::new(self.ty().clone(), selections)
    }
}

impl PartialEq for SelectionSet {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.inner.ty == other.inner.ty && self.inner.selections == other.inner.selections)
    }
}

impl Eq for SelectionSet {}

impl fmt::Debug for SelectionSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SelectionSet({}) ", self.ty())?;
        Display::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Field(Arc<FieldSelection>),
    InlineFragment(Arc<InlineFragmentSelection>),
}

impl Selection {
    pub fn selection_set(&self) -> Option<&SelectionSet> {
        match self {
            Selection::Field(field) => field.selection_set.as_ref(),
            Selection::InlineFragment(fragment) => Some(&fragment.selection_set),
        }
    }
}

/// A field along with its sub-selection, if the field is of a composite type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelection {
    pub(crate) definition: Node<ast::FieldDefinition>,
    pub(crate) alias: Option<Name>,
    pub(crate) name: Name,
    pub(crate) arguments: Vec<Node<ast::Argument>>,
    pub(crate) directives: executable::DirectiveList,
    pub(crate) selection_set: Option<SelectionSet>,
}

impl FieldSelection {
    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn response_key(&self) -> &Name {
        self.alias.as_ref().unwrap_or(&self.name)
    }

    pub fn selection_set(&self) -> Option<&SelectionSet> {
        self.selection_set.as_ref()
    }

    pub(crate) fn with_selection_set(&self, selection_set: Option<SelectionSet>) -> Self {
        Self {
            selection_set,
            ..self.clone()
        }
    }

    /// Whether both are the same field with the same arguments and directives, regardless of
    /// their aliases and sub-selections.
    pub(crate) fn selects_same_data(&self, other: &FieldSelection) -> bool {
        self.name == other.name
            && self.arguments == other.arguments
            && self.directives == other.directives
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineFragmentSelection {
    pub(crate) type_condition: Option<NamedType>,
    pub(crate) directives: executable::DirectiveList,
    pub(crate) selection_set: SelectionSet,
}

impl InlineFragmentSelection {
    pub fn type_condition(&self) -> Option<&NamedType> {
        self.type_condition.as_ref()
    }

    pub fn selection_set(&self) -> &SelectionSet {
        &self.selection_set
    }

    pub(crate) fn with_selection_set(&self, selection_set: SelectionSet) -> Self {
        Self {
            selection_set,
            ..self.clone()
        }
    }
}

fn collect_value_variables<'a>(value: &'a ast::Value, variables: &mut IndexSet<&'a Name>) {
    match value {
        ast::Value::Variable(name) => {
            variables.insert(name);
        }
        ast::Value::List(items) => {
            for item in items {
                collect_value_variables(item, variables);
            }
        }
        ast::Value::Object(fields) => {
            for (_, value) in fields {
                collect_value_variables(value, variables);
            }
        }
        _ => {}
    }
}

fn collect_directive_variables<'a>(
    directives: &'a executable::DirectiveList,
    variables: &mut IndexSet<&'a Name>,
) {
    for directive in directives.iter() {
        for argument in &directive.arguments {
            collect_value_variables(&argument.value, variables);
        }
    }
}

/// Converts apollo-compiler selection sets, expanding named fragments along the way.
pub(crate) struct SelectionSetConverter<'doc> {
    pub(crate) document: Option<&'doc ExecutableDocument>,
}

impl SelectionSetConverter<'_> {
    pub(crate) fn convert(
        &self,
        selection_set: &executable::SelectionSet,
    ) -> Result<SelectionSet, CompositeError> {
        let mut selections = Vec::with_capacity(selection_set.selections.len());
        for selection in &selection_set.selections {
            match selection {
                executable::Selection::Field(field) => {
                    let sub_selection = if field.selection_set.selections.is_empty() {
                        None
                    } else {
                        Some(self.convert(&field.selection_set)?)
                    };
                    selections.push(Selection::Field(Arc::new(FieldSelection {
                        definition: field.definition.clone(),
                        alias: field.alias.clone(),
                        name: field.name.clone(),
                        arguments: field.arguments.clone(),
                        directives: field.directives.clone(),
                        selection_set: sub_selection,
                    })));
                }
                executable::Selection::FragmentSpread(spread) => {
                    let fragment = self
                        .document
                        .and_then(|document| document.fragments.get(&spread.fragment_name))
                        .ok_or_else(|| {
                            internal_error!(
                                "Fragment spread referenced non-existent fragment \"{}\"",
                                spread.fragment_name
                            )
                        })?;
                    // Every spread gets its own copy so each location keeps its own identity.
                    selections.push(Selection::InlineFragment(Arc::new(
                        InlineFragmentSelection {
                            type_condition: Some(fragment.type_condition().clone()),
                            directives: spread.directives.clone(),
                            selection_set: self.convert(&fragment.selection_set)?,
                        },
                    )));
                }
                executable::Selection::InlineFragment(fragment) => {
                    selections.push(Selection::InlineFragment(Arc::new(
                        InlineFragmentSelection {
                            type_condition: fragment.type_condition.clone(),
                            directives: fragment.directives.clone(),
                            selection_set: self.convert(&fragment.selection_set)?,
                        },
                    )));
                }
            }
        }
        Ok(SelectionSet::new(selection_set.ty.clone(), selections))
    }
}

// Conversion back to apollo-compiler types, used for printing.

impl From<&Operation> for executable::Operation {
    fn from(operation: &Operation) -> Self {
        Self {
            operation_type: operation.operation_type,
            name: operation.name.clone(),
            variables: operation.variables.as_ref().clone(),
            directives: operation.directives.as_ref().clone(),
            selection_set: (&operation.selection_set).into(),
        }
    }
}

impl From<&SelectionSet> for executable::SelectionSet {
    fn from(selection_set: &SelectionSet) -> Self {
        Self {
            ty: selection_set.ty().clone(),
            selections: selection_set.selections().iter().map(Into::into).collect(),
        }
    }
}

impl From<&Selection> for executable::Selection {
    fn from(selection: &Selection) -> Self {
        match selection {
            Selection::Field(field) => {
                executable::Selection::Field(Node::new(field.as_ref().into()))
            }
            Selection::InlineFragment(fragment) => {
                executable::Selection::InlineFragment(Node::new(fragment.as_ref().into()))
            }
        }
    }
}

impl From<&FieldSelection> for executable::Field {
    fn from(field: &FieldSelection) -> Self {
        let selection_set = match &field.selection_set {
            Some(selection_set) => selection_set.into(),
            None => executable::SelectionSet {
                ty: field.definition.ty.inner_named_type().clone(),
                selections: Vec::new(),
            },
        };
        Self {
            definition: field.definition.clone(),
            alias: field.alias.clone(),
            name: field.name.clone(),
            arguments: field.arguments.clone(),
            directives: field.directives.clone(),
            selection_set,
        }
    }
}

impl From<&InlineFragmentSelection> for executable::InlineFragment {
    fn from(fragment: &InlineFragmentSelection) -> Self {
        Self {
            type_condition: fragment.type_condition.clone(),
            directives: fragment.directives.clone(),
            selection_set: (&fragment.selection_set).into(),
        }
    }
}

// Display implementations for the operation types.

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let operation = executable::Operation::from(self);
        operation.serialize().fmt(f)
    }
}

impl Display for SelectionSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let selection_set = executable::SelectionSet::from(self);
        selection_set.serialize().no_indent().fmt(f)
    }
}

impl Display for Selection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let selection = executable::Selection::from(self);
        selection.serialize().no_indent().fmt(f)
    }
}

impl Display for FieldSelection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let field = executable::Field::from(self);
        field.serialize().no_indent().fmt(f)
    }
}

impl Serialize for Operation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl Serialize for SelectionSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
