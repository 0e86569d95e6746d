//! Splits a selection set into what one source schema can resolve and what is left over.

use std::sync::Arc;

use serde::Serialize;

use super::selection_set_index::SelectionSetId;
use super::selection_set_index::SelectionSetIndexBuilder;
use crate::error::CompositeError;
use crate::internal_error;
use crate::operation::FieldSelection;
use crate::operation::InlineFragmentSelection;
use crate::operation::Selection;
use crate::operation::SelectionPath;
use crate::operation::SelectionSet;
use crate::operation::TYPENAME_FIELD;
use crate::schema::CompositeSchema;

/// A selection set waiting to be planned, along with its identity and its location in the
/// operation.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct SelectionSetRef {
    pub(crate) node: SelectionSet,
    pub(crate) id: SelectionSetId,
    pub(crate) path: SelectionPath,
}

/// Fields that a resolved field needs from its parent before it can be resolved.
#[derive(Debug, Clone)]
pub(crate) struct FieldRequirement {
    /// The selection set the requiring field was selected in, as it was before partitioning.
    pub(crate) parent: SelectionSet,
    pub(crate) parent_id: SelectionSetId,
    pub(crate) path: SelectionPath,
    /// The location of the requiring field itself.
    pub(crate) field_path: SelectionPath,
    pub(crate) requirements: SelectionSet,
}

#[derive(Debug, Default)]
pub(crate) struct PartitionResult {
    /// `None` when nothing can be resolved.
    pub(crate) resolvable: Option<SelectionSet>,
    /// The leftovers, in document order, each registered against the selection set it was cut
    /// from.
    pub(crate) unresolved: Vec<SelectionSetRef>,
    pub(crate) field_requirements: Vec<FieldRequirement>,
}

pub(crate) struct SelectionSetPartitioner<'a> {
    schema: &'a CompositeSchema,
}

struct Context<'a, 'b> {
    schema_name: &'a str,
    allow_requirements: bool,
    /// `None` in detached mode.
    index: Option<&'b mut SelectionSetIndexBuilder>,
    unresolved: Vec<SelectionSetRef>,
    field_requirements: Vec<FieldRequirement>,
}

impl Context<'_, '_> {
    fn register(
        &mut self,
        original: &SelectionSet,
        rewritten: &SelectionSet,
    ) -> Result<(), CompositeError> {
        if let Some(index) = self.index.as_deref_mut() {
            if !rewritten.ptr_eq(original) {
                index.register(original, rewritten)?;
            }
        }
        Ok(())
    }
}

/// The outcome of partitioning one level.
struct Split {
    resolvable: Option<SelectionSet>,
    /// Selections left for another schema that were not cut off into a backlog item.
    remainder: Option<SelectionSet>,
}

impl<'a> SelectionSetPartitioner<'a> {
    pub(crate) fn new(schema: &'a CompositeSchema) -> Self {
        Self { schema }
    }

    /// Partitions `selection_set` for `schema_name`, registering every rewrite in `index`.
    ///
    /// Fields of `provided` are already known (e.g. the key of the lookup that fetches the
    /// entity) and are left out of both outputs.
    pub(crate) fn partition(
        &self,
        index: &mut SelectionSetIndexBuilder,
        schema_name: &str,
        selection_set: &SelectionSetRef,
        provided: Option<&SelectionSet>,
        allow_requirements: bool,
    ) -> Result<PartitionResult, CompositeError> {
        let mut context = Context {
            schema_name,
            allow_requirements,
            index: Some(index),
            unresolved: Vec::new(),
            field_requirements: Vec::new(),
        };
        let split = self.partition_level(
            &mut context,
            &selection_set.node,
            Some(selection_set.id),
            provided,
            &selection_set.path,
            true,
        )?;
        if split.remainder.is_some() {
            return Err(internal_error!(
                "Remainder of `{}` was not cut off at the partitioned root",
                selection_set.node
            ));
        }
        // Nested cut offs are emitted before their ancestors. Shallow leftovers go first, siblings
        // keep document order.
        context
            .unresolved
            .sort_by(|left, right| left.path.segments().len().cmp(&right.path.segments().len()));
        Ok(PartitionResult {
            resolvable: split.resolvable,
            unresolved: context.unresolved,
            field_requirements: context.field_requirements,
        })
    }

    /// Partitions a selection set that is not tracked by the index, returning the resolvable
    /// part and the remainder. Fields with requirements are never resolvable here.
    pub(crate) fn partition_detached(
        &self,
        schema_name: &str,
        selection_set: &SelectionSet,
        path: &SelectionPath,
    ) -> Result<(Option<SelectionSet>, Option<SelectionSet>), CompositeError> {
        let mut context = Context {
            schema_name,
            allow_requirements: false,
            index: None,
            unresolved: Vec::new(),
            field_requirements: Vec::new(),
        };
        let split = self.partition_level(&mut context, selection_set, None, None, path, false)?;
        Ok((split.resolvable, split.remainder))
    }

    /// Counts the fields of `selection_set` that `schema_name` can resolve, `__typename` aside.
    /// Sub-selections only count when their parent field is resolvable too, and mutation fields
    /// only up to the first one the schema cannot resolve.
    pub(crate) fn resolvable_count(&self, schema_name: &str, selection_set: &SelectionSet) -> usize {
        // `None` for selections the schema cannot resolve at all.
        let counts = selection_set
            .selections()
            .iter()
            .map(|selection| match selection {
                Selection::Field(field) if field.name == TYPENAME_FIELD => Some(0),
                Selection::Field(field) => self
                    .schema
                    .can_resolve_field(selection_set.ty(), &field.name, schema_name, true)
                    .then(|| {
                        1 + field
                            .selection_set
                            .as_ref()
                            .map_or(0, |child| self.resolvable_count(schema_name, child))
                    }),
                Selection::InlineFragment(fragment) => self
                    .schema
                    .type_in_schema(fragment.selection_set.ty(), schema_name)
                    .then(|| self.resolvable_count(schema_name, &fragment.selection_set)),
            });
        if self.schema.is_mutation_type(selection_set.ty()) {
            counts.map_while(|count| count).sum()
        } else {
            counts.flatten().sum()
        }
    }

    /// Partitions one selection set. `id` is the identity of `node` when it is already known.
    ///
    /// A level is a cut point when it is the partitioned root or, in tracked mode, when its type
    /// is an entity: its remainder becomes a backlog item instead of bubbling up to the parent.
    fn partition_level(
        &self,
        context: &mut Context<'_, '_>,
        node: &SelectionSet,
        id: Option<SelectionSetId>,
        provided: Option<&SelectionSet>,
        path: &SelectionPath,
        is_root: bool,
    ) -> Result<Split, CompositeError> {
        let tracked = context.index.is_some();
        let is_cut_point = is_root || (tracked && self.schema.is_entity(node.ty()));

        let mut resolvable = Vec::with_capacity(node.selections().len());
        let mut remainder = Vec::new();
        let mut resolvable_unchanged = true;
        let mut remainder_unchanged = true;
        // Mutation fields run one after the other: once a field is left over, so is everything
        // after it.
        let serial = is_root && self.schema.is_mutation_type(node.ty());
        let mut left_over = false;

        for selection in node.selections() {
            if left_over {
                resolvable_unchanged = false;
                remainder.push(selection.clone());
                continue;
            }
            let remainder_len = remainder.len();
            match selection {
                Selection::Field(field) => {
                    let outcome = self.partition_field(context, node, field, provided, path)?;
                    match outcome.resolvable {
                        Some(kept) => {
                            resolvable_unchanged &= Arc::ptr_eq(&kept, field);
                            resolvable.push(Selection::Field(kept));
                        }
                        None => resolvable_unchanged = false,
                    }
                    match outcome.remainder {
                        Some(left) => {
                            remainder_unchanged &= Arc::ptr_eq(&left, field);
                            remainder.push(Selection::Field(left));
                        }
                        None => remainder_unchanged = false,
                    }
                }
                Selection::InlineFragment(fragment) => {
                    let outcome = self.partition_inline_fragment(context, node, fragment, path)?;
                    match outcome.resolvable {
                        Some(kept) => {
                            resolvable_unchanged &= Arc::ptr_eq(&kept, fragment);
                            resolvable.push(Selection::InlineFragment(kept));
                        }
                        None => resolvable_unchanged = false,
                    }
                    match outcome.remainder {
                        Some(left) => {
                            remainder_unchanged &= Arc::ptr_eq(&left, fragment);
                            remainder.push(Selection::InlineFragment(left));
                        }
                        None => remainder_unchanged = false,
                    }
                }
            }
            left_over = serial && remainder.len() > remainder_len;
        }

        let resolvable = match (resolvable.is_empty(), resolvable_unchanged) {
            (true, _) => None,
            (false, true) => Some(node.clone()),
            (false, false) => {
                let rewritten = SelectionSet::new(node.ty().clone(), resolvable);
                context.register(node, &rewritten)?;
                Some(rewritten)
            }
        };
        let remainder = match (remainder.is_empty(), remainder_unchanged) {
            (true, _) => None,
            (false, true) => Some(node.clone()),
            (false, false) => {
                let rewritten = SelectionSet::new(node.ty().clone(), remainder);
                context.register(node, &rewritten)?;
                Some(rewritten)
            }
        };

        let Some(remainder) = remainder else {
            return Ok(Split {
                resolvable,
                remainder: None,
            });
        };
        if !is_cut_point || !tracked {
            return Ok(Split {
                resolvable,
                remainder: Some(remainder),
            });
        }
        let id = match (id, context.index.as_deref()) {
            (Some(id), _) => id,
            (None, Some(index)) => index.get_id(node)?,
            (None, None) => return Err(internal_error!("Cannot cut off an untracked remainder")),
        };
        context.unresolved.push(SelectionSetRef {
            node: remainder,
            id,
            path: path.clone(),
        });
        Ok(Split {
            resolvable,
            remainder: None,
        })
    }

    fn partition_field(
        &self,
        context: &mut Context<'_, '_>,
        parent: &SelectionSet,
        field: &Arc<FieldSelection>,
        provided: Option<&SelectionSet>,
        path: &SelectionPath,
    ) -> Result<Outcome<FieldSelection>, CompositeError> {
        let provided_field = provided.and_then(|provided| provided.field(field.response_key()));
        if field.name == TYPENAME_FIELD {
            return Ok(Outcome::resolvable(field.clone()));
        }
        let Some(child) = &field.selection_set else {
            if provided_field.is_some() {
                return Ok(Outcome::nothing());
            }
            return Ok(
                if self.schema.can_resolve_field(
                    parent.ty(),
                    &field.name,
                    context.schema_name,
                    context.allow_requirements,
                ) {
                    self.collect_requirements(context, parent, field, path)?;
                    Outcome::resolvable(field.clone())
                } else {
                    Outcome::remainder(field.clone())
                },
            );
        };

        if !self.schema.can_resolve_field(
            parent.ty(),
            &field.name,
            context.schema_name,
            context.allow_requirements,
        ) {
            return Ok(Outcome::remainder(field.clone()));
        }

        let child_provided = provided_field.and_then(|provided| provided.selection_set());
        let child_path = path.with_field(field.response_key().clone());
        let child_id = match context.index.as_deref() {
            Some(index) => Some(index.get_id(child)?),
            None => None,
        };
        let split = self.partition_level(context, child, child_id, child_provided, &child_path, false)?;

        let remainder = split
            .remainder
            .map(|left| rewrite_field(field, left));
        let resolvable = match split.resolvable {
            Some(kept) => Some(rewrite_field(field, kept)),
            None if child_id.is_some() && self.schema.is_entity(child.ty()) => {
                // The children were cut off into a backlog item. Keep the field so that the
                // lookup key can be merged here later.
                let typename = SelectionSet::typename_only(
                    child.ty().clone(),
                    self.schema.typename_definition(child.ty())?,
                );
                context.register(child, &typename)?;
                Some(rewrite_field(field, typename))
            }
            None if remainder.is_none() => {
                // Everything below is already provided.
                return Ok(Outcome::nothing());
            }
            None => {
                return Ok(Outcome::remainder(field.clone()));
            }
        };
        if resolvable.is_some() {
            self.collect_requirements(context, parent, field, path)?;
        }
        Ok(Outcome {
            resolvable,
            remainder,
        })
    }

    fn partition_inline_fragment(
        &self,
        context: &mut Context<'_, '_>,
        parent: &SelectionSet,
        fragment: &Arc<InlineFragmentSelection>,
        path: &SelectionPath,
    ) -> Result<Outcome<InlineFragmentSelection>, CompositeError> {
        let child = &fragment.selection_set;
        // A schema can only route a fragment whose type condition it knows.
        if !self.schema.type_in_schema(child.ty(), context.schema_name) {
            return Ok(Outcome::remainder(fragment.clone()));
        }
        let child_path = match &fragment.type_condition {
            Some(type_condition) if type_condition != parent.ty() => {
                path.with_type_condition(type_condition.clone())
            }
            _ => path.clone(),
        };
        let child_id = match context.index.as_deref() {
            Some(index) => Some(index.get_id(child)?),
            None => None,
        };
        let split = self.partition_level(context, child, child_id, None, &child_path, false)?;
        let rewrite = |selection_set: SelectionSet| {
            if selection_set.ptr_eq(child) {
                fragment.clone()
            } else {
                Arc::new(fragment.with_selection_set(selection_set))
            }
        };
        let remainder = split.remainder.map(rewrite);
        let resolvable = match split.resolvable {
            Some(kept) => Some(rewrite(kept)),
            None if child_id.is_some() && self.schema.is_entity(child.ty()) => {
                let typename = SelectionSet::typename_only(
                    child.ty().clone(),
                    self.schema.typename_definition(child.ty())?,
                );
                context.register(child, &typename)?;
                Some(rewrite(typename))
            }
            None if remainder.is_none() => return Ok(Outcome::nothing()),
            None => return Ok(Outcome::remainder(fragment.clone())),
        };
        Ok(Outcome {
            resolvable,
            remainder,
        })
    }

    fn collect_requirements(
        &self,
        context: &mut Context<'_, '_>,
        parent: &SelectionSet,
        field: &FieldSelection,
        path: &SelectionPath,
    ) -> Result<(), CompositeError> {
        let Some(requirements) = self
            .schema
            .field(parent.ty(), &field.name)
            .and_then(|definition| definition.source(context.schema_name))
            .and_then(|source| source.requirements.as_ref())
        else {
            return Ok(());
        };
        let Some(index) = context.index.as_deref() else {
            return Ok(());
        };
        context.field_requirements.push(FieldRequirement {
            parent: parent.clone(),
            parent_id: index.get_id(parent)?,
            path: path.clone(),
            field_path: path.with_field(field.response_key().clone()),
            requirements: requirements.clone(),
        });
        Ok(())
    }
}

/// Where a single selection ended up.
struct Outcome<T> {
    resolvable: Option<Arc<T>>,
    remainder: Option<Arc<T>>,
}

impl<T> Outcome<T> {
    fn resolvable(selection: Arc<T>) -> Self {
        Self {
            resolvable: Some(selection),
            remainder: None,
        }
    }

    fn remainder(selection: Arc<T>) -> Self {
        Self {
            resolvable: None,
            remainder: Some(selection),
        }
    }

    fn nothing() -> Self {
        Self {
            resolvable: None,
            remainder: None,
        }
    }
}

fn rewrite_field(field: &Arc<FieldSelection>, selection_set: SelectionSet) -> Arc<FieldSelection> {
    match &field.selection_set {
        Some(existing) if existing.ptr_eq(&selection_set) => field.clone(),
        _ => Arc::new(field.with_selection_set(Some(selection_set))),
    }
}
