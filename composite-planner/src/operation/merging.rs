//! Provides methods for recursively merging selection sets.
use std::fmt;
use std::sync::Arc;

use apollo_compiler::Name;
use serde::Serialize;

use super::FieldSelection;
use super::InlineFragmentSelection;
use super::Selection;
use super::SelectionPath;
use super::SelectionSet;
use crate::ensure;
use crate::error::CompositeError;
use crate::internal_error;

/// A selection set that was replaced by a merged copy. The caller decides whether the copy must
/// inherit the identity of the original.
pub(crate) type Rewrite = (SelectionSet, SelectionSet);

/// A merged field that has to be read from another response key than the one it was requested
/// with, because that key is used by a different field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldAlias {
    /// The location of the selection set holding the field.
    pub path: SelectionPath,
    pub response_key: Name,
    pub alias: Name,
}

impl fmt::Display for FieldAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.path.is_root() {
            write!(f, "{}.", self.path)?;
        }
        write!(f, "{} as {}", self.response_key, self.alias)
    }
}

/// What merging changed besides the merged selection set itself.
#[derive(Debug, Default)]
pub(crate) struct MergeRecord {
    /// Every replaced selection set, outermost last.
    pub(crate) rewrites: Vec<Rewrite>,
    pub(crate) aliases: Vec<FieldAlias>,
}

/// Merges `addition` into `target`.
///
/// A field is merged into the field of `target` that selects the same data: the same field with
/// the same arguments and directives, preferably under the same response key. When there is none
/// and the response key is already in use, the field is added under a generated alias
/// `{response_key}__alias_{n}`. Anything new is appended after the existing selections so the
/// order of `target` is preserved.
///
/// When nothing needs to be added, `target` itself is returned. Every replaced selection set
/// (including `target`) and every field that ends up under another response key is reported in
/// `record`.
///
/// # Errors
/// Returns an error if the two selection sets are not on the same type.
pub(crate) fn merge_selection_sets(
    target: &SelectionSet,
    addition: &SelectionSet,
    path: &SelectionPath,
    record: &mut MergeRecord,
) -> Result<SelectionSet, CompositeError> {
    ensure!(
        target.ty() == addition.ty(),
        "Cannot merge a selection set on \"{}\" into a selection set on \"{}\"",
        addition.ty(),
        target.ty(),
    );
    let mut selections = target.selections().to_vec();
    let mut changed = false;
    for selection in addition.selections() {
        match selection {
            Selection::Field(field) => {
                changed |= merge_field(&mut selections, field, path, record)?;
            }
            Selection::InlineFragment(fragment) => {
                changed |= merge_inline_fragment(&mut selections, fragment, path, record)?;
            }
        }
    }
    if !changed {
        return Ok(target.clone());
    }
    let merged = SelectionSet::new(target.ty().clone(), selections);
    record.rewrites.push((target.clone(), merged.clone()));
    Ok(merged)
}

fn merge_field(
    selections: &mut Vec<Selection>,
    field: &Arc<FieldSelection>,
    path: &SelectionPath,
    record: &mut MergeRecord,
) -> Result<bool, CompositeError> {
    let response_key = field.response_key();
    let same_key = selections.iter().position(|selection| {
        matches!(selection, Selection::Field(existing) if existing.response_key() == response_key)
    });
    let selects_same_data = |selection: &Selection| {
        matches!(selection, Selection::Field(existing) if existing.selects_same_data(field))
    };
    let same_field = match same_key {
        Some(position) if selects_same_data(&selections[position]) => Some(position),
        _ => selections.iter().position(&selects_same_data),
    };

    let Some(position) = same_field else {
        let added = if same_key.is_some() {
            let alias = generate_alias(response_key, selections)?;
            record.aliases.push(FieldAlias {
                path: path.clone(),
                response_key: response_key.clone(),
                alias: alias.clone(),
            });
            Arc::new(FieldSelection {
                alias: Some(alias),
                ..field.as_ref().clone()
            })
        } else {
            field.clone()
        };
        selections.push(Selection::Field(added));
        return Ok(true);
    };
    let Selection::Field(existing) = &selections[position] else {
        return Ok(false);
    };
    if existing.response_key() != response_key {
        record.aliases.push(FieldAlias {
            path: path.clone(),
            response_key: response_key.clone(),
            alias: existing.response_key().clone(),
        });
    }
    let (Some(existing_selection_set), Some(added_selection_set)) =
        (&existing.selection_set, &field.selection_set)
    else {
        return Ok(false);
    };
    let merged = merge_selection_sets(
        existing_selection_set,
        added_selection_set,
        &path.with_field(existing.response_key().clone()),
        record,
    )?;
    if merged.ptr_eq(existing_selection_set) {
        return Ok(false);
    }
    selections[position] = Selection::Field(Arc::new(existing.with_selection_set(Some(merged))));
    Ok(true)
}

/// The first `{response_key}__alias_{n}` that no field of `selections` uses.
fn generate_alias(response_key: &Name, selections: &[Selection]) -> Result<Name, CompositeError> {
    let is_taken = |candidate: &str| {
        selections.iter().any(|selection| {
            matches!(selection, Selection::Field(field) if field.response_key() == candidate)
        })
    };
    let alias = (0..=selections.len())
        .map(|counter| format!("{response_key}__alias_{counter}"))
        .find(|candidate| !is_taken(candidate))
        .ok_or_else(|| internal_error!("Ran out of aliases for `{response_key}`"))?;
    Name::new(&alias).map_err(|_| internal_error!("Generated an invalid alias \"{alias}\""))
}

fn merge_inline_fragment(
    selections: &mut Vec<Selection>,
    fragment: &Arc<InlineFragmentSelection>,
    path: &SelectionPath,
    record: &mut MergeRecord,
) -> Result<bool, CompositeError> {
    let existing = selections.iter().position(|selection| {
        matches!(selection, Selection::InlineFragment(existing)
            if existing.type_condition == fragment.type_condition
                && existing.directives == fragment.directives)
    });
    let Some(position) = existing else {
        selections.push(Selection::InlineFragment(fragment.clone()));
        return Ok(true);
    };
    let Selection::InlineFragment(existing) = &selections[position] else {
        return Ok(false);
    };
    let fragment_path = match &existing.type_condition {
        Some(type_condition) => path.with_type_condition(type_condition.clone()),
        None => path.clone(),
    };
    let merged = merge_selection_sets(
        &existing.selection_set,
        &fragment.selection_set,
        &fragment_path,
        record,
    )?;
    if merged.ptr_eq(&existing.selection_set) {
        return Ok(false);
    }
    selections[position] = Selection::InlineFragment(Arc::new(existing.with_selection_set(merged)));
    Ok(true)
}
