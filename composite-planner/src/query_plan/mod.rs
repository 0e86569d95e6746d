use std::fmt;
use std::sync::Arc;

use apollo_compiler::schema::NamedType;
use indexmap::IndexSet;
use itertools::Itertools;
use serde::Serialize;

use crate::display_helpers::IndentedWriter;
use crate::operation::FieldAlias;
use crate::operation::Operation;
use crate::operation::SelectionPath;
use crate::operation::SelectionSet;
use crate::query_plan::selection_set_index::SelectionSetId;
use crate::query_plan::selection_set_index::SelectionSetIndex;
use crate::schema::Lookup;
use crate::schema::SchemaName;

pub mod operation_planner;
pub(crate) mod partitioner;
pub mod selection_set_index;

/// The result of planning an operation: sub-operations for individual source schemas, in the
/// order they were planned.
///
/// A step only ever depends on steps that come before it.
#[derive(Debug, Clone, Serialize)]
pub struct OperationPlan {
    pub operation: Operation,
    pub steps: Vec<PlanStep>,
    pub statistics: PlanningStatistics,
    /// Identities of every selection set the steps were built from.
    #[serde(skip)]
    pub index: SelectionSetIndex,
}

/// One sub-operation against one source schema.
#[derive(Debug, Clone, Serialize)]
pub struct PlanStep {
    pub id: usize,
    pub schema_name: SchemaName,
    /// The type of [`PlanStep::selection_set`].
    #[serde(serialize_with = "serialize_display")]
    pub type_name: NamedType,
    /// The operation to send to the source schema.
    pub definition: Operation,
    /// The part of the client operation this step resolves. For a lookup this is what is selected
    /// on the looked up entity; otherwise it is the root selection set.
    pub selection_set: SelectionSet,
    /// The Ids of every selection set resolved (even partially) by this step.
    pub selection_set_ids: IndexSet<SelectionSetId>,
    /// Where the result of this step belongs in the client response.
    pub source_path: SelectionPath,
    pub lookup: Option<Arc<Lookup>>,
    pub requirements: Vec<StepRequirement>,
}

/// Data a step needs from earlier steps.
#[derive(Debug, Clone, Serialize)]
pub struct StepRequirement {
    /// The selection set the required fields were merged into.
    pub selection_set_id: SelectionSetId,
    pub path: SelectionPath,
    pub selection_set: SelectionSet,
    /// The steps that fetch the required fields.
    pub provided_by: Vec<usize>,
    /// Required fields that the providing steps select under another response key.
    pub aliases: Vec<FieldAlias>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanningStatistics {
    /// Candidate plans taken off the frontier.
    pub evaluated_plans: u32,
    /// Candidate plans that could not make progress.
    pub dead_ends: u32,
    /// The number of expansions on the path to the chosen plan.
    pub plan_depth: u32,
}

impl OperationPlan {
    /// Whether there is nothing to fetch, e.g. for an operation that only selects introspection
    /// fields.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, id: usize) -> Option<&PlanStep> {
        self.steps.get(id)
    }

    fn write_indented(&self, writer: &mut IndentedWriter<'_, '_>) -> fmt::Result {
        writer.write("OperationPlan ")?;
        writer.block(&self.steps, |writer, step| step.write_indented(writer))
    }
}

impl PlanStep {
    fn write_indented(&self, writer: &mut IndentedWriter<'_, '_>) -> fmt::Result {
        writer.write(format_args!("Step({}) [{}] at ", self.id, self.schema_name))?;
        if self.source_path.is_root() {
            writer.write("<root>")?;
        } else {
            writer.write(&self.source_path)?;
        }
        if let Some(lookup) = &self.lookup {
            writer.write(format_args!(" via {}", lookup.field_name))?;
        }
        for requirement in &self.requirements {
            writer.write(format_args!(
                " requires {} from [{}]",
                requirement.selection_set,
                requirement.provided_by.iter().join(", ")
            ))?;
            for alias in &requirement.aliases {
                writer.write(format_args!(" ({alias})"))?;
            }
        }
        writer.write(" ")?;
        let definition = self.definition.to_string();
        writer.block(definition.lines(), |writer, line| writer.write(line))?;
        writer.write(",")
    }
}

impl fmt::Display for OperationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(&mut IndentedWriter::new(f))
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(&mut IndentedWriter::new(f))
    }
}

fn serialize_display<T: fmt::Display, S: serde::Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}
