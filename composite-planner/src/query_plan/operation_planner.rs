//! Best-first search for a plan.
//!
//! A candidate plan ([`PlanNode`]) is a list of emitted steps plus a backlog of selection sets
//! nobody resolves yet. Expanding a candidate takes the top backlog item and resolves as much of
//! it as the candidate's source schema can; whatever is left goes back on the backlog, and one
//! successor is created per source schema (and lookup, for entities) able to make progress on the
//! next item. Candidates are explored cheapest first; the first one with an empty backlog wins.
//!
//! Cross-schema data flows through requirements: before an entity can be fetched with a lookup,
//! the lookup key is merged into the earlier steps that fetch the entity, and fields that require
//! sibling fields get those merged into the earlier-or-same steps owning their parent. When none
//! of those steps can provide a required field, the item goes back on the backlog underneath a new
//! item for the missing fields, which later steps fetch first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::num::NonZeroU32;
use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::executable;
use apollo_compiler::validation::Valid;
use indexmap::IndexSet;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::trace;

use super::OperationPlan;
use super::PlanStep;
use super::PlanningStatistics;
use super::StepRequirement;
use super::partitioner::FieldRequirement;
use super::partitioner::SelectionSetPartitioner;
use super::partitioner::SelectionSetRef;
use super::selection_set_index::SelectionSetId;
use super::selection_set_index::SelectionSetIndex;
use super::selection_set_index::SelectionSetIndexBuilder;
use crate::bail;
use crate::error::CompositeError;
use crate::error::SingleCompositeError;
use crate::internal_error;
use crate::operation::FieldAlias;
use crate::operation::FieldSelection;
use crate::operation::InlineFragmentSelection;
use crate::operation::Operation;
use crate::operation::Selection;
use crate::operation::SelectionPath;
use crate::operation::SelectionSet;
use crate::operation::TYPENAME_FIELD;
use crate::operation::merging::MergeRecord;
use crate::operation::merging::merge_selection_sets;
use crate::schema::CompositeSchema;
use crate::schema::Lookup;
use crate::schema::SchemaName;
use crate::utils::PersistentList;
use crate::utils::PersistentStack;
use crate::utils::logging::snapshot;

/// Scales the cost of picking a source schema for a backlog item: a schema resolving `n` fields
/// of the item costs `SCHEMA_COST_FACTOR / n`.
const SCHEMA_COST_FACTOR: f64 = 2.0;
/// Estimated cost of every backlog item beyond the one being resolved.
const PENDING_ITEM_COST: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationPlannerConfig {
    /// The number of candidate plans the planner may evaluate before giving up with
    /// [`SingleCompositeError::PlanningLimitExceeded`].
    ///
    /// Defaults to 10000.
    pub max_evaluated_plans: NonZeroU32,

    /// The cost added to a candidate plan for each entity it fetches with a lookup.
    ///
    /// Defaults to 1.0.
    pub lookup_cost: f64,

    /// Name each sub-operation `{operation}__{source schema}__{step}` when the client operation
    /// is named.
    ///
    /// Defaults to true.
    pub generate_operation_names: bool,
}

impl Default for OperationPlannerConfig {
    fn default() -> Self {
        Self {
            max_evaluated_plans: NonZeroU32::MIN.saturating_add(9_999),
            lookup_cost: 1.0,
            generate_operation_names: true,
        }
    }
}

pub struct OperationPlanner {
    schema: Arc<CompositeSchema>,
    config: OperationPlannerConfig,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) enum BacklogKind {
    Resolve,
    /// The lookup key must be merged into the steps fetching the entity.
    InlineLookupRequirements { lookup: Arc<Lookup> },
    /// The key is in place; fetch the entity from the lookup's source schema.
    ResolveLookupSelection {
        lookup: Arc<Lookup>,
        key: StepRequirement,
    },
}

#[derive(Debug, Clone, Serialize)]
pub(crate) enum BacklogOrigin {
    /// Selections of the client operation.
    Operation,
    /// Selections of the client operation put back after queueing the requirements that no
    /// earlier step could provide.
    Deferred,
    /// Fields required by the field at `required_by`. Fields with requirements of their own are
    /// never resolved for them.
    Requirements { required_by: SelectionPath },
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct BacklogItem {
    kind: BacklogKind,
    selection_set: SelectionSetRef,
    origin: BacklogOrigin,
}

/// The outcome of merging required fields into earlier steps.
enum Inlining {
    Complete {
        steps: PersistentList<PlanStep>,
        provided_by: Vec<usize>,
        aliases: Vec<FieldAlias>,
    },
    /// None of the steps fetching the selection set can provide `missing`.
    Incomplete { missing: SelectionSet },
}

/// A candidate partial plan. Its source schema is the one chosen to make progress on the top
/// backlog item.
#[derive(Serialize)]
struct PlanNode {
    #[serde(skip)]
    previous: Option<Arc<PlanNode>>,
    schema_name: SchemaName,
    #[serde(skip)]
    index: SelectionSetIndex,
    backlog: PersistentStack<BacklogItem>,
    steps: PersistentList<PlanStep>,
    lookup: Option<Arc<Lookup>>,
    path_cost: f64,
    backlog_cost: f64,
}

impl PlanNode {
    fn total_cost(&self) -> f64 {
        self.path_cost + self.backlog_cost
    }

    /// The number of nodes leading to this one, itself included.
    fn depth(&self) -> u32 {
        let mut depth = 1;
        let mut node = self.previous.as_deref();
        while let Some(previous) = node {
            depth += 1;
            node = previous.previous.as_deref();
        }
        depth
    }
}

/// Orders the frontier: cheapest first, then first inserted.
struct FrontierEntry {
    cost: f64,
    sequence: u64,
    node: Arc<PlanNode>,
}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // `BinaryHeap` is a max-heap.
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrontierEntry {}

impl OperationPlanner {
    #[cfg_attr(
        feature = "snapshot_tracing",
        tracing::instrument(level = "trace", skip_all, name = "OperationPlanner::new")
    )]
    pub fn new(schema: CompositeSchema, config: OperationPlannerConfig) -> Self {
        Self {
            schema: Arc::new(schema),
            config,
        }
    }

    pub fn schema(&self) -> &CompositeSchema {
        &self.schema
    }

    pub fn config(&self) -> &OperationPlannerConfig {
        &self.config
    }

    /// Plans the operation named `operation_name` (or the only operation) of a document that was
    /// validated against [`CompositeSchema::schema`].
    pub fn create_plan(
        &self,
        document: &Valid<ExecutableDocument>,
        operation_name: Option<&str>,
    ) -> Result<OperationPlan, CompositeError> {
        let operation = Operation::from_document(document, operation_name)?;
        self.plan_operation(&operation)
    }

    #[cfg_attr(
        feature = "snapshot_tracing",
        tracing::instrument(level = "trace", skip_all, name = "OperationPlanner::plan_operation")
    )]
    pub fn plan_operation(&self, operation: &Operation) -> Result<OperationPlan, CompositeError> {
        debug!(operation = ?operation.name(), "planning operation");
        let index = SelectionSetIndex::create(operation);
        if operation.selection_set().is_empty() {
            debug!("nothing to fetch");
            return Ok(OperationPlan {
                operation: operation.clone(),
                steps: Vec::new(),
                statistics: PlanningStatistics::default(),
                index,
            });
        }

        let mut search = Search {
            planner: self,
            operation,
            partitioner: SelectionSetPartitioner::new(&self.schema),
            frontier: BinaryHeap::new(),
            sequence: 0,
            statistics: PlanningStatistics::default(),
            stranded: None,
        };
        let root = SelectionSetRef {
            node: operation.selection_set().clone(),
            id: index.get_id(operation.selection_set())?,
            path: SelectionPath::root(),
        };
        let backlog = PersistentStack::new().push(BacklogItem {
            kind: BacklogKind::Resolve,
            selection_set: root,
            origin: BacklogOrigin::Operation,
        });
        search.fork(None, &index, &backlog, &PersistentList::new(), 0.0);

        let node = search.run()?;
        let mut statistics = search.statistics;
        statistics.plan_depth = node.depth();
        let plan = OperationPlan {
            operation: operation.clone(),
            steps: node.steps.iter().map(|step| step.as_ref().clone()).collect(),
            statistics,
            index: node.index.clone(),
        };
        debug!(
            steps = plan.steps.len(),
            evaluated_plans = plan.statistics.evaluated_plans,
            "planned operation"
        );
        Ok(plan)
    }
}

struct Search<'a> {
    planner: &'a OperationPlanner,
    operation: &'a Operation,
    partitioner: SelectionSetPartitioner<'a>,
    frontier: BinaryHeap<FrontierEntry>,
    sequence: u64,
    statistics: PlanningStatistics,
    /// The last location where the search could not make progress.
    stranded: Option<SelectionPath>,
}

impl Search<'_> {
    fn run(&mut self) -> Result<Arc<PlanNode>, CompositeError> {
        let limit = self.planner.config.max_evaluated_plans.get();
        while let Some(entry) = self.frontier.pop() {
            self.statistics.evaluated_plans += 1;
            if self.statistics.evaluated_plans > limit {
                return Err(SingleCompositeError::PlanningLimitExceeded { limit }.into());
            }
            snapshot!(entry.node, "evaluating plan node");
            if let Some(complete) = self.expand(&entry.node)? {
                return Ok(complete);
            }
        }
        let path = match &self.stranded {
            Some(path) if !path.is_root() => path.to_string(),
            _ => "<root>".to_owned(),
        };
        Err(SingleCompositeError::NoViablePlan {
            operation: self.operation.name().map(|name| name.to_string()),
            path,
        }
        .into())
    }

    /// Makes progress on the top backlog item of `node`, returning the node if it completes the
    /// plan.
    fn expand(&mut self, node: &Arc<PlanNode>) -> Result<Option<Arc<PlanNode>>, CompositeError> {
        let Some((item, backlog)) = node.backlog.pop() else {
            return Ok(Some(node.clone()));
        };
        trace!(
            schema = %node.schema_name,
            path = %item.selection_set.path,
            cost = node.total_cost(),
            "expanding plan node"
        );
        match &item.kind {
            BacklogKind::Resolve => self.resolve(node, item, None, backlog),
            BacklogKind::ResolveLookupSelection { lookup, key } => {
                self.resolve(node, item, Some((lookup, key)), backlog)
            }
            BacklogKind::InlineLookupRequirements { lookup } => {
                self.inline_lookup_requirements(node, item, lookup, backlog)?;
                Ok(None)
            }
        }
    }

    fn resolve(
        &mut self,
        node: &Arc<PlanNode>,
        item: &BacklogItem,
        lookup: Option<(&Arc<Lookup>, &StepRequirement)>,
        backlog: PersistentStack<BacklogItem>,
    ) -> Result<Option<Arc<PlanNode>>, CompositeError> {
        let mut index = node.index.branch();
        let partition = self.partitioner.partition(
            &mut index,
            &node.schema_name,
            &item.selection_set,
            lookup.map(|(lookup, _)| &lookup.key),
            !matches!(item.origin, BacklogOrigin::Requirements { .. }),
        )?;
        let Some(resolvable) = partition.resolvable else {
            let path = self.stranded_path(item);
            self.dead_end(node, path, "nothing can be resolved");
            return Ok(None);
        };

        let mut resolved_nodes = Vec::new();
        resolvable.for_each_selection_set(&mut |selection_set| {
            resolved_nodes.push(selection_set.clone());
        });
        let selection_set_ids = resolved_nodes
            .iter()
            .map(|selection_set| index.get_id(selection_set))
            .collect::<Result<IndexSet<_>, _>>()?;

        let step_id = node.steps.len();
        let mut requirements: Vec<StepRequirement> =
            lookup.map(|(_, key)| key.clone()).into_iter().collect();
        let step = PlanStep {
            id: step_id,
            schema_name: node.schema_name.clone(),
            type_name: resolvable.ty().clone(),
            definition: self.step_definition(
                step_id,
                &node.schema_name,
                &resolvable,
                lookup.map(|(lookup, _)| lookup),
            )?,
            selection_set: resolvable,
            selection_set_ids,
            source_path: item.selection_set.path.clone(),
            lookup: lookup.map(|(lookup, _)| lookup.clone()),
            requirements: Vec::new(),
        };
        snapshot!("PlanStep", step.to_string(), "emitted step");
        let mut steps = node.steps.push(step);

        let mut missing = Vec::new();
        for requirement in &partition.field_requirements {
            match self.inline_requirements(
                &mut index,
                &steps,
                requirement.parent_id,
                &requirement.path,
                &requirement.requirements,
            )? {
                Inlining::Complete {
                    steps: patched,
                    provided_by,
                    aliases,
                } => {
                    steps = patched;
                    requirements.push(StepRequirement {
                        selection_set_id: requirement.parent_id,
                        path: requirement.path.clone(),
                        selection_set: requirement.requirements.clone(),
                        provided_by,
                        aliases,
                    });
                }
                Inlining::Incomplete { missing: fields } => missing.push((requirement, fields)),
            }
        }
        if !missing.is_empty() {
            self.defer(node, item, index, missing, backlog)?;
            return Ok(None);
        }
        if !requirements.is_empty() {
            let Some(step) = steps.get(step_id) else {
                bail!("Step {step_id} disappeared while inlining its requirements");
            };
            let step = PlanStep {
                requirements,
                ..step.as_ref().clone()
            };
            steps = steps.replace(step_id, step);
        }

        let mut backlog = backlog;
        for unresolved in partition.unresolved.into_iter().rev() {
            backlog = backlog.push(BacklogItem {
                kind: BacklogKind::Resolve,
                selection_set: unresolved,
                origin: match &item.origin {
                    BacklogOrigin::Requirements { .. } => item.origin.clone(),
                    BacklogOrigin::Operation | BacklogOrigin::Deferred => BacklogOrigin::Operation,
                },
            });
        }
        let index = index.build();
        let path_cost = node.total_cost();
        if backlog.is_empty() {
            return Ok(Some(Arc::new(PlanNode {
                previous: Some(node.clone()),
                schema_name: node.schema_name.clone(),
                index,
                backlog,
                steps,
                lookup: node.lookup.clone(),
                path_cost,
                backlog_cost: 0.0,
            })));
        }
        self.fork(Some(node), &index, &backlog, &steps, path_cost);
        Ok(None)
    }

    /// Puts `item` back on the backlog underneath one item per requirement that no earlier step
    /// provides, so that those fields are fetched by steps coming before the one resolving `item`.
    ///
    /// Each missing selection is a fresh copy bound to the Id of the requiring field's parent, so
    /// the steps fetching it are found when the requirement is inlined again. An item is deferred
    /// at most once.
    fn defer(
        &mut self,
        node: &Arc<PlanNode>,
        item: &BacklogItem,
        mut index: SelectionSetIndexBuilder,
        missing: Vec<(&FieldRequirement, SelectionSet)>,
        backlog: PersistentStack<BacklogItem>,
    ) -> Result<(), CompositeError> {
        let planner = self.planner;
        let mut backlog = backlog.push(BacklogItem {
            kind: BacklogKind::Resolve,
            selection_set: item.selection_set.clone(),
            origin: BacklogOrigin::Deferred,
        });
        for (requirement, fields) in missing.into_iter().rev() {
            let fetchable = matches!(item.origin, BacklogOrigin::Operation)
                && planner.schema.source_schemas().any(|schema_name| {
                    self.partitioner.resolvable_count(schema_name, &fields) > 0
                });
            if !fetchable {
                let path = self
                    .unresolvable_path(&fields, &requirement.path)
                    .unwrap_or_else(|| requirement.field_path.clone());
                self.dead_end(node, path, "field requirements cannot be fetched");
                return Ok(());
            }
            let copy = fields.fresh_copy();
            index.register(&requirement.parent, &copy)?;
            let mut nested = Vec::new();
            copy.for_each_selection_set(&mut |selection_set| nested.push(selection_set.clone()));
            for selection_set in nested.iter().skip(1) {
                index.register_new(selection_set)?;
            }
            backlog = backlog.push(BacklogItem {
                kind: BacklogKind::Resolve,
                selection_set: SelectionSetRef {
                    node: copy,
                    id: requirement.parent_id,
                    path: requirement.path.clone(),
                },
                origin: BacklogOrigin::Requirements {
                    required_by: requirement.field_path.clone(),
                },
            });
        }
        trace!(
            schema = %node.schema_name,
            path = %item.selection_set.path,
            "deferred until its requirements are fetched"
        );
        self.fork(
            Some(node),
            &index.build(),
            &backlog,
            &node.steps,
            node.total_cost(),
        );
        Ok(())
    }

    fn inline_lookup_requirements(
        &mut self,
        node: &Arc<PlanNode>,
        item: &BacklogItem,
        lookup: &Arc<Lookup>,
        backlog: PersistentStack<BacklogItem>,
    ) -> Result<(), CompositeError> {
        let mut index = node.index.branch();
        let Inlining::Complete {
            steps,
            provided_by,
            aliases,
        } = self.inline_requirements(
            &mut index,
            &node.steps,
            item.selection_set.id,
            &item.selection_set.path,
            &lookup.key,
        )?
        else {
            let path = self.stranded_path(item);
            self.dead_end(node, path, "lookup key cannot be fetched");
            return Ok(());
        };
        let pending = backlog.len() as f64 * PENDING_ITEM_COST;
        let resolvable_count = self
            .partitioner
            .resolvable_count(&node.schema_name, &item.selection_set.node);
        let key = StepRequirement {
            selection_set_id: item.selection_set.id,
            path: item.selection_set.path.clone(),
            selection_set: lookup.key.clone(),
            provided_by,
            aliases,
        };
        let backlog = backlog.push(BacklogItem {
            kind: BacklogKind::ResolveLookupSelection {
                lookup: lookup.clone(),
                key,
            },
            selection_set: item.selection_set.clone(),
            origin: item.origin.clone(),
        });
        self.enqueue(PlanNode {
            previous: Some(node.clone()),
            schema_name: node.schema_name.clone(),
            index: index.build(),
            backlog,
            steps,
            lookup: Some(lookup.clone()),
            path_cost: node.total_cost(),
            backlog_cost: schema_cost(resolvable_count) + pending,
        });
        Ok(())
    }

    /// Creates one successor per way of making progress on the top item of `backlog`.
    ///
    /// Items on a root operation type are resolved directly by any source schema resolving some
    /// of their fields. Entities are fetched through one of the lookups of such a schema.
    fn fork(
        &mut self,
        previous: Option<&Arc<PlanNode>>,
        index: &SelectionSetIndex,
        backlog: &PersistentStack<BacklogItem>,
        steps: &PersistentList<PlanStep>,
        path_cost: f64,
    ) {
        let Some((item, rest)) = backlog.pop() else {
            return;
        };
        let planner = self.planner;
        let schema = &planner.schema;
        let lookup_cost = planner.config.lookup_cost;
        let ty = item.selection_set.node.ty();
        let is_root_type = schema.is_root_type(ty);
        let pending = rest.len() as f64 * PENDING_ITEM_COST;
        let mut forks = 0;
        for schema_name in schema.source_schemas() {
            let resolvable_count = self
                .partitioner
                .resolvable_count(schema_name, &item.selection_set.node);
            if resolvable_count == 0 {
                continue;
            }
            let backlog_cost = schema_cost(resolvable_count) + pending;
            if is_root_type {
                forks += 1;
                self.enqueue(PlanNode {
                    previous: previous.cloned(),
                    schema_name: schema_name.clone(),
                    index: index.clone(),
                    backlog: backlog.clone(),
                    steps: steps.clone(),
                    lookup: None,
                    path_cost,
                    backlog_cost,
                });
                continue;
            }
            for lookup in schema.lookups(ty, schema_name) {
                forks += 1;
                self.enqueue(PlanNode {
                    previous: previous.cloned(),
                    schema_name: schema_name.clone(),
                    index: index.clone(),
                    backlog: rest.push(BacklogItem {
                        kind: BacklogKind::InlineLookupRequirements {
                            lookup: lookup.clone(),
                        },
                        selection_set: item.selection_set.clone(),
                        origin: item.origin.clone(),
                    }),
                    steps: steps.clone(),
                    lookup: Some(lookup.clone()),
                    path_cost,
                    backlog_cost: backlog_cost + lookup_cost,
                });
            }
        }
        if forks == 0 {
            let path = self.stranded_path(item);
            trace!(path = %path, "no source schema can make progress");
            self.statistics.dead_ends += 1;
            self.stranded = Some(path);
        }
    }

    fn enqueue(&mut self, node: PlanNode) {
        self.sequence += 1;
        self.frontier.push(FrontierEntry {
            cost: node.total_cost(),
            sequence: self.sequence,
            node: Arc::new(node),
        });
    }

    fn dead_end(&mut self, node: &PlanNode, path: SelectionPath, reason: &'static str) {
        trace!(schema = %node.schema_name, path = %path, reason, "dead end");
        self.statistics.dead_ends += 1;
        self.stranded = Some(path);
    }

    /// Where to report that `item` cannot make progress: the first field no source schema
    /// resolves or, for required fields, the field requiring them.
    fn stranded_path(&self, item: &BacklogItem) -> SelectionPath {
        let selection_set = &item.selection_set;
        self.unresolvable_path(&selection_set.node, &selection_set.path)
            .or_else(|| match &item.origin {
                BacklogOrigin::Requirements { required_by } => Some(required_by.clone()),
                BacklogOrigin::Operation | BacklogOrigin::Deferred => None,
            })
            .unwrap_or_else(|| selection_set.path.clone())
    }

    /// Merges `requirements` into the steps that resolve the selection set `target`, one step per
    /// source schema, in step order. Each step takes what its schema resolves without further
    /// requirements and passes the rest on to the next.
    fn inline_requirements(
        &self,
        index: &mut SelectionSetIndexBuilder,
        steps: &PersistentList<PlanStep>,
        target: SelectionSetId,
        path: &SelectionPath,
        requirements: &SelectionSet,
    ) -> Result<Inlining, CompositeError> {
        let mut steps = steps.clone();
        let mut remaining = Some(requirements.clone());
        let mut schemas = IndexSet::new();
        let mut provided_by = Vec::new();
        let mut aliases = Vec::new();
        for position in 0..steps.len() {
            let Some(pending) = remaining.clone() else {
                break;
            };
            let Some(step) = steps.get(position).cloned() else {
                break;
            };
            if !step.selection_set_ids.contains(&target) || !schemas.insert(step.schema_name.clone())
            {
                continue;
            }
            let (resolvable, remainder) =
                self.partitioner
                    .partition_detached(&step.schema_name, &pending, path)?;
            let Some(resolvable) = resolvable else {
                continue;
            };
            let Some(selection_set) = merge_at(
                index,
                &step.selection_set,
                target,
                &resolvable,
                path,
                &mut aliases,
            )?
            else {
                continue;
            };
            remaining = remainder;
            provided_by.push(step.id);
            if selection_set.ptr_eq(&step.selection_set) {
                continue;
            }
            let definition = self.step_definition(
                step.id,
                &step.schema_name,
                &selection_set,
                step.lookup.as_ref(),
            )?;
            steps = steps.replace(
                position,
                PlanStep {
                    selection_set,
                    definition,
                    ..step.as_ref().clone()
                },
            );
        }
        Ok(match remaining {
            None => Inlining::Complete {
                steps,
                provided_by,
                aliases,
            },
            Some(missing) => Inlining::Incomplete { missing },
        })
    }

    /// Builds the sub-operation that resolves `selection_set` in `schema_name`.
    fn step_definition(
        &self,
        step_id: usize,
        schema_name: &str,
        selection_set: &SelectionSet,
        lookup: Option<&Arc<Lookup>>,
    ) -> Result<Operation, CompositeError> {
        let mut used_variables = IndexSet::new();
        selection_set.collect_variables(&mut used_variables);
        let client_variables: Vec<_> = self
            .operation
            .variables()
            .iter()
            .filter(|variable| used_variables.contains(&variable.name))
            .cloned()
            .collect();
        let name = self.step_operation_name(schema_name, step_id)?;

        let Some(lookup) = lookup else {
            return Ok(Operation {
                operation_type: self.operation.operation_type,
                name,
                variables: Arc::new(client_variables),
                directives: self.operation.directives.clone(),
                selection_set: selection_set.clone(),
            });
        };

        let mut variables = Vec::with_capacity(lookup.arguments.len() + client_variables.len());
        let mut arguments = Vec::with_capacity(lookup.arguments.len());
        for argument in &lookup.arguments {
            let variable = unique_variable_name(&argument.name, &variables, &client_variables)?;
            arguments.push(Node::new(ast::Argument {
                name: argument.name.clone(),
                value: Node::new(ast::Value::Variable(variable.clone())),
            }));
            variables.push(Node::new(executable::VariableDefinition {
                name: variable,
                ty: argument.ty.clone(),
                default_value: None,
                directives: Default::default(),
            }));
        }
        variables.extend(client_variables);

        let entity_selection_set = if lookup.return_type() == selection_set.ty() {
            selection_set.clone()
        } else {
            SelectionSet::new(
                lookup.return_type().clone(),
                vec![Selection::InlineFragment(Arc::new(InlineFragmentSelection {
                    type_condition: Some(selection_set.ty().clone()),
                    directives: Default::default(),
                    selection_set: selection_set.clone(),
                }))],
            )
        };
        let lookup_field = FieldSelection {
            definition: lookup.field_definition.clone(),
            alias: None,
            name: lookup.field_name.clone(),
            arguments,
            directives: Default::default(),
            selection_set: Some(entity_selection_set),
        };
        let query_type = self
            .planner
            .schema
            .root_type(ast::OperationType::Query)
            .ok_or_else(|| internal_error!("The composite schema has no query type"))?;
        Ok(Operation {
            operation_type: executable::OperationType::Query,
            name,
            variables: Arc::new(variables),
            directives: Default::default(),
            selection_set: SelectionSet::new(
                query_type.clone(),
                vec![Selection::Field(Arc::new(lookup_field))],
            ),
        })
    }

    fn step_operation_name(
        &self,
        schema_name: &str,
        step_id: usize,
    ) -> Result<Option<Name>, CompositeError> {
        if !self.planner.config.generate_operation_names {
            return Ok(None);
        }
        let Some(operation_name) = self.operation.name() else {
            return Ok(None);
        };
        let schema_name: String = schema_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let name = format!("{operation_name}__{schema_name}__{step_id}");
        Name::new(&name)
            .map(Some)
            .map_err(|_| internal_error!("Generated an invalid operation name \"{name}\""))
    }

    /// Finds the first field under `selection_set` that no source schema can resolve.
    fn unresolvable_path(
        &self,
        selection_set: &SelectionSet,
        path: &SelectionPath,
    ) -> Option<SelectionPath> {
        let schema = &self.planner.schema;
        selection_set
            .selections()
            .iter()
            .find_map(|selection| match selection {
                Selection::Field(field) if field.name == TYPENAME_FIELD => None,
                Selection::Field(field) => {
                    let field_path = path.with_field(field.response_key().clone());
                    let resolvable = schema.source_schemas().any(|schema_name| {
                        schema.can_resolve_field(selection_set.ty(), &field.name, schema_name, true)
                    });
                    if !resolvable {
                        return Some(field_path);
                    }
                    field
                        .selection_set
                        .as_ref()
                        .and_then(|child| self.unresolvable_path(child, &field_path))
                }
                Selection::InlineFragment(fragment) => {
                    let fragment_path = match &fragment.type_condition {
                        Some(type_condition) => path.with_type_condition(type_condition.clone()),
                        None => path.clone(),
                    };
                    self.unresolvable_path(&fragment.selection_set, &fragment_path)
                }
            })
    }
}

fn schema_cost(resolvable_count: usize) -> f64 {
    SCHEMA_COST_FACTOR / resolvable_count.max(1) as f64
}

fn unique_variable_name(
    argument: &Name,
    lookup_variables: &[Node<executable::VariableDefinition>],
    client_variables: &[Node<executable::VariableDefinition>],
) -> Result<Name, CompositeError> {
    let base = format!("lookup_{argument}");
    let is_taken = |candidate: &str| {
        lookup_variables
            .iter()
            .chain(client_variables)
            .any(|variable| variable.name.as_str() == candidate)
    };
    let mut candidate = base.clone();
    let mut suffix = 0;
    while is_taken(&candidate) {
        suffix += 1;
        candidate = format!("{base}_{suffix}");
    }
    Name::new(&candidate)
        .map_err(|_| internal_error!("Generated an invalid variable name \"{candidate}\""))
}

/// Merges `addition` into the selection set of `root` bound to `target`, rebuilding its
/// ancestors. Every rewritten selection set that has an identity is registered in `index`, and
/// every merged field that ended up under another response key is added to `aliases`.
///
/// Returns `None` if `root` contains no selection set bound to `target`.
fn merge_at(
    index: &mut SelectionSetIndexBuilder,
    root: &SelectionSet,
    target: SelectionSetId,
    addition: &SelectionSet,
    path: &SelectionPath,
    aliases: &mut Vec<FieldAlias>,
) -> Result<Option<SelectionSet>, CompositeError> {
    let mut ancestors = Vec::new();
    let Some(located) = locate(index, root, target, &mut ancestors) else {
        return Ok(None);
    };
    let mut record = MergeRecord::default();
    let mut current = merge_selection_sets(&located, addition, path, &mut record)?;
    aliases.append(&mut record.aliases);
    if current.ptr_eq(&located) {
        return Ok(Some(root.clone()));
    }
    for (original, rewritten) in &record.rewrites {
        if index.try_get_id(original).is_some() {
            index.register(original, rewritten)?;
        }
    }
    for (parent, position) in ancestors.into_iter().rev() {
        let rebuilt = replace_child(&parent, position, current)?;
        if index.try_get_id(&parent).is_some() {
            index.register(&parent, &rebuilt)?;
        }
        current = rebuilt;
    }
    Ok(Some(current))
}

/// Depth-first search for the selection set bound to `target`, recording the chain of
/// `(parent, selection position)` leading to it.
fn locate(
    index: &SelectionSetIndexBuilder,
    node: &SelectionSet,
    target: SelectionSetId,
    ancestors: &mut Vec<(SelectionSet, usize)>,
) -> Option<SelectionSet> {
    if index.try_get_id(node) == Some(target) {
        return Some(node.clone());
    }
    for (position, selection) in node.selections().iter().enumerate() {
        let Some(child) = selection.selection_set() else {
            continue;
        };
        ancestors.push((node.clone(), position));
        if let Some(found) = locate(index, child, target, ancestors) {
            return Some(found);
        }
        ancestors.pop();
    }
    None
}

fn replace_child(
    parent: &SelectionSet,
    position: usize,
    child: SelectionSet,
) -> Result<SelectionSet, CompositeError> {
    let mut selections = parent.selections().to_vec();
    let Some(selection) = selections.get_mut(position) else {
        bail!("No selection at position {position} of `{parent}`");
    };
    *selection = match selection {
        Selection::Field(field) => {
            Selection::Field(Arc::new(field.with_selection_set(Some(child))))
        }
        Selection::InlineFragment(fragment) => {
            Selection::InlineFragment(Arc::new(fragment.with_selection_set(child)))
        }
    };
    Ok(SelectionSet::new(parent.ty().clone(), selections))
}
