//! ## Usage
//!
//! Plans GraphQL operations against a composite schema: a schema assembled from several
//! independent source schemas, where each field declares which source schemas resolve it.
//!
//! ```rust
//! use apollo_compiler::ExecutableDocument;
//! use composite_planner::CompositeSchema;
//! use composite_planner::OperationPlanner;
//!
//! let schema = CompositeSchema::parse(r#"
//!     type Query {
//!       product: Product @source(schema: "products")
//!       productById(id: ID!): Product @source(schema: "reviews")
//!     }
//!
//!     type Product @lookup(schema: "reviews", field: "productById", key: "id") {
//!       id: ID! @source(schema: "products") @source(schema: "reviews")
//!       name: String @source(schema: "products")
//!       rating: Int @source(schema: "reviews")
//!     }
//! "#).unwrap();
//! let planner = OperationPlanner::new(schema, Default::default());
//! let document = ExecutableDocument::parse_and_validate(
//!     planner.schema().schema(),
//!     "{ product { name rating } }",
//!     "query.graphql",
//! ).unwrap();
//! let plan = planner.create_plan(&document, None).unwrap();
//! assert_eq!(plan.steps.len(), 2);
//! ```
//!
//! Fetching the steps and stitching their results together is up to the caller.

#![warn(
    rustdoc::broken_intra_doc_links,
    unreachable_pub,
    unreachable_patterns,
    unused,
    unused_qualifications,
    dead_code,
    while_true,
    unconditional_panic,
    clippy::all
)]

mod display_helpers;
pub mod error;
pub mod operation;
pub mod query_plan;
pub mod schema;
pub(crate) mod utils;

pub use crate::error::CompositeError;
pub use crate::error::SingleCompositeError;
pub use crate::operation::Operation;
pub use crate::query_plan::OperationPlan;
pub use crate::query_plan::PlanStep;
pub use crate::query_plan::operation_planner::OperationPlanner;
pub use crate::query_plan::operation_planner::OperationPlannerConfig;
pub use crate::query_plan::selection_set_index::SelectionSetId;
pub use crate::query_plan::selection_set_index::SelectionSetIndex;
pub use crate::schema::CompositeSchema;

const _: () = {
    const fn assert_thread_safe<T: Sync + Send>() {}

    assert_thread_safe::<CompositeSchema>();
    assert_thread_safe::<OperationPlanner>();
    assert_thread_safe::<OperationPlan>();
};
