use std::num::NonZeroU32;

use composite_planner::OperationPlannerConfig;
use composite_planner::SingleCompositeError;
use pretty_assertions::assert_eq;
use rstest::rstest;

use super::plan_support::CATALOG;

#[rstest]
#[case::unsourced_entity_field(r#"{ product(id: "1") { name secret } }"#, "product.secret")]
#[case::unsourced_root_field("{ featured { name } }", "featured")]
#[case::only_unsourced_fields(r#"{ product(id: "1") { secret } }"#, "product.secret")]
fn unresolvable_fields_leave_no_viable_plan(#[case] operation: &str, #[case] path: &str) {
    let planner = planner!(CATALOG);
    let error = plan!(planner, operation).unwrap_err();

    let Some(SingleCompositeError::NoViablePlan {
        operation: name,
        path: stranded,
    }) = error.as_single()
    else {
        panic!("unexpected error: {error}");
    };
    assert_eq!(name, &None);
    assert_eq!(stranded, path);
    assert_eq!(error.as_single().map(|error| error.code()), Some("NO_VIABLE_PLAN"));
}

#[test]
fn no_viable_plan_names_the_operation() {
    let planner = planner!(CATALOG);
    let error = plan!(planner, "query Featured { featured { name } }").unwrap_err();
    insta::assert_snapshot!(
        error,
        @"Operation `Featured` cannot be planned against this composite schema: no source schema can resolve the selections at `featured`"
    );
}

#[test]
fn planning_stops_at_the_evaluation_limit() {
    let config = OperationPlannerConfig {
        max_evaluated_plans: NonZeroU32::new(1).unwrap(),
        ..Default::default()
    };
    let planner = planner!(config = config, CATALOG);
    let operation = r#"query GetProduct { product(id: "1") { name reviews { body } } }"#;

    let error = plan!(planner, operation).unwrap_err();
    assert!(matches!(
        error.as_single(),
        Some(SingleCompositeError::PlanningLimitExceeded { limit: 1 })
    ));

    // A single schema plan is found with the first evaluation.
    let plan = plan!(planner, r#"{ product(id: "1") { name } }"#).unwrap();
    assert_eq!(plan.statistics.evaluated_plans, 1);
}

#[test]
fn unknown_operations_are_rejected() {
    let planner = planner!(CATALOG);
    let document = apollo_compiler::ExecutableDocument::parse_and_validate(
        planner.schema().schema(),
        "query A { products { name } } query B { products { price } }",
        "operation.graphql",
    )
    .unwrap();

    let error = planner.create_plan(&document, Some("C")).unwrap_err();
    assert_eq!(error.as_single().map(|error| error.code()), Some("UNKNOWN_OPERATION"));
    assert!(planner.create_plan(&document, Some("B")).is_ok());
}
