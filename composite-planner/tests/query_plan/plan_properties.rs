use composite_planner::OperationPlannerConfig;
use pretty_assertions::assert_eq;
use rstest::rstest;

use super::plan_support::CATALOG;
use super::plan_support::assert_covers_operation;

#[rstest]
#[case(r#"{ product(id: "1") { name reviews { body author { name } } } }"#)]
#[case(r#"{ products { inStock shippingEstimate reviews { body } } }"#)]
#[case(r#"query($first: Int) { node(id: "1") { ... on Product { reviews(first: $first) { body } inStock } } }"#)]
fn plans_are_deterministic(#[case] operation: &str) {
    let first = plan!(planner!(CATALOG), operation).unwrap();
    let second = plan!(planner!(CATALOG), operation).unwrap();
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(first.statistics, second.statistics);
    assert_covers_operation(&first);
}

#[rstest]
#[case(r#"{ product(id: "1") { name reviews { body author { name } } } }"#)]
#[case(r#"{ products { inStock shippingEstimate reviews { body } } }"#)]
fn steps_only_depend_on_earlier_steps(#[case] operation: &str) {
    let planner = planner!(CATALOG);
    let plan = plan!(planner, operation).unwrap();
    for (position, step) in plan.steps.iter().enumerate() {
        assert_eq!(step.id, position);
        for requirement in &step.requirements {
            assert!(!requirement.provided_by.is_empty());
            assert!(
                requirement
                    .provided_by
                    .iter()
                    .all(|provider| *provider < step.id),
                "step {} requires data from {:?}",
                step.id,
                requirement.provided_by
            );
        }
    }
}

#[test]
fn rewritten_selection_sets_keep_their_identity() {
    let planner = planner!(CATALOG);
    let plan = plan!(planner, r#"{ product(id: "1") { name reviews { body } } }"#).unwrap();

    let original = plan
        .operation
        .selection_set()
        .field("product")
        .and_then(|field| field.selection_set())
        .unwrap();
    let rewritten = plan.steps[0]
        .selection_set
        .field("product")
        .and_then(|field| field.selection_set())
        .unwrap();
    assert!(!rewritten.ptr_eq(original));
    assert_eq!(
        plan.index.get_id(rewritten).unwrap(),
        plan.index.get_id(original).unwrap()
    );
    assert_eq!(
        plan.index.get_id(&plan.steps[0].selection_set).unwrap(),
        plan.index.get_id(plan.operation.selection_set()).unwrap()
    );
}

#[test]
fn introspection_only_operations_plan_to_nothing() {
    let planner = planner!(CATALOG);
    let plan = plan!(planner, "{ __typename __schema { queryType { name } } }").unwrap();
    assert!(plan.is_empty());
    assert_eq!(plan.statistics.evaluated_plans, 0);
    insta::assert_snapshot!(plan, @"OperationPlan {}");
}

#[rstest]
#[case::generated(true, Some("GetProduct__reviews__1"))]
#[case::disabled(false, None)]
fn step_operation_names(#[case] generate_operation_names: bool, #[case] expected: Option<&str>) {
    let config = OperationPlannerConfig {
        generate_operation_names,
        ..Default::default()
    };
    let planner = planner!(config = config, CATALOG);
    let plan = plan!(
        planner,
        r#"query GetProduct { product(id: "1") { reviews { body } } }"#
    )
    .unwrap();
    assert_eq!(
        plan.steps[1].definition.name().map(|name| name.as_str()),
        expected
    );
}

#[test]
fn anonymous_operations_produce_anonymous_steps() {
    let planner = planner!(CATALOG);
    let plan = plan!(planner, r#"{ product(id: "1") { inStock } }"#).unwrap();
    assert!(plan.steps.iter().all(|step| step.definition.name().is_none()));
}

#[test]
fn plans_serialize_to_json() {
    let planner = planner!(CATALOG);
    let plan = plan!(planner, r#"{ product(id: "1") { name inStock } }"#).unwrap();

    let json = serde_json::to_value(&plan).unwrap();
    let steps = json["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[1]["schema_name"], "inventory");
    assert_eq!(steps[1]["type_name"], "Product");
    assert_eq!(steps[1]["source_path"], "product");
    assert_eq!(steps[1]["selection_set"], "{ inStock }");
    assert_eq!(steps[1]["requirements"][0]["provided_by"], serde_json::json!([0]));
    assert_eq!(json["statistics"]["plan_depth"], plan.statistics.plan_depth);
    assert!(json.get("index").is_none());
}
