use pretty_assertions::assert_eq;

use super::plan_support::CATALOG;
use super::plan_support::assert_covers_operation;
use super::plan_support::step_schemas;
use super::plan_support::step_selection_sets;

#[test]
fn entity_fragments_are_resolved_through_lookups() {
    let planner = planner!(CATALOG);
    let plan = assert_plan!(
        planner,
        r#"
        query Node($first: Int) {
          node(id: "1") {
            id
            ... on Product {
              name
              reviews(first: $first) { body }
            }
          }
        }
        "#,
        @r###"
    OperationPlan {
      Step(0) [products] at <root> {
        query Node__products__0 {
          node(id: "1") {
            id
            ... on Product {
              name
              id
            }
          }
        }
      },
      Step(1) [reviews] at node|[Product] via productById requires { id } from [0] {
        query Node__reviews__1($lookup_id: ID!, $first: Int) {
          productById(id: $lookup_id) {
            reviews(first: $first) {
              body
            }
          }
        }
      },
    }
    "###
    );
    assert_covers_operation(&plan);
}

#[test]
fn named_fragments_are_planned_like_inline_ones() {
    let planner = planner!(CATALOG);
    let plan = plan!(
        planner,
        r#"
        {
          product(id: "1") { ...Details }
        }

        fragment Details on Product {
          name
          inStock
        }
        "#
    )
    .unwrap();

    assert_eq!(step_schemas(&plan), vec!["products", "inventory"]);
    assert_eq!(
        step_selection_sets(&plan),
        vec![
            r#"{ product(id: "1") { ... on Product { name upc } } }"#,
            "{ inStock }",
        ]
    );
    assert_eq!(plan.steps[1].source_path.to_string(), "product");
    assert_covers_operation(&plan);
}

#[test]
fn abstract_type_conditions_stay_with_schemas_that_know_an_implementation() {
    let planner = planner!(CATALOG);
    let plan = plan!(planner, r#"{ product(id: "1") { ... on Node { id } name } }"#).unwrap();

    assert_eq!(plan.steps.len(), 1);
    assert!(plan.steps[0].selection_set.ptr_eq(plan.operation.selection_set()));
}

#[test]
fn only_used_client_variables_are_forwarded() {
    let planner = planner!(CATALOG);
    let plan = plan!(
        planner,
        r#"
        query($id: ID!, $first: Int, $withName: Boolean!) {
          product(id: $id) {
            name @include(if: $withName)
            reviews(first: $first) { body }
          }
        }
        "#
    )
    .unwrap();

    let variables = |step: usize| -> Vec<String> {
        plan.steps[step]
            .definition
            .variables()
            .iter()
            .map(|variable| variable.name.to_string())
            .collect()
    };
    assert_eq!(variables(0), vec!["id", "withName"]);
    assert_eq!(variables(1), vec!["lookup_id", "first"]);
}

#[test]
fn lookups_returning_an_abstract_type_select_the_entity_with_a_fragment() {
    let planner = planner!(
        r#"
        type Query {
          product: Product @source(schema: "a")
          node(id: ID!): Node @source(schema: "b")
        }

        interface Node {
          id: ID! @source(schema: "a") @source(schema: "b")
        }

        type Product implements Node @lookup(schema: "b", field: "node", key: "id") {
          id: ID! @source(schema: "a") @source(schema: "b")
          name: String @source(schema: "a")
          rating: Int @source(schema: "b")
        }
        "#
    );
    let plan = plan!(planner, "{ product { name rating } }").unwrap();

    assert_eq!(
        step_selection_sets(&plan),
        vec!["{ product { name id } }", "{ rating }"]
    );
    insta::assert_snapshot!(
        plan.steps[1].definition.selection_set(),
        @"{ node(id: $lookup_id) { ... on Product { rating } } }"
    );
}
