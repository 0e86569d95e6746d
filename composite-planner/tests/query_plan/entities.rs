use pretty_assertions::assert_eq;
use rstest::rstest;

use super::plan_support::CATALOG;
use super::plan_support::assert_covers_operation;
use super::plan_support::step_schemas;
use super::plan_support::step_selection_sets;

#[test]
fn single_schema_operation_is_not_rewritten() {
    let planner = planner!(CATALOG);
    let plan = plan!(planner, r#"{ product(id: "1") { id name price } }"#).unwrap();

    assert_eq!(plan.steps.len(), 1);
    let step = &plan.steps[0];
    assert_eq!(&*step.schema_name, "products");
    assert!(step.selection_set.ptr_eq(plan.operation.selection_set()));
    assert!(step.definition.selection_set().ptr_eq(plan.operation.selection_set()));
    assert!(step.lookup.is_none());
    assert!(step.source_path.is_root());
    assert_covers_operation(&plan);
}

#[test]
fn entity_fields_from_another_schema_use_a_lookup() {
    let planner = planner!(CATALOG);
    let plan = assert_plan!(
        planner,
        r#"query GetProduct { product(id: "1") { name reviews { body } } }"#,
        @r###"
    OperationPlan {
      Step(0) [products] at <root> {
        query GetProduct__products__0 {
          product(id: "1") {
            name
            id
          }
        }
      },
      Step(1) [reviews] at product via productById requires { id } from [0] {
        query GetProduct__reviews__1($lookup_id: ID!) {
          productById(id: $lookup_id) {
            reviews {
              body
            }
          }
        }
      },
    }
    "###
    );
    assert_covers_operation(&plan);

    // The lookup resolves the same selection set the first step stopped at.
    let product = plan
        .operation
        .selection_set()
        .field("product")
        .and_then(|field| field.selection_set())
        .unwrap();
    let product_id = plan.index.get_id(product).unwrap();
    assert!(plan.steps[0].selection_set_ids.contains(&product_id));
    assert!(plan.steps[1].selection_set_ids.contains(&product_id));
    assert_eq!(
        plan.index.get_id(&plan.steps[1].selection_set).unwrap(),
        product_id
    );
    assert_eq!(plan.steps[1].source_path.to_string(), "product");
}

#[test]
fn unresolved_entities_are_fetched_by_typename_and_key() {
    let planner = planner!(CATALOG);
    let plan = plan!(
        planner,
        r#"{ product(id: "1") { reviews { body author { name } } } }"#
    )
    .unwrap();

    assert_eq!(step_schemas(&plan), vec!["products", "reviews", "accounts"]);
    assert_eq!(
        step_selection_sets(&plan),
        vec![
            r#"{ product(id: "1") { __typename id } }"#,
            "{ reviews { body author { __typename id } } }",
            "{ name }",
        ]
    );
    assert_eq!(
        plan.steps[2].source_path.to_string(),
        "product.reviews.author"
    );
    assert_eq!(plan.steps[2].requirements[0].provided_by, vec![1]);
    assert_covers_operation(&plan);
}

#[test]
fn lists_of_entities_are_looked_up_once_per_step() {
    let planner = planner!(CATALOG);
    let plan = plan!(planner, "{ products { name inStock } }").unwrap();

    assert_eq!(step_schemas(&plan), vec!["products", "inventory"]);
    assert_eq!(
        step_selection_sets(&plan),
        vec!["{ products { name upc } }", "{ inStock }"]
    );
    insta::assert_snapshot!(
        plan.steps[1].definition.selection_set(),
        @"{ inventoryItem(upc: $lookup_upc) { inStock } }"
    );
    assert_covers_operation(&plan);
}

#[rstest]
#[case::products_only(r#"{ product(id: "1") { name } }"#, vec!["products"])]
#[case::reviews_after_products(r#"{ product(id: "1") { reviews { body } } }"#, vec!["products", "reviews"])]
#[case::stock_after_products(r#"{ product(id: "1") { inStock } }"#, vec!["products", "inventory"])]
#[case::both_lookups(
    r#"{ product(id: "1") { inStock reviews { body } } }"#,
    vec!["products", "reviews", "inventory"]
)]
fn plans_one_step_per_schema_hop(#[case] operation: &str, #[case] expected: Vec<&str>) {
    let planner = planner!(CATALOG);
    let plan = plan!(planner, operation).unwrap();
    assert_eq!(step_schemas(&plan), expected);
    assert_covers_operation(&plan);
}
