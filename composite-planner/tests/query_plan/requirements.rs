use composite_planner::SingleCompositeError;
use pretty_assertions::assert_eq;

use super::plan_support::CATALOG;
use super::plan_support::assert_covers_operation;
use super::plan_support::step_schemas;
use super::plan_support::step_selection_sets;

const REVIEWED_PRODUCTS: &str = r#"
  type Query {
    product: Product @source(schema: "s1")
    productById(id: ID!): Product @source(schema: "s2")
  }

  type Product @lookup(schema: "s2", field: "productById", key: "id") {
    id: ID! @source(schema: "s1")
    margin: Int
    reviews: [String] @source(schema: "s2", requires: "id")
    discount: Int @source(schema: "s2", requires: "margin")
    tags(first: Int): [String] @source(schema: "s1")
    summary: String @source(schema: "s2", requires: "tags")
  }
"#;

/// `shipping` requires `price`, which only "s3" resolves.
const PRICED_PRODUCTS: &str = r#"
  type Query {
    product: Product @source(schema: "s1")
    productById(id: ID!): Product @source(schema: "s2")
    productPrice(id: ID!): Product @source(schema: "s3")
  }

  type Product
    @lookup(schema: "s2", field: "productById", key: "id")
    @lookup(schema: "s3", field: "productPrice", key: "id") {
    id: ID! @source(schema: "s1") @source(schema: "s2") @source(schema: "s3")
    price: Int @source(schema: "s3")
    shipping: Int @source(schema: "s2", requires: "price")
  }
"#;

/// Like [`PRICED_PRODUCTS`], except that "s3" has no way of fetching a product.
const UNREACHABLE_PRICES: &str = r#"
  type Query {
    product: Product @source(schema: "s1")
    productById(id: ID!): Product @source(schema: "s2")
  }

  type Product @lookup(schema: "s2", field: "productById", key: "id") {
    id: ID! @source(schema: "s1") @source(schema: "s2")
    price: Int @source(schema: "s3")
    shipping: Int @source(schema: "s2", requires: "price")
  }
"#;

#[test]
fn required_keys_are_not_fetched_twice() {
    let planner = planner!(REVIEWED_PRODUCTS);
    let plan = plan!(planner, "{ product { id reviews } }").unwrap();

    assert_eq!(step_schemas(&plan), vec!["s1", "s2"]);
    // `id` is already selected by the first step, so neither the lookup key nor the field
    // requirement changes it.
    assert_eq!(
        step_selection_sets(&plan),
        vec!["{ product { id } }", "{ reviews }"]
    );

    let requirements = &plan.steps[1].requirements;
    assert_eq!(requirements.len(), 2);
    for requirement in requirements {
        assert_eq!(requirement.selection_set.to_string(), "{ id }");
        assert_eq!(requirement.provided_by, vec![0]);
        assert_eq!(requirement.path.to_string(), "product");
    }
    insta::assert_snapshot!(plan.steps[1].definition, @r###"
    query($lookup_id: ID!) {
      productById(id: $lookup_id) {
        reviews
      }
    }
    "###);
    assert_covers_operation(&plan);
}

#[test]
fn requirements_are_merged_into_earlier_steps() {
    let planner = planner!(CATALOG);
    let plan = assert_plan!(
        planner,
        r#"query Shipping { product(id: "1") { name shippingEstimate } }"#,
        @r###"
    OperationPlan {
      Step(0) [products] at <root> {
        query Shipping__products__0 {
          product(id: "1") {
            name
            upc
            price
            weight
          }
        }
      },
      Step(1) [inventory] at product via inventoryItem requires { upc } from [0] requires { price weight } from [0] {
        query Shipping__inventory__1($lookup_upc: String!) {
          inventoryItem(upc: $lookup_upc) {
            shippingEstimate
          }
        }
      },
    }
    "###
    );
    assert_covers_operation(&plan);
}

#[test]
fn requirements_already_selected_by_the_client_are_reused() {
    let planner = planner!(CATALOG);
    let plan = plan!(
        planner,
        r#"{ product(id: "1") { weight shippingEstimate price } }"#
    )
    .unwrap();

    assert_eq!(
        step_selection_sets(&plan),
        vec![
            r#"{ product(id: "1") { weight price upc } }"#,
            "{ shippingEstimate }",
        ]
    );
    assert_covers_operation(&plan);
}

#[test]
fn unfetchable_requirements_leave_no_viable_plan() {
    let planner = planner!(REVIEWED_PRODUCTS);
    let error = plan!(planner, "{ product { discount } }").unwrap_err();

    let Some(SingleCompositeError::NoViablePlan { operation, path }) = error.as_single() else {
        panic!("unexpected error: {error}");
    };
    assert_eq!(operation, &None);
    assert_eq!(path, "product.margin");
}

#[test]
fn requirements_from_schemas_without_a_step_are_fetched_first() {
    let planner = planner!(PRICED_PRODUCTS);
    let plan = assert_plan!(
        planner,
        "query Shipping { product { shipping } }",
        @r###"
    OperationPlan {
      Step(0) [s1] at <root> {
        query Shipping__s1__0 {
          product {
            __typename
            id
          }
        }
      },
      Step(1) [s3] at product via productPrice requires { id } from [0] {
        query Shipping__s3__1($lookup_id: ID!) {
          productPrice(id: $lookup_id) {
            price
          }
        }
      },
      Step(2) [s2] at product via productById requires { id } from [0] requires { price } from [1] {
        query Shipping__s2__2($lookup_id: ID!) {
          productById(id: $lookup_id) {
            shipping
          }
        }
      },
    }
    "###
    );
    assert_covers_operation(&plan);

    // The price is fetched into the very selection set `shipping` is selected in.
    let product = plan
        .operation
        .selection_set()
        .field("product")
        .and_then(|field| field.selection_set())
        .unwrap();
    let product_id = plan.index.get_id(product).unwrap();
    assert_eq!(plan.steps[2].requirements[1].selection_set_id, product_id);
    assert!(plan.steps[1].selection_set_ids.contains(&product_id));
}

#[test]
fn client_selected_requirements_need_no_extra_step() {
    let planner = planner!(PRICED_PRODUCTS);
    let plan = plan!(planner, "{ product { price shipping } }").unwrap();

    assert_eq!(step_schemas(&plan), vec!["s1", "s3", "s2"]);
    assert_eq!(
        step_selection_sets(&plan),
        vec!["{ product { __typename id } }", "{ price }", "{ shipping }"]
    );
    assert_eq!(plan.steps[2].requirements[1].provided_by, vec![1]);
    assert_covers_operation(&plan);
}

#[test]
fn unreachable_requirements_point_at_the_requiring_field() {
    let planner = planner!(UNREACHABLE_PRICES);
    let error = plan!(planner, "{ product { shipping } }").unwrap_err();

    let Some(SingleCompositeError::NoViablePlan { path, .. }) = error.as_single() else {
        panic!("unexpected error: {error}");
    };
    assert_eq!(path, "product.shipping");
}

#[test]
fn requirements_taken_by_a_client_alias_are_aliased() {
    let planner = planner!(CATALOG);
    let plan = plan!(
        planner,
        r#"{ product(id: "1") { price: name shippingEstimate } }"#
    )
    .unwrap();

    assert_eq!(
        step_selection_sets(&plan),
        vec![
            r#"{ product(id: "1") { price: name upc price__alias_0: price weight } }"#,
            "{ shippingEstimate }",
        ]
    );
    let requirements = &plan.steps[1].requirements;
    assert!(requirements[0].aliases.is_empty());
    assert_eq!(requirements[1].aliases.len(), 1);
    insta::assert_snapshot!(requirements[1].aliases[0], @"product.price as price__alias_0");
    assert_covers_operation(&plan);
}

#[test]
fn requirements_are_not_merged_into_fields_with_arguments() {
    let planner = planner!(REVIEWED_PRODUCTS);
    let plan = plan!(planner, "{ product { tags(first: 1) summary } }").unwrap();

    assert_eq!(
        step_selection_sets(&plan),
        vec![
            "{ product { tags(first: 1) id tags__alias_0: tags } }",
            "{ summary }",
        ]
    );
    insta::assert_snapshot!(
        plan.steps[1].to_string(),
        @r###"
    Step(1) [s2] at product via productById requires { id } from [0] requires { tags } from [0] (product.tags as tags__alias_0) {
      query($lookup_id: ID!) {
        productById(id: $lookup_id) {
          summary
        }
      }
    },
    "###
    );
    assert_covers_operation(&plan);
}

#[test]
fn lookup_keys_taken_by_a_client_alias_are_aliased() {
    let planner = planner!(CATALOG);
    let plan = plan!(planner, r#"{ product(id: "1") { upc: name inStock } }"#).unwrap();

    assert_eq!(
        step_selection_sets(&plan),
        vec![
            r#"{ product(id: "1") { upc: name upc__alias_0: upc } }"#,
            "{ inStock }",
        ]
    );
    let key = &plan.steps[1].requirements[0];
    assert_eq!(key.selection_set.to_string(), "{ upc }");
    insta::assert_snapshot!(key.aliases[0], @"product.upc as upc__alias_0");
    assert_covers_operation(&plan);
}
