use composite_planner::OperationPlan;
use composite_planner::SelectionSetId;
use composite_planner::SelectionSetIndex;
use composite_planner::operation::Selection;
use composite_planner::operation::SelectionSet;

/// Products live in "products", their reviews in "reviews", stock levels in "inventory" and
/// review authors in "accounts".
pub(crate) const CATALOG: &str = r#"
  type Query {
    product(id: ID!): Product @source(schema: "products")
    products: [Product] @source(schema: "products")
    node(id: ID!): Node @source(schema: "products")
    productById(id: ID!): Product @source(schema: "reviews")
    inventoryItem(upc: String!): Product @source(schema: "inventory")
    userById(id: ID!): User @source(schema: "accounts")
    featured: Product
  }

  interface Node {
    id: ID! @source(schema: "products")
  }

  type Product implements Node
    @lookup(schema: "reviews", field: "productById", key: "id")
    @lookup(schema: "inventory", field: "inventoryItem", key: "upc") {
    id: ID! @source(schema: "products") @source(schema: "reviews")
    upc: String! @source(schema: "products") @source(schema: "inventory")
    name: String @source(schema: "products")
    price: Int @source(schema: "products")
    weight: Int @source(schema: "products")
    inStock: Boolean @source(schema: "inventory")
    shippingEstimate: Int @source(schema: "inventory", requires: "price weight")
    reviews(first: Int): [Review] @source(schema: "reviews")
    secret: String
  }

  type Review @source(schema: "reviews") {
    body: String
    author: User
  }

  type User @lookup(schema: "accounts", field: "userById", key: "id") {
    id: ID! @source(schema: "reviews") @source(schema: "accounts")
    name: String @source(schema: "accounts")
  }
"#;

/// Creates an [`composite_planner::OperationPlanner`] for a composite schema.
macro_rules! planner {
    (config = $config: expr, $schema: expr $(,)?) => {{
        let schema = composite_planner::CompositeSchema::parse($schema).unwrap();
        composite_planner::OperationPlanner::new(schema, $config)
    }};
    ($schema: expr $(,)?) => {
        planner!(config = Default::default(), $schema)
    };
}

/// Validates an operation against the planner's composite schema and plans it.
macro_rules! plan {
    ($planner: expr, $operation: expr $(,)?) => {{
        let planner = &$planner;
        let document = apollo_compiler::ExecutableDocument::parse_and_validate(
            planner.schema().schema(),
            $operation,
            "operation.graphql",
        )
        .unwrap();
        planner.create_plan(&document, None)
    }};
}

/// Plans an operation and compares the formatted plan with the expected one.
/// Run `cargo insta review` to diff and accept changes to the generated plan.
macro_rules! assert_plan {
    ($planner: expr, $operation: expr, @$expected: literal) => {{
        let plan = plan!($planner, $operation).unwrap();
        insta::assert_snapshot!(plan, @$expected);
        plan
    }};
}

pub(crate) fn step_schemas(plan: &OperationPlan) -> Vec<&str> {
    plan.steps.iter().map(|step| &*step.schema_name).collect()
}

pub(crate) fn step_selection_sets(plan: &OperationPlan) -> Vec<String> {
    plan.steps
        .iter()
        .map(|step| step.selection_set.to_string())
        .collect()
}

fn collect_fields(
    index: &SelectionSetIndex,
    selection_set: &SelectionSet,
    fields: &mut Vec<(SelectionSetId, String)>,
) {
    let id = index.try_get_id(selection_set);
    for selection in selection_set.selections() {
        match selection {
            Selection::Field(field) => {
                if let Some(id) = id {
                    fields.push((id, field.response_key().to_string()));
                }
                if let Some(child) = field.selection_set() {
                    collect_fields(index, child, fields);
                }
            }
            Selection::InlineFragment(fragment) => {
                collect_fields(index, fragment.selection_set(), fields);
            }
        }
    }
}

/// Checks that the steps, keyed by selection set identity, resolve every requested field exactly
/// once, and that anything else they fetch is `__typename` or a requirement, possibly aliased.
pub(crate) fn assert_covers_operation(plan: &OperationPlan) {
    let mut requested = Vec::new();
    collect_fields(&plan.index, plan.operation.selection_set(), &mut requested);
    let mut resolved = Vec::new();
    for step in &plan.steps {
        collect_fields(&plan.index, &step.selection_set, &mut resolved);
    }
    let requirements = plan.steps.iter().flat_map(|step| &step.requirements);
    let required: Vec<String> = requirements
        .clone()
        .flat_map(|requirement| requirement.selection_set.selections())
        .filter_map(|selection| match selection {
            Selection::Field(field) => Some(field.response_key().to_string()),
            Selection::InlineFragment(_) => None,
        })
        .chain(
            requirements
                .flat_map(|requirement| &requirement.aliases)
                .map(|alias| alias.alias.to_string()),
        )
        .collect();

    for field in &requested {
        let times = resolved.iter().filter(|resolved| *resolved == field).count();
        assert_eq!(times, 1, "{field:?} is resolved {times} times");
    }
    for field in &resolved {
        if requested.contains(field) {
            continue;
        }
        assert!(
            field.1 == "__typename" || required.contains(&field.1),
            "{field:?} was never requested"
        );
    }
}
