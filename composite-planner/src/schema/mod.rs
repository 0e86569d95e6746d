//! The composite schema: a GraphQL schema annotated with which source schema can resolve which
//! field, what each field requires, and how entities can be looked up in each source schema.
//!
//! The annotations are read from these directives, which [`CompositeSchema::parse`] declares
//! on the caller's behalf:
//!
//! ```graphql
//! directive @source(schema: String!, requires: String) repeatable on FIELD_DEFINITION | OBJECT | INTERFACE
//! directive @lookup(schema: String!, field: String!, key: String!) repeatable on OBJECT | INTERFACE
//! ```
//!
//! A type-level `@source` applies to every field of the type that has no `@source` of its own.

use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::executable;
use apollo_compiler::executable::FieldSet;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::NamedType;
use apollo_compiler::validation::Valid;
use indexmap::IndexMap;
use indexmap::IndexSet;

use crate::error::CompositeError;
use crate::error::MultipleCompositeErrors;
use crate::error::SingleCompositeError;
use crate::internal_error;
use crate::operation::SelectionSet;
use crate::operation::SelectionSetConverter;
use crate::operation::TYPENAME_FIELD;

mod lookup;

pub use lookup::Lookup;
pub use lookup::LookupArgument;

pub(crate) const SOURCE_DIRECTIVE: &str = "source";
pub(crate) const LOOKUP_DIRECTIVE: &str = "lookup";

const DIRECTIVE_DEFINITIONS: &str = r#"
directive @source(schema: String!, requires: String) repeatable on FIELD_DEFINITION | OBJECT | INTERFACE
directive @lookup(schema: String!, field: String!, key: String!) repeatable on OBJECT | INTERFACE
"#;

/// The name of a source schema.
pub type SchemaName = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeTypeKind {
    Object,
    Interface,
    Union,
}

#[derive(Debug)]
pub struct CompositeType {
    pub name: NamedType,
    pub kind: CompositeTypeKind,
    pub fields: IndexMap<Name, CompositeField>,
    /// The lookups able to fetch this type, in declaration order.
    pub lookups: Vec<Arc<Lookup>>,
    /// The object types a value of this type can be. An object type only has itself.
    pub possible_types: IndexSet<NamedType>,
    /// The source schemas that know this type.
    pub source_schemas: IndexSet<SchemaName>,
}

#[derive(Debug)]
pub struct CompositeField {
    pub name: Name,
    pub sources: IndexMap<SchemaName, FieldSource>,
}

/// How one source schema resolves a field.
#[derive(Debug)]
pub struct FieldSource {
    pub schema_name: SchemaName,
    /// Sibling fields that must have been fetched before the field can be resolved here.
    pub requirements: Option<SelectionSet>,
}

impl CompositeField {
    pub fn source(&self, schema_name: &str) -> Option<&FieldSource> {
        self.sources.get(schema_name)
    }
}

#[derive(Debug)]
pub struct CompositeSchema {
    schema: Valid<Schema>,
    source_schemas: IndexSet<SchemaName>,
    types: IndexMap<NamedType, CompositeType>,
}

impl CompositeSchema {
    /// Parses and validates a composite schema document.
    ///
    /// The `@source` and `@lookup` directive definitions are added automatically.
    pub fn parse(sdl: &str) -> Result<Self, CompositeError> {
        let schema = Schema::parse_and_validate(
            format!("{DIRECTIVE_DEFINITIONS}\n{sdl}"),
            "composite_schema.graphql",
        )?;
        Self::new(schema)
    }

    pub fn new(schema: Valid<Schema>) -> Result<Self, CompositeError> {
        let mut errors = MultipleCompositeErrors::new();
        let mut source_schemas = IndexSet::new();
        let mut types = IndexMap::new();

        for (type_name, ty) in &schema.types {
            if ty.is_built_in() {
                continue;
            }
            let composite_type = match ty {
                ExtendedType::Object(object) => build_fields_type(
                    &schema,
                    type_name,
                    CompositeTypeKind::Object,
                    ty,
                    object.fields.values().map(|field| &field.node),
                    &mut source_schemas,
                    &mut errors,
                ),
                ExtendedType::Interface(interface) => build_fields_type(
                    &schema,
                    type_name,
                    CompositeTypeKind::Interface,
                    ty,
                    interface.fields.values().map(|field| &field.node),
                    &mut source_schemas,
                    &mut errors,
                ),
                ExtendedType::Union(_) => CompositeType {
                    name: type_name.clone(),
                    kind: CompositeTypeKind::Union,
                    fields: IndexMap::new(),
                    lookups: Vec::new(),
                    possible_types: IndexSet::new(),
                    source_schemas: IndexSet::new(),
                },
                _ => continue,
            };
            types.insert(type_name.clone(), composite_type);
        }

        compute_possible_types(&schema, &mut types);

        let mut composite_schema = Self {
            schema,
            source_schemas,
            types,
        };
        composite_schema.collect_lookups(&mut errors);
        composite_schema.compute_type_membership();
        errors.into_result()?;
        Ok(composite_schema)
    }

    /// The composite (client facing) schema, used to validate client operations.
    pub fn schema(&self) -> &Valid<Schema> {
        &self.schema
    }

    /// Source schema names, in the order they first appear in the composite schema.
    pub fn source_schemas(&self) -> impl Iterator<Item = &SchemaName> {
        self.source_schemas.iter()
    }

    pub fn get_type(&self, type_name: &str) -> Option<&CompositeType> {
        self.types.get(type_name)
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&CompositeField> {
        self.types.get(type_name)?.fields.get(field_name)
    }

    /// Whether the type can be fetched from a source schema by a lookup.
    pub fn is_entity(&self, type_name: &str) -> bool {
        self.types
            .get(type_name)
            .is_some_and(|ty| !ty.lookups.is_empty())
    }

    /// The lookups of `type_name` served by `schema_name`.
    pub fn lookups<'a>(
        &'a self,
        type_name: &str,
        schema_name: &'a str,
    ) -> impl Iterator<Item = &'a Arc<Lookup>> + 'a {
        self.types
            .get(type_name)
            .into_iter()
            .flat_map(|ty| ty.lookups.iter())
            .filter(move |lookup| &*lookup.schema_name == schema_name)
    }

    pub fn is_root_type(&self, type_name: &str) -> bool {
        [
            ast::OperationType::Query,
            ast::OperationType::Mutation,
            ast::OperationType::Subscription,
        ]
        .into_iter()
        .filter_map(|operation_type| self.schema.root_operation(operation_type))
        .any(|root| root == type_name)
    }

    pub fn root_type(&self, operation_type: ast::OperationType) -> Option<&NamedType> {
        self.schema.root_operation(operation_type)
    }

    /// Whether `type_name` is the mutation root type. Its fields have to run in document order.
    pub fn is_mutation_type(&self, type_name: &str) -> bool {
        self.root_type(ast::OperationType::Mutation)
            .is_some_and(|root| root == type_name)
    }

    /// Whether `schema_name` knows the type `type_name` at all.
    ///
    /// Root operation types are known by every source schema.
    pub fn type_in_schema(&self, type_name: &str, schema_name: &str) -> bool {
        self.is_root_type(type_name)
            || self
                .types
                .get(type_name)
                .is_some_and(|ty| ty.source_schemas.contains(schema_name))
    }

    /// Whether `schema_name` can resolve the field `field_name` of `type_name`.
    ///
    /// `__typename` can always be resolved. When `allow_requirements` is unset, fields that have
    /// requirements in that source schema are treated as unresolvable.
    pub fn can_resolve_field(
        &self,
        type_name: &str,
        field_name: &str,
        schema_name: &str,
        allow_requirements: bool,
    ) -> bool {
        if field_name == TYPENAME_FIELD.as_str() {
            return true;
        }
        self.field(type_name, field_name)
            .and_then(|field| field.source(schema_name))
            .is_some_and(|source| allow_requirements || source.requirements.is_none())
    }

    /// The definition of the `__typename` meta field of a composite type.
    pub(crate) fn typename_definition(
        &self,
        type_name: &str,
    ) -> Result<Node<ast::FieldDefinition>, CompositeError> {
        self.schema
            .type_field(type_name, TYPENAME_FIELD.as_str())
            .map(|field| field.node.clone())
            .map_err(|_| internal_error!("Type \"{type_name}\" has no `__typename` field"))
    }

    fn collect_lookups(&mut self, errors: &mut MultipleCompositeErrors) {
        let mut lookups = Vec::new();
        for (type_name, ty) in &self.schema.types {
            if ty.is_built_in() {
                continue;
            }
            for directive in ty.directives().get_all(LOOKUP_DIRECTIVE) {
                match Lookup::from_directive(self, type_name, directive) {
                    Ok(lookup) => lookups.push(lookup),
                    Err(error) => errors.push(error),
                }
            }
        }
        for lookup in lookups {
            if let Some(ty) = self.types.get_mut(&lookup.type_name) {
                ty.lookups.push(Arc::new(lookup));
            }
        }
    }

    fn compute_type_membership(&mut self) {
        for ty in self.types.values_mut() {
            let field_sources = ty
                .fields
                .values()
                .flat_map(|field| field.sources.keys().cloned());
            let lookup_sources = ty.lookups.iter().map(|lookup| lookup.schema_name.clone());
            let members: Vec<_> = field_sources.chain(lookup_sources).collect();
            ty.source_schemas.extend(members);
        }
        // Abstract types are known wherever one of their possible types is.
        let object_membership: IndexMap<NamedType, IndexSet<SchemaName>> = self
            .types
            .values()
            .filter(|ty| ty.kind == CompositeTypeKind::Object)
            .map(|ty| (ty.name.clone(), ty.source_schemas.clone()))
            .collect();
        for ty in self.types.values_mut() {
            if ty.kind == CompositeTypeKind::Object {
                continue;
            }
            for possible_type in &ty.possible_types {
                if let Some(schemas) = object_membership.get(possible_type) {
                    ty.source_schemas.extend(schemas.iter().cloned());
                }
            }
        }
    }
}

/// Reads the `@source` directive applications of an object or interface type and its fields.
fn build_fields_type<'a>(
    schema: &Valid<Schema>,
    type_name: &NamedType,
    kind: CompositeTypeKind,
    ty: &ExtendedType,
    field_definitions: impl Iterator<Item = &'a Node<ast::FieldDefinition>>,
    source_schemas: &mut IndexSet<SchemaName>,
    errors: &mut MultipleCompositeErrors,
) -> CompositeType {
    let type_sources: Vec<SchemaName> = ty
        .directives()
        .get_all(SOURCE_DIRECTIVE)
        .filter_map(|directive| {
            match directive
                .specified_argument_by_name("schema")
                .and_then(|value| value.as_str())
            {
                Some(name) => Some(intern(source_schemas, name)),
                None => {
                    errors.push(invalid_schema(format!(
                        "@source on type \"{type_name}\" is missing a string `schema` argument"
                    )));
                    None
                }
            }
        })
        .collect();

    let mut fields = IndexMap::new();
    for definition in field_definitions {
        let mut sources = IndexMap::new();
        for directive in definition.directives.get_all(SOURCE_DIRECTIVE) {
            let Some(schema_name) = directive
                .specified_argument_by_name("schema")
                .and_then(|value| value.as_str())
            else {
                errors.push(invalid_schema(format!(
                    "@source on \"{type_name}.{}\" is missing a string `schema` argument",
                    definition.name
                )));
                continue;
            };
            let schema_name = intern(source_schemas, schema_name);
            let requirements = match directive
                .specified_argument_by_name("requires")
                .and_then(|value| value.as_str())
            {
                Some(requires) => match parse_field_set(schema, type_name, requires) {
                    Ok(selection_set) => Some(selection_set),
                    Err(error) => {
                        errors.push(error);
                        continue;
                    }
                },
                None => None,
            };
            sources.insert(
                schema_name.clone(),
                FieldSource {
                    schema_name,
                    requirements,
                },
            );
        }
        if sources.is_empty() {
            for schema_name in &type_sources {
                sources.insert(
                    schema_name.clone(),
                    FieldSource {
                        schema_name: schema_name.clone(),
                        requirements: None,
                    },
                );
            }
        }
        fields.insert(
            definition.name.clone(),
            CompositeField {
                name: definition.name.clone(),
                sources,
            },
        );
    }

    CompositeType {
        name: type_name.clone(),
        kind,
        fields,
        lookups: Vec::new(),
        possible_types: IndexSet::new(),
        source_schemas: type_sources.into_iter().collect(),
    }
}

fn compute_possible_types(schema: &Schema, types: &mut IndexMap<NamedType, CompositeType>) {
    for ty in types.values_mut() {
        ty.possible_types = match ty.kind {
            CompositeTypeKind::Object => std::iter::once(ty.name.clone()).collect(),
            CompositeTypeKind::Union => schema
                .get_union(&ty.name)
                .map(|union_| {
                    union_
                        .members
                        .iter()
                        .map(|member| member.name.clone())
                        .collect()
                })
                .unwrap_or_default(),
            CompositeTypeKind::Interface => schema
                .types
                .iter()
                .filter_map(|(name, candidate)| match candidate {
                    ExtendedType::Object(object)
                        if object
                            .implements_interfaces
                            .iter()
                            .any(|interface| interface.name == ty.name) =>
                    {
                        Some(name.clone())
                    }
                    _ => None,
                })
                .collect(),
        };
    }
}

/// Parses a field set (e.g. `"id owner { id }"`) on the given type.
pub(crate) fn parse_field_set(
    schema: &Valid<Schema>,
    type_name: &NamedType,
    field_set: &str,
) -> Result<SelectionSet, CompositeError> {
    // The parser takes care of adding curly braces ("{" and "}") if they aren't in the string.
    let field_set = FieldSet::parse_and_validate(
        schema,
        type_name.clone(),
        field_set,
        "field_set.graphql",
    )
    .map_err(|error| {
        invalid_schema(format!(
            "invalid field set \"{field_set}\" on type \"{type_name}\": {}",
            error.errors
        ))
    })?;
    let selection_set: &executable::SelectionSet = &field_set.selection_set;
    SelectionSetConverter { document: None }.convert(selection_set)
}

fn intern(source_schemas: &mut IndexSet<SchemaName>, name: &str) -> SchemaName {
    if let Some(existing) = source_schemas.get(name) {
        return existing.clone();
    }
    let name: SchemaName = Arc::from(name);
    source_schemas.insert(name.clone());
    name
}

pub(crate) fn invalid_schema(message: String) -> CompositeError {
    SingleCompositeError::InvalidCompositeSchema { message }.into()
}
