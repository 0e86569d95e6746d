use std::fmt;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::schema::NamedType;
use serde::Serialize;
use serde::ser::SerializeStruct;

use super::CompositeSchema;
use super::SchemaName;
use super::invalid_schema;
use super::parse_field_set;
use crate::error::CompositeError;
use crate::operation::Selection;
use crate::operation::SelectionSet;

/// A way for one source schema to fetch an entity given its key fields.
///
/// A lookup is a root query field of the source schema whose arguments are fed by the key
/// fields, e.g. `productById(id: ID!): Product` for the key `id`.
#[derive(Debug)]
pub struct Lookup {
    pub schema_name: SchemaName,
    /// The entity type the lookup is declared on.
    pub type_name: NamedType,
    pub field_name: Name,
    pub(crate) field_definition: Node<ast::FieldDefinition>,
    /// The fields that must be known before the lookup can run.
    pub key: SelectionSet,
    pub arguments: Vec<LookupArgument>,
}

/// A lookup field argument and the top-level key field that feeds it.
#[derive(Debug, Clone)]
pub struct LookupArgument {
    pub name: Name,
    pub key_field: Name,
    pub ty: Node<ast::Type>,
}

impl Lookup {
    /// The type returned by the lookup field. It is either the entity type itself or an abstract
    /// type the entity belongs to.
    pub fn return_type(&self) -> &NamedType {
        self.field_definition.ty.inner_named_type()
    }

    pub(crate) fn from_directive(
        schema: &CompositeSchema,
        type_name: &NamedType,
        directive: &ast::Directive,
    ) -> Result<Self, CompositeError> {
        let string_argument = |name: &str| {
            directive
                .specified_argument_by_name(name)
                .and_then(|value| value.as_str())
                .ok_or_else(|| {
                    invalid_schema(format!(
                        "@lookup on type \"{type_name}\" is missing a string `{name}` argument"
                    ))
                })
        };
        let schema_name = string_argument("schema")?;
        let field_name = string_argument("field")?;
        let key = string_argument("key")?;

        let Some(schema_name) = schema.source_schemas.get(schema_name).cloned() else {
            return Err(invalid_schema(format!(
                "@lookup on type \"{type_name}\" references unknown source schema \"{schema_name}\""
            )));
        };
        let query_type = schema
            .root_type(ast::OperationType::Query)
            .ok_or_else(|| invalid_schema("the composite schema has no query type".to_owned()))?;
        let field_definition = schema
            .schema
            .type_field(query_type, field_name)
            .map(|field| field.node.clone())
            .map_err(|_| {
                invalid_schema(format!(
                    "@lookup on type \"{type_name}\" references unknown field \"{query_type}.{field_name}\""
                ))
            })?;
        if schema
            .field(query_type, field_name)
            .and_then(|field| field.source(&schema_name))
            .is_none()
        {
            return Err(invalid_schema(format!(
                "lookup field \"{query_type}.{field_name}\" is not provided by source schema \"{schema_name}\""
            )));
        }

        let return_type = field_definition.ty.inner_named_type();
        let returns_entity = return_type == type_name
            || schema
                .get_type(return_type)
                .is_some_and(|ty| ty.possible_types.contains(type_name));
        if field_definition.ty.is_list() || !returns_entity {
            return Err(invalid_schema(format!(
                "lookup field \"{query_type}.{field_name}\" must return a single \"{type_name}\""
            )));
        }

        let key = parse_field_set(&schema.schema, type_name, key)?;
        let arguments = field_definition
            .arguments
            .iter()
            .map(|argument| {
                let key_field = key.selections().iter().find_map(|selection| match selection {
                    Selection::Field(field) if field.response_key() == &argument.name => {
                        Some(field.response_key().clone())
                    }
                    _ => None,
                });
                match key_field {
                    Some(key_field) => Ok(LookupArgument {
                        name: argument.name.clone(),
                        key_field,
                        ty: argument.ty.clone(),
                    }),
                    None => Err(invalid_schema(format!(
                        "argument \"{}\" of lookup field \"{query_type}.{field_name}\" does not match any field of key `{key}`",
                        argument.name
                    ))),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            schema_name,
            type_name: type_name.clone(),
            field_name: field_definition.name.clone(),
            field_definition,
            key,
            arguments,
        })
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}.{} {}",
            self.type_name, self.schema_name, self.field_name, self.key
        )
    }
}

impl Serialize for Lookup {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut lookup = serializer.serialize_struct("Lookup", 4)?;
        lookup.serialize_field("schema", &self.schema_name)?;
        lookup.serialize_field("type", self.type_name.as_str())?;
        lookup.serialize_field("field", self.field_name.as_str())?;
        lookup.serialize_field("key", &self.key)?;
        lookup.end()
    }
}
