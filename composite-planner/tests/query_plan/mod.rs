#[macro_use]
mod plan_support;

mod entities;
mod failures;
mod fragments_and_variables;
mod plan_properties;
mod requirements;
