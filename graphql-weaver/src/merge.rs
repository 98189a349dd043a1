//! Merging renamed endpoint schemas under synthesized root types.

use apollo_compiler::ast;
use apollo_compiler::collections::IndexMap;
use apollo_compiler::name;
use apollo_compiler::schema::Component;
use apollo_compiler::schema::ComponentName;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::ObjectType;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;

use crate::error::WeaveError;
use crate::rename::Namespace;
use crate::transform::is_native_directive;
use crate::transform::is_native_type;

/// One endpoint's schema after renaming, ready to merge.
pub(crate) struct EndpointSchema {
    pub(crate) id: usize,
    pub(crate) name: String,
    pub(crate) namespace: Namespace,
    pub(crate) schema: Schema,
}

/// Where a merged root field is resolved.
#[derive(Clone, Debug)]
pub(crate) struct RootRoute {
    pub(crate) endpoint: usize,
    pub(crate) upstream_field: Name,
}

/// Merged root field name to endpoint, per root operation.
#[derive(Debug, Default)]
pub(crate) struct Routes {
    pub(crate) query: IndexMap<Name, RootRoute>,
    pub(crate) mutation: IndexMap<Name, RootRoute>,
    pub(crate) subscription: IndexMap<Name, RootRoute>,
}

impl Routes {
    pub(crate) fn for_operation(
        &self,
        operation_type: ast::OperationType,
    ) -> &IndexMap<Name, RootRoute> {
        match operation_type {
            ast::OperationType::Query => &self.query,
            ast::OperationType::Mutation => &self.mutation,
            ast::OperationType::Subscription => &self.subscription,
        }
    }
}

const ROOT_TYPE_NAMES: [&str; 3] = ["Query", "Mutation", "Subscription"];

/// Merge renamed endpoint schemas into one schema with synthesized root
/// types whose fields each route to exactly one endpoint.
pub(crate) fn merge_schemas(
    endpoints: &[EndpointSchema],
) -> Result<(Schema, Routes), WeaveError> {
    let mut merged = Schema::new();
    let mut origins: IndexMap<Name, &str> = IndexMap::default();

    for endpoint in endpoints {
        let root_names: Vec<&Name> = [
            &endpoint.schema.schema_definition.query,
            &endpoint.schema.schema_definition.mutation,
            &endpoint.schema.schema_definition.subscription,
        ]
        .into_iter()
        .flatten()
        .map(|component| &component.name)
        .collect();

        for (name, ty) in &endpoint.schema.types {
            if is_native_type(name.as_str()) {
                continue;
            }
            // A pass-through endpoint's own root types would collide with
            // the synthesized roots; their fields are represented there.
            if root_names.contains(&name) && ROOT_TYPE_NAMES.contains(&name.as_str()) {
                continue;
            }
            if let Some(first) = origins.get(name) {
                return Err(WeaveError::NamespaceCollision {
                    item: name.to_string(),
                    first: first.to_string(),
                    second: endpoint.name.clone(),
                });
            }
            origins.insert(name.clone(), &endpoint.name);
            merged.types.insert(name.clone(), ty.clone());
        }

        for (directive_name, definition) in &endpoint.schema.directive_definitions {
            if is_native_directive(directive_name.as_str()) {
                continue;
            }
            if merged.directive_definitions.contains_key(directive_name) {
                tracing::debug!(
                    directive = directive_name.as_str(),
                    endpoint = endpoint.name.as_str(),
                    "directive is already defined by an earlier endpoint, keeping the first"
                );
                continue;
            }
            merged
                .directive_definitions
                .insert(directive_name.clone(), definition.clone());
        }
    }

    let mut routes = Routes::default();
    let query = synthesize_root(
        endpoints,
        |schema| &schema.schema_definition.query,
        name!("Query"),
        &mut routes.query,
    )?;
    let mutation = synthesize_root(
        endpoints,
        |schema| &schema.schema_definition.mutation,
        name!("Mutation"),
        &mut routes.mutation,
    )?;
    let subscription = synthesize_root(
        endpoints,
        |schema| &schema.schema_definition.subscription,
        name!("Subscription"),
        &mut routes.subscription,
    )?;

    for root in [&query, &mutation, &subscription].into_iter().flatten() {
        if merged.types.contains_key(&root.name) {
            let first = origins
                .get(&root.name)
                .map(|name| name.to_string())
                .unwrap_or_default();
            return Err(WeaveError::NamespaceCollision {
                item: root.name.to_string(),
                first,
                second: "the merged root types".to_string(),
            });
        }
        merged.types.insert(
            root.name.clone(),
            ExtendedType::Object(Node::new(root.clone())),
        );
    }

    let schema_definition = merged.schema_definition.make_mut();
    schema_definition.query = query.map(|root| ComponentName::from(root.name));
    schema_definition.mutation = mutation.map(|root| ComponentName::from(root.name));
    schema_definition.subscription = subscription.map(|root| ComponentName::from(root.name));

    Ok((merged, routes))
}

/// Builds one merged root type from the union of the upstream root fields,
/// each prefixed with its endpoint's namespace. Returns `None` when no
/// endpoint defines this root operation, in which case the merged schema
/// omits it.
fn synthesize_root(
    endpoints: &[EndpointSchema],
    root_of: impl Fn(&Schema) -> &Option<ComponentName>,
    merged_name: Name,
    routes: &mut IndexMap<Name, RootRoute>,
) -> Result<Option<ObjectType>, WeaveError> {
    let mut fields: IndexMap<Name, Component<ast::FieldDefinition>> = IndexMap::default();
    let mut origins: IndexMap<Name, &str> = IndexMap::default();

    for endpoint in endpoints {
        let Some(root_name) = root_of(&endpoint.schema) else {
            continue;
        };
        let Some(root) = endpoint.schema.get_object(&root_name.name) else {
            tracing::warn!(
                endpoint = endpoint.name.as_str(),
                root = root_name.name.as_str(),
                "root operation type is not an object type, skipping"
            );
            continue;
        };
        for (field_name, field) in &root.fields {
            let merged_field = endpoint.namespace.rename(field_name.as_str())?;
            if let Some(first) = origins.get(&merged_field) {
                return Err(WeaveError::NamespaceCollision {
                    item: format!("{merged_name}.{merged_field}"),
                    first: first.to_string(),
                    second: endpoint.name.clone(),
                });
            }
            origins.insert(merged_field.clone(), &endpoint.name);

            let mut definition = (***field).clone();
            definition.name = merged_field.clone();
            fields.insert(merged_field.clone(), Component::new(definition));
            routes.insert(
                merged_field,
                RootRoute {
                    endpoint: endpoint.id,
                    upstream_field: field_name.clone(),
                },
            );
        }
    }

    if fields.is_empty() {
        return Ok(None);
    }
    Ok(Some(ObjectType {
        description: None,
        name: merged_name,
        implements_interfaces: Default::default(),
        directives: Default::default(),
        fields,
    }))
}
