//! Cross-endpoint links: boot-time resolution and schema installation.
//!
//! A link declares that a scalar field holds a key resolvable against a
//! field of another endpoint. For a linked field `f`, installation adds a
//! sibling field `f_link` to the parent type, typed as the target field's
//! element type; resolution at request time is in [`crate::execution`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use apollo_compiler::ast;
use apollo_compiler::collections::IndexMap;
use apollo_compiler::schema::Component;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::InterfaceType;
use apollo_compiler::schema::ObjectType;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;

use crate::config::parse_dotted_path;
use crate::config::parse_link_key;
use crate::config::EndpointConfig;
use crate::error::TransformError;
use crate::error::WeavingError;
use crate::merge::Routes;
use crate::rename::Namespace;
use crate::transform::SchemaTransformer;
use crate::transform::TransformContext;

/// A link whose parent, target and argument have been resolved against the
/// merged schema.
#[derive(Debug)]
pub(crate) struct ResolvedLink {
    /// The `ParentType.field` key from the configuration, for messages.
    pub(crate) link_key: String,

    /// Merged name of the parent type carrying the linked scalar.
    pub(crate) parent_type: Name,

    /// The scalar field holding the linking key.
    pub(crate) key_field: Name,

    /// The installed sibling field exposing the joined object.
    pub(crate) link_field: Name,

    /// The endpoint the join is fetched from.
    pub(crate) endpoint: usize,

    /// Upstream field names from the target's query root down to the target
    /// field.
    pub(crate) chain: Vec<Name>,

    /// Merged element type of the target field.
    pub(crate) target_type: Name,

    /// The target argument receiving the key (or the filter object).
    pub(crate) argument: Name,

    /// Nested filter field within the argument, for joins by filter.
    pub(crate) argument_subfield: Option<Name>,

    pub(crate) batch_mode: bool,

    /// Field on the fetched object holding the linking key.
    pub(crate) result_key_field: Option<Name>,

    /// Merged-name type of the linker-bound variable. Reverse-renamed with
    /// the target's namespace when the sub-query is built.
    pub(crate) variable_type: ast::Type,

    /// Target-field arguments exposed on the link field (joins by filter
    /// forward `orderBy`, `first`, `skip` and the rest of the filter).
    pub(crate) exposed_arguments: Vec<Node<ast::InputValueDefinition>>,
}

/// All resolved links, looked up by merged parent type and link field name.
#[derive(Debug, Default)]
pub(crate) struct LinkMap {
    by_field: HashMap<String, Arc<ResolvedLink>>,
}

impl LinkMap {
    pub(crate) fn get(&self, parent_type: &str, link_field: &str) -> Option<&Arc<ResolvedLink>> {
        self.by_field.get(&format!("{parent_type}.{link_field}"))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_field.is_empty()
    }

    pub(crate) fn remove(&mut self, key: &str) {
        self.by_field.remove(key);
    }

    /// Links installed on one parent type, in stable order.
    fn for_parent(&self, parent_type: &str) -> Vec<&Arc<ResolvedLink>> {
        let mut links: Vec<&Arc<ResolvedLink>> = self
            .by_field
            .values()
            .filter(|link| link.parent_type.as_str() == parent_type)
            .collect();
        links.sort_by(|a, b| a.link_field.cmp(&b.link_field));
        links
    }
}

/// Resolve every configured link against the merged schema.
///
/// Failures are per-link and recoverable: they are handed to `on_error` and
/// the remaining links continue. A key/argument scalar mismatch is reported
/// but the link is still installed, since `ID`, `String` and `Int` keys
/// coerce in practice.
pub(crate) fn resolve_links(
    configs: &[EndpointConfig],
    namespaces: &[Namespace],
    merged: &Schema,
    routes: &Routes,
    on_error: &mut dyn FnMut(WeavingError),
) -> LinkMap {
    let mut map = LinkMap::default();
    for (id, config) in configs.iter().enumerate() {
        let mut link_keys: Vec<&String> = config.links.keys().collect();
        link_keys.sort();
        for link_key in link_keys {
            let link_config = &config.links[link_key];
            match resolve_link(
                link_key,
                link_config,
                &namespaces[id],
                namespaces,
                merged,
                routes,
                on_error,
            ) {
                Ok(link) => {
                    let key = format!("{}.{}", link.parent_type, link.link_field);
                    if map.by_field.contains_key(&key) {
                        on_error(WeavingError {
                            link: link_key.clone(),
                            reason: format!("'{key}' is already produced by another link"),
                        });
                        continue;
                    }
                    map.by_field.insert(key, Arc::new(link));
                }
                Err(reason) => on_error(WeavingError {
                    link: link_key.clone(),
                    reason,
                }),
            }
        }
    }
    map
}

fn resolve_link(
    link_key: &str,
    config: &crate::config::LinkConfig,
    namespace: &Namespace,
    namespaces: &[Namespace],
    merged: &Schema,
    routes: &Routes,
    on_error: &mut dyn FnMut(WeavingError),
) -> Result<ResolvedLink, String> {
    let (parent, field) =
        parse_link_key(link_key).ok_or("link keys must have the form `ParentType.field`")?;
    let parent_type = namespace
        .rename(parent)
        .map_err(|e| format!("invalid parent type name: {e}"))?;

    let Some(root) = merged.schema_definition.query.as_ref() else {
        return Err("the merged schema has no query root to link against".to_string());
    };
    if parent == "Query" || parent == "Mutation" || parent == "Subscription" {
        return Err("links on root operation types are not supported".to_string());
    }

    let parent_fields = fields_of(merged, &parent_type)
        .ok_or_else(|| format!("parent type '{parent_type}' is not part of the merged schema"))?;
    let key_definition = parent_fields
        .get(field)
        .ok_or_else(|| format!("'{parent_type}' has no field '{field}'"))?;
    let key_type = key_definition.ty.inner_named_type().clone();
    if !matches!(merged.types.get(&key_type), Some(ExtendedType::Scalar(_))) {
        return Err(format!(
            "linked field '{parent_type}.{field}' must be scalar-typed, found '{key_type}'"
        ));
    }

    // Walk the dotted target path from the merged query root.
    let segments =
        parse_dotted_path(&config.field).ok_or("the target field path is malformed")?;
    let mut chain: Vec<Name> = Vec::with_capacity(segments.len());
    let root_field_name = segments[0];
    let route = routes
        .query
        .get(root_field_name)
        .ok_or_else(|| format!("the merged query root has no field '{root_field_name}'"))?;
    chain.push(route.upstream_field.clone());

    let root_fields = fields_of(merged, &root.name)
        .ok_or("the merged schema has no query root to link against")?;
    let mut target = root_fields
        .get(root_field_name)
        .ok_or_else(|| format!("the merged query root has no field '{root_field_name}'"))?;
    for segment in &segments[1..] {
        let inner = target.ty.inner_named_type();
        let fields = fields_of(merged, inner)
            .ok_or_else(|| format!("'{inner}' has no fields to follow '{segment}' into"))?;
        target = fields
            .get(*segment)
            .ok_or_else(|| format!("'{inner}' has no field '{segment}'"))?;
        chain.push(
            Name::new(segment).map_err(|_| format!("'{segment}' is not a valid field name"))?,
        );
    }
    let target_type = target.ty.inner_named_type().clone();
    let target_namespace = &namespaces[route.endpoint];

    // The argument, with an optional nested filter field.
    let argument_segments =
        parse_dotted_path(&config.argument).ok_or("the argument path is malformed")?;
    let argument_name = argument_segments[0];
    let argument = target
        .arguments
        .iter()
        .find(|argument| argument.name.as_str() == argument_name)
        .ok_or_else(|| format!("target field has no argument '{argument_name}'"))?;

    let (argument_subfield, variable_type, argument_key_type) = match argument_segments.get(1) {
        None => (
            None,
            (*argument.ty).clone(),
            argument.ty.inner_named_type().clone(),
        ),
        Some(subfield) => {
            if !config.batch_mode || config.key_field.is_none() {
                return Err("joins by filter require batchMode and keyField".to_string());
            }
            let filter_type = argument.ty.inner_named_type();
            let ExtendedType::InputObject(filter) = merged
                .types
                .get(filter_type)
                .ok_or_else(|| format!("argument type '{filter_type}' is not part of the merged schema"))?
            else {
                return Err(format!("argument '{argument_name}' is not an input object"));
            };
            let subfield_definition = filter.fields.get(*subfield).ok_or_else(|| {
                format!("input type '{filter_type}' has no field '{subfield}'")
            })?;
            (
                Some(
                    Name::new(subfield)
                        .map_err(|_| format!("'{subfield}' is not a valid field name"))?,
                ),
                (*argument.ty).clone(),
                subfield_definition.ty.inner_named_type().clone(),
            )
        }
    };

    // Scalar compatibility between the key and the target argument. On
    // mismatch the link is reported and still installed.
    let upstream_key_type = namespace.reverse(&key_type);
    let upstream_argument_type = target_namespace.reverse(&argument_key_type);
    if upstream_key_type != upstream_argument_type {
        on_error(WeavingError {
            link: link_key.to_string(),
            reason: format!(
                "key field is '{upstream_key_type}' but the target argument takes \
                 '{upstream_argument_type}'"
            ),
        });
    }

    let exposed_arguments = if argument_subfield.is_some() {
        target.arguments.clone()
    } else {
        Vec::new()
    };

    let result_key_field = config
        .key_field
        .as_deref()
        .map(|key_field| {
            Name::new(key_field).map_err(|_| format!("'{key_field}' is not a valid field name"))
        })
        .transpose()?;

    Ok(ResolvedLink {
        link_key: link_key.to_string(),
        parent_type,
        key_field: Name::new(field).map_err(|_| format!("'{field}' is not a valid field name"))?,
        link_field: Name::new(&format!("{field}_link"))
            .map_err(|_| format!("'{field}_link' is not a valid field name"))?,
        endpoint: route.endpoint,
        chain,
        target_type,
        argument: argument.name.clone(),
        argument_subfield,
        batch_mode: config.batch_mode,
        result_key_field,
        variable_type,
        exposed_arguments,
    })
}

fn fields_of<'a>(
    schema: &'a Schema,
    type_name: &str,
) -> Option<&'a IndexMap<Name, Component<ast::FieldDefinition>>> {
    match schema.types.get(type_name)? {
        ExtendedType::Object(object) => Some(&object.fields),
        ExtendedType::Interface(interface) => Some(&interface.fields),
        _ => None,
    }
}

/// Adds the `f_link` sibling field for every resolved link, as a transformer
/// over the merged schema.
pub(crate) struct LinkInstaller<'a> {
    links: &'a LinkMap,
    /// Map key and error for every link whose field could not be added; the
    /// caller drops those entries from the map.
    errors: RefCell<Vec<(String, WeavingError)>>,
}

impl<'a> LinkInstaller<'a> {
    pub(crate) fn new(links: &'a LinkMap) -> Self {
        LinkInstaller {
            links,
            errors: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn take_errors(&self) -> Vec<(String, WeavingError)> {
        self.errors.take()
    }

    fn install(
        &self,
        type_name: &Name,
        fields: &mut IndexMap<Name, Component<ast::FieldDefinition>>,
    ) {
        for link in self.links.for_parent(type_name.as_str()) {
            if fields.contains_key(&link.link_field) {
                self.errors.borrow_mut().push((
                    format!("{type_name}.{}", link.link_field),
                    WeavingError {
                        link: link.link_key.clone(),
                        reason: format!(
                            "'{type_name}' already has a field '{}'",
                            link.link_field
                        ),
                    },
                ));
                continue;
            }
            fields.insert(
                link.link_field.clone(),
                Component::new(ast::FieldDefinition {
                    description: None,
                    name: link.link_field.clone(),
                    arguments: link.exposed_arguments.clone(),
                    ty: ast::Type::Named(link.target_type.clone()),
                    directives: Default::default(),
                }),
            );
        }
    }
}

impl SchemaTransformer for LinkInstaller<'_> {
    fn transform_object(
        &self,
        ty: &mut ObjectType,
        _ctx: &TransformContext<'_>,
    ) -> Result<(), TransformError> {
        self.install(&ty.name.clone(), &mut ty.fields);
        Ok(())
    }

    fn transform_interface(
        &self,
        ty: &mut InterfaceType,
        _ctx: &TransformContext<'_>,
    ) -> Result<(), TransformError> {
        self.install(&ty.name.clone(), &mut ty.fields);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::LinkConfig;
    use crate::merge::merge_schemas;
    use crate::merge::EndpointSchema;
    use crate::rename::NamespaceRenamer;
    use crate::transform::transform_schema;

    use super::*;

    fn merged_pair(a_sdl: &str, b_sdl: &str) -> (Schema, Routes, Vec<Namespace>) {
        let mut endpoints = Vec::new();
        let mut namespaces = Vec::new();
        for (id, (ns, sdl)) in [("A", a_sdl), ("B", b_sdl)].into_iter().enumerate() {
            let schema = Schema::parse_and_validate(sdl, "schema.graphql")
                .unwrap()
                .into_inner();
            let namespace = Namespace::new(ns);
            let renamed = transform_schema(
                &schema,
                &[&NamespaceRenamer {
                    namespace: &namespace,
                }],
            )
            .unwrap();
            endpoints.push(EndpointSchema {
                id,
                name: ns.to_lowercase(),
                namespace: namespace.clone(),
                schema: renamed,
            });
            namespaces.push(namespace);
        }
        let (merged, routes) = merge_schemas(&endpoints).unwrap();
        (merged, routes, namespaces)
    }

    fn configs_with_link(link_key: &str, link: LinkConfig) -> Vec<EndpointConfig> {
        vec![
            EndpointConfig {
                name: "a".to_string(),
                url: url::Url::parse("http://a.example/graphql").unwrap(),
                namespace: Some("A".to_string()),
                links: std::collections::HashMap::from([(link_key.to_string(), link)]),
            },
            EndpointConfig {
                name: "b".to_string(),
                url: url::Url::parse("http://b.example/graphql").unwrap(),
                namespace: Some("B".to_string()),
                links: Default::default(),
            },
        ]
    }

    const A_SDL: &str = r#"
        type Query { person: Person }
        type Person { countryCode: String age: Int }
    "#;
    const B_SDL: &str = r#"
        type Query { countryByCode(code: String): Country }
        type Country { name: String code: String }
    "#;

    #[test]
    fn links_resolve_against_the_merged_schema() {
        let (merged, routes, namespaces) = merged_pair(A_SDL, B_SDL);
        let configs = configs_with_link(
            "Person.countryCode",
            LinkConfig {
                field: "B_countryByCode".to_string(),
                argument: "code".to_string(),
                batch_mode: false,
                key_field: None,
            },
        );
        let mut errors = Vec::new();
        let links = resolve_links(&configs, &namespaces, &merged, &routes, &mut |e| {
            errors.push(e)
        });
        assert!(errors.is_empty(), "{errors:?}");
        let link = links.get("A_Person", "countryCode_link").unwrap();
        assert_eq!(link.endpoint, 1);
        assert_eq!(link.chain, vec![Name::new("countryByCode").unwrap()]);
        assert_eq!(link.target_type.as_str(), "B_Country");
        assert_eq!(link.argument.as_str(), "code");
        assert!(!link.batch_mode);
    }

    #[test]
    fn scalar_mismatches_are_reported_but_still_installed() {
        let (merged, routes, namespaces) = merged_pair(A_SDL, B_SDL);
        let configs = configs_with_link(
            "Person.age",
            LinkConfig {
                field: "B_countryByCode".to_string(),
                argument: "code".to_string(),
                batch_mode: false,
                key_field: None,
            },
        );
        let mut errors = Vec::new();
        let links = resolve_links(&configs, &namespaces, &merged, &routes, &mut |e| {
            errors.push(e)
        });
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].reason.contains("Int"), "{}", errors[0].reason);
        assert!(links.get("A_Person", "age_link").is_some());
    }

    #[test]
    fn missing_targets_are_skipped() {
        let (merged, routes, namespaces) = merged_pair(A_SDL, B_SDL);
        let configs = configs_with_link(
            "Person.countryCode",
            LinkConfig {
                field: "B_noSuchField".to_string(),
                argument: "code".to_string(),
                batch_mode: false,
                key_field: None,
            },
        );
        let mut errors = Vec::new();
        let links = resolve_links(&configs, &namespaces, &merged, &routes, &mut |e| {
            errors.push(e)
        });
        assert_eq!(errors.len(), 1);
        assert!(links.is_empty());
    }

    #[test]
    fn the_installer_adds_the_sibling_field() {
        let (merged, routes, namespaces) = merged_pair(A_SDL, B_SDL);
        let configs = configs_with_link(
            "Person.countryCode",
            LinkConfig {
                field: "B_countryByCode".to_string(),
                argument: "code".to_string(),
                batch_mode: false,
                key_field: None,
            },
        );
        let links = resolve_links(&configs, &namespaces, &merged, &routes, &mut |_| {});
        let installer = LinkInstaller::new(&links);
        let installed = transform_schema(&merged, &[&installer]).unwrap();
        assert!(installer.take_errors().is_empty());
        let person = installed.get_object("A_Person").unwrap();
        assert_eq!(
            person.fields.get("countryCode_link").unwrap().ty.to_string(),
            "B_Country"
        );
        installed.validate().unwrap();
    }
}
