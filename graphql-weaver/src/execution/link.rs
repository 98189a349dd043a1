//! Request-time resolution of linked fields: batched key collection,
//! joined sub-queries, and splicing results back into the response data.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use apollo_compiler::ast;
use apollo_compiler::executable;
use apollo_compiler::Name;
use apollo_compiler::Node;
use futures::future::join_all;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::ast::add_variable_definition_safely;
use crate::ast::key_field_selection;
use crate::ast::ChainLink;
use crate::ast::KeySelection;
use crate::ast::selection_chain;
use crate::client::Context;
use crate::error::FetchError;
use crate::error::RequestError;
use crate::execution::proxy::build_subquery;
use crate::execution::proxy::Rewriter;
use crate::execution::shape::should_skip;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::links::ResolvedLink;
use crate::weaver::Woven;

/// Resolves every linked field reachable from the response data, in place.
///
/// Batches form within a single parent list resolution: all keys of one list
/// level go out as one sub-query in batch mode, one sub-query per parent
/// otherwise. Returns the errors gathered along the way.
pub(crate) async fn resolve_links_in_data(
    woven: &Woven,
    document: &executable::ExecutableDocument,
    operation: &executable::Operation,
    data: &mut Object,
    variables: &Object,
    context: &Context,
    prior_errors: &[graphql::Error],
) -> Vec<graphql::Error> {
    if woven.links.is_empty() {
        return Vec::new();
    }
    let resolver = LinkResolver {
        woven,
        document,
        operation,
        variables,
        context,
        prior_errors,
    };
    let routes = woven.routes.for_operation(operation.operation_type);
    let mut errors = Vec::new();
    for field in operation.root_fields(document) {
        if field.name.as_str() == "__typename" || should_skip(&field.directives, variables) {
            continue;
        }
        let Some(route) = routes.get(field.name.as_str()) else {
            continue;
        };
        let key = field.response_key().to_string();
        if let Some(value) = data.get_mut(&key) {
            let path = Path::empty().key(key);
            errors.extend(
                resolver
                    .walk_value(&field.selection_set, value, path, route.endpoint)
                    .await,
            );
        }
    }
    errors
}

struct LinkResolver<'a> {
    woven: &'a Woven,
    document: &'a executable::ExecutableDocument,
    operation: &'a executable::Operation,
    variables: &'a Object,
    context: &'a Context,
    prior_errors: &'a [graphql::Error],
}

/// One parent object eligible for a link, by position in the parent set.
struct Slot {
    parent: usize,
    key: Value,
}

/// A fetched join, chain already removed.
struct LinkFetched {
    value: Value,
    by_key: Option<HashMap<String, Value>>,
    /// Upstream errors split into an optional result-row index and the
    /// remaining sub-path below that row.
    upstream_errors: Vec<(Option<usize>, Path, graphql::Error)>,
}

enum LinkFetchError {
    Fetch(FetchError),
    Request(RequestError),
}

impl LinkResolver<'_> {
    fn walk_value<'f>(
        &'f self,
        set: &'f executable::SelectionSet,
        value: &'f mut Value,
        path: Path,
        endpoint: usize,
    ) -> BoxFuture<'f, Vec<graphql::Error>> {
        async move {
            let mut parents: Vec<(&mut Value, Path)> = Vec::new();
            collect_objects(value, path, &mut parents);
            if parents.is_empty() {
                return Vec::new();
            }
            let mask = vec![true; parents.len()];
            self.process_level(set, &mut parents, &mask, endpoint).await
        }
        .boxed()
    }

    fn process_level<'f, 'v: 'f>(
        &'f self,
        set: &'f executable::SelectionSet,
        parents: &'f mut Vec<(&'v mut Value, Path)>,
        mask: &'f [bool],
        endpoint: usize,
    ) -> BoxFuture<'f, Vec<graphql::Error>> {
        async move {
            let mut errors = Vec::new();
            for selection in &set.selections {
                match selection {
                    executable::Selection::Field(field) => {
                        if should_skip(&field.directives, self.variables) {
                            continue;
                        }
                        if let Some(link) =
                            self.woven.links.get(set.ty.as_str(), field.name.as_str())
                        {
                            let link = Arc::clone(link);
                            errors.extend(
                                self.resolve_link_field(&link, field, set, parents, mask)
                                    .await,
                            );
                        } else if !field.selection_set.selections.is_empty() {
                            let key = field.response_key().to_string();
                            for (index, (parent, parent_path)) in parents.iter_mut().enumerate()
                            {
                                if !mask[index] {
                                    continue;
                                }
                                let Some(object) = parent.as_object_mut() else {
                                    continue;
                                };
                                if let Some(child) = object.get_mut(&key) {
                                    errors.extend(
                                        self.walk_value(
                                            &field.selection_set,
                                            child,
                                            parent_path.key(key.clone()),
                                            endpoint,
                                        )
                                        .await,
                                    );
                                }
                            }
                        }
                    }
                    executable::Selection::FragmentSpread(spread) => {
                        if should_skip(&spread.directives, self.variables) {
                            continue;
                        }
                        let Some(fragment) = self.document.fragments.get(&spread.fragment_name)
                        else {
                            continue;
                        };
                        let narrowed = self.narrow_mask(
                            Some(fragment.type_condition()),
                            parents,
                            mask,
                            endpoint,
                        );
                        errors.extend(
                            self.process_level(&fragment.selection_set, parents, &narrowed, endpoint)
                                .await,
                        );
                    }
                    executable::Selection::InlineFragment(inline) => {
                        if should_skip(&inline.directives, self.variables) {
                            continue;
                        }
                        let narrowed = self.narrow_mask(
                            inline.type_condition.as_ref(),
                            parents,
                            mask,
                            endpoint,
                        );
                        errors.extend(
                            self.process_level(&inline.selection_set, parents, &narrowed, endpoint)
                                .await,
                        );
                    }
                }
            }
            errors
        }
        .boxed()
    }

    /// Restrict the parent mask to objects matching a fragment condition.
    fn narrow_mask(
        &self,
        condition: Option<&Name>,
        parents: &[(&mut Value, Path)],
        mask: &[bool],
        endpoint: usize,
    ) -> Vec<bool> {
        let Some(condition) = condition else {
            return mask.to_vec();
        };
        parents
            .iter()
            .zip(mask)
            .map(|((parent, _), eligible)| {
                *eligible && self.condition_matches(condition, parent, endpoint)
            })
            .collect()
    }

    fn condition_matches(&self, condition: &Name, parent: &Value, endpoint: usize) -> bool {
        let Some(upstream) = parent.get("__typename").and_then(Value::as_str) else {
            return true;
        };
        let Ok(concrete) = self.woven.endpoints[endpoint].namespace.rename(upstream) else {
            return true;
        };
        if *condition == concrete {
            return true;
        }
        use apollo_compiler::schema::ExtendedType;
        match self.woven.schema.types.get(condition.as_str()) {
            Some(ExtendedType::Interface(_)) => self
                .woven
                .schema
                .get_object(&concrete)
                .is_some_and(|object| {
                    object
                        .implements_interfaces
                        .iter()
                        .any(|interface| interface.name == *condition)
                }),
            Some(ExtendedType::Union(union_)) => {
                union_.members.iter().any(|member| member.name == concrete)
            }
            _ => false,
        }
    }

    fn resolve_link_field<'f, 'v: 'f>(
        &'f self,
        link: &'f Arc<ResolvedLink>,
        field: &'f executable::Field,
        set: &'f executable::SelectionSet,
        parents: &'f mut Vec<(&'v mut Value, Path)>,
        mask: &'f [bool],
    ) -> BoxFuture<'f, Vec<graphql::Error>> {
        async move {
            let mut errors = Vec::new();
            let link_key_name = field.response_key().to_string();

            let key_selection = match key_field_selection(
                &set.selections,
                &self.document.fragments,
                link.key_field.as_str(),
            ) {
                Ok(selection) => selection,
                Err(e) => {
                    errors.push(
                        RequestError::Internal {
                            reason: e.to_string(),
                        }
                        .to_graphql_error(None),
                    );
                    return errors;
                }
            };
            let key_output = key_selection.output_key().to_string();

            // Every eligible parent answers the link field, with `null` until
            // a join result lands.
            let mut slots: Vec<Slot> = Vec::new();
            for (index, (parent, parent_path)) in parents.iter_mut().enumerate() {
                if !mask[index] {
                    continue;
                }
                let Some(object) = parent.as_object_mut() else {
                    continue;
                };
                object.insert(link_key_name.clone(), Value::Null);
                let key = object.get(&key_output).cloned().unwrap_or(Value::Null);
                if key.is_null() {
                    let key_path = parent_path.key(key_output.clone());
                    if self.is_error_value(&key_path) {
                        errors.push(
                            RequestError::KeyFieldError {
                                path: key_path.to_string(),
                            }
                            .to_graphql_error(Some(parent_path.key(link_key_name.clone()))),
                        );
                    }
                    continue;
                }
                slots.push(Slot { parent: index, key });
            }
            if slots.is_empty() {
                return errors;
            }

            if link.batch_mode {
                let keys: Vec<Value> = slots.iter().map(|slot| slot.key.clone()).collect();
                match self.fetch_link(link, field, LinkPayload::Batch(keys)).await {
                    Ok(fetched) => {
                        errors.extend(self.splice_batch(
                            link,
                            field,
                            &link_key_name,
                            &slots,
                            parents,
                            fetched,
                        )
                        .await);
                    }
                    Err(e) => {
                        for slot in &slots {
                            let path = parents[slot.parent].1.key(link_key_name.clone());
                            errors.push(self.fetch_error_to_graphql(&e, path));
                        }
                    }
                }
            } else {
                // Independent execution per parent object.
                let fetches = slots.iter().map(|slot| {
                    self.fetch_link(link, field, LinkPayload::Single(slot.key.clone()))
                });
                let results = join_all(fetches).await;
                for (slot, result) in slots.iter().zip(results) {
                    let link_path = parents[slot.parent].1.key(link_key_name.clone());
                    match result {
                        Ok(fetched) => {
                            let value = match &fetched.by_key {
                                Some(map) => map
                                    .get(&canonical(&slot.key))
                                    .cloned()
                                    .unwrap_or(Value::Null),
                                None => fetched.value,
                            };
                            for (_, rest, error) in fetched.upstream_errors {
                                errors.push(rewritten(error, link_path.join_sub_path(&rest, 0)));
                            }
                            errors.extend(
                                self.splice_one(
                                    link,
                                    field,
                                    &link_key_name,
                                    slot.parent,
                                    parents,
                                    value,
                                )
                                .await,
                            );
                        }
                        Err(e) => errors.push(self.fetch_error_to_graphql(&e, link_path)),
                    }
                }
            }
            errors
        }
        .boxed()
    }

    /// Splices one batched result set back onto its parents, by position
    /// when the upstream preserves input order, by key field otherwise.
    async fn splice_batch<'v>(
        &self,
        link: &Arc<ResolvedLink>,
        field: &executable::Field,
        link_key_name: &str,
        slots: &[Slot],
        parents: &mut Vec<(&'v mut Value, Path)>,
        fetched: LinkFetched,
    ) -> Vec<graphql::Error> {
        let mut errors = Vec::new();
        let rows = match fetched.value {
            Value::Array(rows) => rows,
            Value::Null => {
                // The whole batch came back as an error value.
                for slot in slots.iter() {
                    let path = parents[slot.parent].1.key(link_key_name.to_string());
                    for (_, rest, error) in &fetched.upstream_errors {
                        errors.push(rewritten(error.clone(), path.join_sub_path(rest, 0)));
                    }
                    if fetched.upstream_errors.is_empty() {
                        errors.push(
                            RequestError::UpstreamContractViolation {
                                service: self.woven.endpoints[link.endpoint].name.clone(),
                                key: link.chain.last().map(|n| n.to_string()).unwrap_or_default(),
                            }
                            .to_graphql_error(Some(path)),
                        );
                    }
                }
                return errors;
            }
            other => {
                for slot in slots.iter() {
                    let path = parents[slot.parent].1.key(link_key_name.to_string());
                    errors.push(
                        RequestError::UpstreamContractViolation {
                            service: self.woven.endpoints[link.endpoint].name.clone(),
                            key: format!("expected a list, found {}", kind_of(&other)),
                        }
                        .to_graphql_error(Some(path)),
                    );
                }
                return errors;
            }
        };

        for (position, slot) in slots.iter().enumerate() {
            let value = match &fetched.by_key {
                // Reorder by key, no upstream ordering assumed.
                Some(map) => map.get(&canonical(&slot.key)).cloned().unwrap_or(Value::Null),
                // The upstream is trusted to answer in input order.
                None => rows.get(position).cloned().unwrap_or(Value::Null),
            };
            let link_path = parents[slot.parent].1.key(link_key_name.to_string());
            for (row, rest, error) in &fetched.upstream_errors {
                let applies = match (row, &fetched.by_key) {
                    (Some(row), None) => *row == position,
                    // With keyed reordering, rows are matched by key value.
                    (Some(row), Some(_)) => rows
                        .get(*row)
                        .is_some_and(|candidate| candidate == &value && !value.is_null()),
                    (None, _) => position == 0,
                };
                if applies {
                    errors.push(rewritten(error.clone(), link_path.join_sub_path(rest, 0)));
                }
            }
            errors.extend(
                self.splice_one(link, field, link_key_name, slot.parent, parents, value)
                    .await,
            );
        }
        errors
    }

    /// Sets the joined value on one parent and resolves links nested in it.
    async fn splice_one<'v>(
        &self,
        link: &Arc<ResolvedLink>,
        field: &executable::Field,
        link_key_name: &str,
        parent: usize,
        parents: &mut Vec<(&'v mut Value, Path)>,
        value: Value,
    ) -> Vec<graphql::Error> {
        let (parent_value, parent_path) = &mut parents[parent];
        let Some(object) = parent_value.as_object_mut() else {
            return Vec::new();
        };
        let is_composite = value.is_object() || value.is_array();
        object.insert(link_key_name.to_string(), value);
        if !is_composite {
            return Vec::new();
        }
        let Some(spliced) = object.get_mut(link_key_name) else {
            return Vec::new();
        };
        self.walk_value(
            &field.selection_set,
            spliced,
            parent_path.key(link_key_name.to_string()),
            link.endpoint,
        )
        .await
    }

    /// Issues the joined sub-query and splits the response.
    async fn fetch_link(
        &self,
        link: &Arc<ResolvedLink>,
        field: &executable::Field,
        payload: LinkPayload,
    ) -> Result<LinkFetched, LinkFetchError> {
        let endpoint = &self.woven.endpoints[link.endpoint];
        let mut rewriter = Rewriter::new(&endpoint.namespace, &self.woven.links, &self.document.fragments);
        let mut inner = rewriter
            .rewrite_selection_set(&field.selection_set)
            .map_err(LinkFetchError::Request)?;

        // In keyed modes the joining key must come back on every result.
        let mut result_key_alias = None;
        if let Some(result_key) = &link.result_key_field {
            let selection = key_field_selection(
                &field.selection_set.selections,
                &self.document.fragments,
                result_key.as_str(),
            )
            .map_err(|e| {
                LinkFetchError::Request(RequestError::Internal {
                    reason: e.to_string(),
                })
            })?;
            if let KeySelection::Added(alias) = &selection {
                let mut key_field = crate::ast::field_node(result_key.clone());
                if *alias != *result_key {
                    key_field.alias = Some(alias.clone());
                }
                inner.push(ast::Selection::Field(Node::new(key_field)));
            }
            result_key_alias = Some(selection.output_key().to_string());
        }

        // The linker-bound variable, under a name no client variable uses.
        let variable_base = link.argument.to_string();
        let variable_type = endpoint.namespace.reverse_type(&link.variable_type);
        let (_, variable_name) = add_variable_definition_safely(
            &self.operation.variables,
            &variable_base,
            variable_type.clone(),
        )
        .map_err(|e| {
            LinkFetchError::Request(RequestError::Internal {
                reason: e.to_string(),
            })
        })?;
        let linker_definition = Node::new(ast::VariableDefinition {
            name: variable_name.clone(),
            ty: Node::new(variable_type),
            default_value: None,
            directives: Default::default(),
        });

        let (arguments, variable_value) =
            self.link_arguments(link, field, &variable_name, payload);

        let mut chain_links: Vec<ChainLink> = link
            .chain
            .iter()
            .map(|name| ChainLink::plain(name.clone()))
            .collect();
        if let Some(last) = chain_links.last_mut() {
            last.arguments = arguments;
        }
        let selections = selection_chain(&chain_links, inner);
        let fragments = rewriter
            .rewrite_fragments()
            .map_err(LinkFetchError::Request)?;

        let mut extra_variables = Object::new();
        extra_variables.insert(variable_name.to_string(), variable_value);
        let subquery = build_subquery(
            ast::OperationType::Query,
            selections,
            fragments,
            &self.operation.variables,
            vec![linker_definition],
            &endpoint.namespace,
            self.variables,
            extra_variables,
        );

        tracing::debug!(
            endpoint = endpoint.name.as_str(),
            link = link.link_key.as_str(),
            "dispatching link sub-query"
        );
        let response = endpoint
            .client
            .request(subquery.request, self.context)
            .await
            .map_err(LinkFetchError::Fetch)?;

        // Descend by the ancestor chain the sub-query wrapped around the
        // target field.
        let mut value = response.data.unwrap_or(Value::Null);
        for segment in &link.chain {
            value = match value {
                Value::Object(mut object) => {
                    object.remove(segment.as_str()).unwrap_or(Value::Null)
                }
                Value::Null => Value::Null,
                _ => {
                    return Err(LinkFetchError::Request(
                        RequestError::UpstreamContractViolation {
                            service: endpoint.name.clone(),
                            key: segment.to_string(),
                        },
                    ))
                }
            };
        }

        let chain_len = link.chain.len();
        let upstream_errors = response
            .errors
            .into_iter()
            .map(|mut error| {
                let sub = error.path.take().unwrap_or_default();
                let below: Vec<PathElement> =
                    sub.0.into_iter().skip(chain_len).collect();
                let (row, rest) = match below.split_first() {
                    Some((PathElement::Index(row), rest)) => (Some(*row), Path(rest.to_vec())),
                    _ => (None, Path(below)),
                };
                (row, rest, error)
            })
            .collect();

        let by_key = result_key_alias.map(|alias| {
            let mut map = HashMap::new();
            if let Value::Array(rows) = &value {
                for row in rows {
                    if let Some(key) = row.get(&alias) {
                        if !key.is_null() {
                            map.insert(canonical(key), row.clone());
                        }
                    }
                }
            } else if let Some(key) = value.get(&alias) {
                if !key.is_null() {
                    map.insert(canonical(key), value.clone());
                }
            }
            map
        });

        Ok(LinkFetched {
            value,
            by_key,
            upstream_errors,
        })
    }

    /// The arguments placed on the target field, and the JSON value bound to
    /// the linker variable.
    fn link_arguments(
        &self,
        link: &Arc<ResolvedLink>,
        field: &executable::Field,
        variable_name: &Name,
        payload: LinkPayload,
    ) -> (Vec<Node<ast::Argument>>, Value) {
        let keys_value = match payload {
            LinkPayload::Single(key) => key,
            LinkPayload::Batch(keys) => Value::Array(keys),
        };
        let Some(subfield) = &link.argument_subfield else {
            let arguments = vec![Node::new(ast::Argument {
                name: link.argument.clone(),
                value: Node::new(ast::Value::Variable(variable_name.clone())),
            })];
            return (arguments, keys_value);
        };

        // Join by filter: merge the key set into the user's filter at the
        // nested field, intersecting when the user filtered by the same key.
        let keys = match keys_value {
            Value::Array(keys) => keys,
            single => vec![single],
        };
        let mut filter = Object::new();
        let mut arguments: Vec<Node<ast::Argument>> = Vec::new();
        for argument in &field.arguments {
            if argument.name == link.argument {
                if let Value::Object(user_filter) =
                    ast_value_to_json(&argument.value, self.variables)
                {
                    filter = user_filter;
                }
            } else {
                // `orderBy`, `first`, `skip` and any other target arguments
                // are forwarded untouched.
                arguments.push(argument.clone());
            }
        }
        let keys = match filter.remove(subfield.as_str()) {
            Some(Value::Array(user_keys)) => {
                let allowed: HashSet<String> = user_keys.iter().map(canonical).collect();
                keys.into_iter()
                    .filter(|key| allowed.contains(&canonical(key)))
                    .collect()
            }
            _ => keys,
        };
        filter.insert(subfield.to_string(), Value::Array(keys));
        arguments.push(Node::new(ast::Argument {
            name: link.argument.clone(),
            value: Node::new(ast::Value::Variable(variable_name.clone())),
        }));
        (arguments, Value::Object(filter))
    }

    fn is_error_value(&self, path: &Path) -> bool {
        self.prior_errors
            .iter()
            .any(|error| error.path.as_ref() == Some(path))
    }

    fn fetch_error_to_graphql(&self, error: &LinkFetchError, path: Path) -> graphql::Error {
        match error {
            LinkFetchError::Fetch(e) => e.to_graphql_error(Some(path)),
            LinkFetchError::Request(e) => e.to_graphql_error(Some(path)),
        }
    }
}

enum LinkPayload {
    Single(Value),
    Batch(Vec<Value>),
}

fn collect_objects<'v>(
    value: &'v mut Value,
    path: Path,
    out: &mut Vec<(&'v mut Value, Path)>,
) {
    match value {
        Value::Array(items) => {
            for (index, item) in items.iter_mut().enumerate() {
                collect_objects(item, path.index(index), out);
            }
        }
        Value::Object(_) => out.push((value, path)),
        _ => {}
    }
}

fn rewritten(mut error: graphql::Error, path: Path) -> graphql::Error {
    error.path = Some(path);
    error
}

fn canonical(value: &Value) -> String {
    value.to_string()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Evaluates an argument value against the request variables.
fn ast_value_to_json(value: &ast::Value, variables: &Object) -> Value {
    match value {
        ast::Value::Null => Value::Null,
        ast::Value::Boolean(value) => (*value).into(),
        ast::Value::Enum(name) => Value::String(name.to_string()),
        ast::Value::String(value) => Value::String(value.clone()),
        ast::Value::Int(value) => value
            .try_to_i32()
            .map(Value::from)
            .unwrap_or(Value::Null),
        ast::Value::Float(value) => value
            .try_to_f64()
            .map(Value::from)
            .unwrap_or(Value::Null),
        ast::Value::Variable(name) => variables.get(name.as_str()).cloned().unwrap_or(Value::Null),
        ast::Value::List(items) => Value::Array(
            items
                .iter()
                .map(|item| ast_value_to_json(item, variables))
                .collect(),
        ),
        ast::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, value)| (name.to_string(), ast_value_to_json(value, variables)))
                .collect(),
        ),
    }
}
