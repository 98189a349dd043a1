//! The request pipeline over a woven schema.
//!
//! An incoming operation is validated against the merged schema, split per
//! root field into upstream sub-queries, dispatched concurrently, then the
//! responses are stitched back: linked fields join in data from other
//! endpoints, and a final projection produces exactly the shape the client
//! asked for, with upstream error paths shifted into the outer coordinate
//! system.

pub(crate) mod link;
pub(crate) mod proxy;
pub(crate) mod shape;

use apollo_compiler::ast;
use apollo_compiler::collections::IndexMap;
use apollo_compiler::executable;
use apollo_compiler::Name;
use futures::future::join_all;

use crate::client::Context;
use crate::error::RequestError;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::weaver::Woven;

enum Plan {
    Typename,
    Failed(graphql::Error),
    Fetch {
        endpoint: usize,
        upstream_field: Name,
        subquery: proxy::Subquery,
    },
}

pub(crate) async fn execute(
    woven: &Woven,
    request: graphql::Request,
    context: &Context,
) -> graphql::Response {
    let document = match executable::ExecutableDocument::parse_and_validate(
        &woven.schema,
        &request.query,
        "request.graphql",
    ) {
        Ok(document) => document,
        Err(e) => {
            return graphql::Response::from_errors(vec![graphql::Error::new(
                e.errors.to_string(),
                "GRAPHQL_VALIDATION_FAILED",
            )]);
        }
    };
    let operation = match document.operations.get(request.operation_name.as_deref()) {
        Ok(operation) => operation,
        Err(_) => {
            let message = match &request.operation_name {
                Some(name) => format!("unknown operation '{name}'"),
                None => "the operation to run could not be determined".to_string(),
            };
            return graphql::Response::from_errors(vec![graphql::Error::new(
                message,
                "OPERATION_RESOLUTION_FAILURE",
            )]);
        }
    };
    let variables = &request.variables;
    let routes = woven.routes.for_operation(operation.operation_type);
    let root_type_name = match operation.operation_type {
        ast::OperationType::Query => "Query",
        ast::OperationType::Mutation => "Mutation",
        ast::OperationType::Subscription => "Subscription",
    };

    // Group root fields by response key; duplicates with the same key merge
    // into one sub-query, distinct aliases of the same upstream field each
    // get their own.
    let mut groups: IndexMap<Name, Vec<&executable::Field>> = IndexMap::default();
    for field in operation.root_fields(&document) {
        if shape::should_skip(&field.directives, variables) {
            continue;
        }
        groups
            .entry(field.response_key().clone())
            .or_default()
            .push(field);
    }

    // Build every sub-query before dispatching anything; request-fatal
    // rewriting problems must surface before network traffic.
    let mut plans: Vec<(Name, Plan)> = Vec::with_capacity(groups.len());
    for (key, fields) in &groups {
        let first = fields[0];
        if first.name.as_str() == "__typename" {
            plans.push((key.clone(), Plan::Typename));
            continue;
        }
        let Some(route) = routes.get(first.name.as_str()) else {
            plans.push((
                key.clone(),
                Plan::Failed(
                    RequestError::UnroutedField {
                        field: first.name.to_string(),
                    }
                    .to_graphql_error(Some(Path::empty().key(key.to_string()))),
                ),
            ));
            continue;
        };
        let endpoint = &woven.endpoints[route.endpoint];
        let mut rewriter =
            proxy::Rewriter::new(&endpoint.namespace, &woven.links, &document.fragments);
        match proxy::build_root_subquery(
            operation,
            &mut rewriter,
            &route.upstream_field,
            fields,
            variables,
        ) {
            Ok(subquery) => plans.push((
                key.clone(),
                Plan::Fetch {
                    endpoint: route.endpoint,
                    upstream_field: route.upstream_field.clone(),
                    subquery,
                },
            )),
            Err(e) => plans.push((
                key.clone(),
                Plan::Failed(e.to_graphql_error(Some(Path::empty().key(key.to_string())))),
            )),
        }
    }

    // One sub-query per root field, dispatched concurrently; relative
    // ordering between siblings is unspecified.
    let results = join_all(plans.into_iter().map(|(key, plan)| async move {
        match plan {
            Plan::Typename => (key, Value::String(root_type_name.to_string()), Vec::new()),
            Plan::Failed(error) => (key, Value::Null, vec![error]),
            Plan::Fetch {
                endpoint,
                upstream_field,
                subquery,
            } => {
                let (value, errors) =
                    fetch_root(woven, endpoint, &upstream_field, &key, subquery, context).await;
                (key, value, errors)
            }
        }
    }))
    .await;

    let mut data = Object::new();
    let mut errors = Vec::new();
    for (key, value, field_errors) in results {
        data.insert(key.to_string(), value);
        errors.extend(field_errors);
    }

    let link_errors = link::resolve_links_in_data(
        woven,
        &document,
        operation,
        &mut data,
        variables,
        context,
        &errors,
    )
    .await;
    errors.extend(link_errors);

    let shaper = shape::Shaper {
        woven,
        document: &document,
        variables,
        routes,
    };
    let shaped = shaper.shape_root(operation, &data);

    graphql::Response {
        data: Some(Value::Object(shaped)),
        errors,
        extensions: Default::default(),
    }
}

/// Dispatches one root sub-query and pulls the field's value out of the
/// upstream response. Error paths already start at the upstream field; the
/// artificial first segment is dropped and the merged response key takes
/// its place.
async fn fetch_root(
    woven: &Woven,
    endpoint: usize,
    upstream_field: &Name,
    key: &Name,
    subquery: proxy::Subquery,
    context: &Context,
) -> (Value, Vec<graphql::Error>) {
    let endpoint = &woven.endpoints[endpoint];
    let outer = Path::empty().key(key.to_string());
    tracing::debug!(
        endpoint = endpoint.name.as_str(),
        field = key.as_str(),
        "dispatching root sub-query"
    );
    let response = match endpoint.client.request(subquery.request, context).await {
        Ok(response) => response,
        Err(e) => return (Value::Null, vec![e.to_graphql_error(Some(outer))]),
    };

    let mut errors: Vec<graphql::Error> = response
        .errors
        .into_iter()
        .map(|mut error| {
            let sub = error.path.take().unwrap_or_default();
            let remove_prefix_len = usize::from(!sub.is_empty());
            error.path = Some(outer.join_sub_path(&sub, remove_prefix_len));
            error
        })
        .collect();

    let value = match response.data {
        Some(Value::Object(mut object)) => match object.remove(upstream_field.as_str()) {
            Some(value) => value,
            None => {
                errors.push(
                    RequestError::UpstreamContractViolation {
                        service: endpoint.name.clone(),
                        key: upstream_field.to_string(),
                    }
                    .to_graphql_error(Some(outer)),
                );
                Value::Null
            }
        },
        Some(Value::Null) | None => {
            if errors.is_empty() {
                errors.push(
                    RequestError::UpstreamContractViolation {
                        service: endpoint.name.clone(),
                        key: upstream_field.to_string(),
                    }
                    .to_graphql_error(Some(outer)),
                );
            }
            Value::Null
        }
        Some(_) => {
            errors.push(
                RequestError::UpstreamContractViolation {
                    service: endpoint.name.clone(),
                    key: "the response data is not an object".to_string(),
                }
                .to_graphql_error(Some(outer)),
            );
            Value::Null
        }
    };
    (value, errors)
}
