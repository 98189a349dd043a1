//! Projection of raw upstream data into the client-facing response shape.
//!
//! Upstream responses carry extras the client never asked for: injected
//! `__typename` discriminators, key scalars added for links, and upstream
//! type names. This walk keeps exactly the selected output keys, renames
//! `__typename` values into the merged namespace, and evaluates
//! `@skip`/`@include` the same way the upstream did.

use apollo_compiler::ast;
use apollo_compiler::collections::IndexMap;
use apollo_compiler::executable;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::Name;

use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::merge::RootRoute;
use crate::weaver::Woven;

const TYPENAME: &str = "__typename";

/// `@skip`/`@include` evaluation against the request variables.
pub(crate) fn should_skip(directives: &ast::DirectiveList, variables: &Object) -> bool {
    for directive in directives.iter() {
        let condition = directive
            .arguments
            .iter()
            .find(|argument| argument.name.as_str() == "if")
            .and_then(|argument| evaluate_bool(&argument.value, variables));
        match directive.name.as_str() {
            "skip" if condition == Some(true) => return true,
            "include" if condition == Some(false) => return true,
            _ => {}
        }
    }
    false
}

fn evaluate_bool(value: &ast::Value, variables: &Object) -> Option<bool> {
    match value {
        ast::Value::Boolean(value) => Some(*value),
        ast::Value::Variable(name) => variables.get(name.as_str()).and_then(Value::as_bool),
        _ => None,
    }
}

pub(crate) struct Shaper<'a> {
    pub(crate) woven: &'a Woven,
    pub(crate) document: &'a executable::ExecutableDocument,
    pub(crate) variables: &'a Object,
    pub(crate) routes: &'a IndexMap<Name, RootRoute>,
}

impl Shaper<'_> {
    /// Projects the assembled root data against the operation's selections.
    pub(crate) fn shape_root(
        &self,
        operation: &executable::Operation,
        data: &Object,
    ) -> Object {
        let mut out = Object::new();
        self.shape_level(&operation.selection_set, data, None, &mut out);
        out
    }

    /// One selection-set level over one source object. `endpoint` is the
    /// endpoint the source subtree came from; `None` at the operation root,
    /// where each field routes to its own endpoint.
    fn shape_level(
        &self,
        set: &executable::SelectionSet,
        source: &Object,
        endpoint: Option<usize>,
        out: &mut Object,
    ) {
        for selection in &set.selections {
            match selection {
                executable::Selection::Field(field) => {
                    if should_skip(&field.directives, self.variables) {
                        continue;
                    }
                    let key = field.response_key().to_string();
                    if field.name.as_str() == TYPENAME {
                        insert_merged(out, key, Value::String(self.typename(set, source, endpoint)));
                        continue;
                    }
                    let child_endpoint = match endpoint {
                        None => match self.routes.get(field.name.as_str()) {
                            Some(route) => route.endpoint,
                            None => {
                                insert_merged(out, key, Value::Null);
                                continue;
                            }
                        },
                        Some(endpoint) => self
                            .woven
                            .links
                            .get(set.ty.as_str(), field.name.as_str())
                            .map(|link| link.endpoint)
                            .unwrap_or(endpoint),
                    };
                    let shaped = match source.get(&key) {
                        None => Value::Null,
                        Some(value) if field.selection_set.selections.is_empty() => value.clone(),
                        Some(value) => {
                            self.shape_value(&field.selection_set, value, child_endpoint)
                        }
                    };
                    insert_merged(out, key, shaped);
                }
                executable::Selection::FragmentSpread(spread) => {
                    if should_skip(&spread.directives, self.variables) {
                        continue;
                    }
                    let Some(fragment) = self.document.fragments.get(&spread.fragment_name)
                    else {
                        continue;
                    };
                    if self.condition_matches(fragment.type_condition(), source, endpoint) {
                        self.shape_level(&fragment.selection_set, source, endpoint, out);
                    }
                }
                executable::Selection::InlineFragment(inline) => {
                    if should_skip(&inline.directives, self.variables) {
                        continue;
                    }
                    let matches = inline
                        .type_condition
                        .as_ref()
                        .map(|condition| self.condition_matches(condition, source, endpoint))
                        .unwrap_or(true);
                    if matches {
                        self.shape_level(&inline.selection_set, source, endpoint, out);
                    }
                }
            }
        }
    }

    fn shape_value(
        &self,
        set: &executable::SelectionSet,
        value: &Value,
        endpoint: usize,
    ) -> Value {
        match value {
            Value::Null => Value::Null,
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.shape_value(set, item, endpoint))
                    .collect(),
            ),
            Value::Object(source) => {
                let mut out = Object::new();
                self.shape_level(set, source, Some(endpoint), &mut out);
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    /// The merged-namespace type name of a source object.
    fn typename(
        &self,
        set: &executable::SelectionSet,
        source: &Object,
        endpoint: Option<usize>,
    ) -> String {
        let upstream = source.get(TYPENAME).and_then(Value::as_str);
        match (endpoint, upstream) {
            (Some(endpoint), Some(upstream)) => self.woven.endpoints[endpoint]
                .namespace
                .rename(upstream)
                .map(|name| name.to_string())
                .unwrap_or_else(|_| set.ty.to_string()),
            // The root types are synthesized, their names are already merged.
            _ => set.ty.to_string(),
        }
    }

    fn condition_matches(
        &self,
        condition: &Name,
        source: &Object,
        endpoint: Option<usize>,
    ) -> bool {
        // Without a discriminator we assume the object matches; the upstream
        // executed the same fragments and shaped its data accordingly.
        let Some(endpoint) = endpoint else {
            return true;
        };
        let Some(upstream) = source.get(TYPENAME).and_then(Value::as_str) else {
            return true;
        };
        let Ok(concrete) = self.woven.endpoints[endpoint].namespace.rename(upstream) else {
            return true;
        };
        if condition == &concrete {
            return true;
        }
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
            Some(ExtendedType::Union(union_)) => union_
                .members
                .iter()
                .any(|member| member.name == concrete),
            _ => false,
        }
    }
}

fn insert_merged(out: &mut Object, key: String, value: Value) {
    match out.get_mut(&key) {
        Some(existing) => existing.deep_merge(value),
        None => {
            out.insert(key, value);
        }
    }
}
