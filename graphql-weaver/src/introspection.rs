//! Boot-time introspection of upstream endpoints.
//!
//! The introspection result is rendered to SDL and parsed back into a
//! [`Schema`], which is what the rest of the weaver operates on.

use apollo_compiler::Schema;
use itertools::Itertools;
use serde::Deserialize;

use crate::client::Context;
use crate::client::GraphqlClient;
use crate::error::WeaveError;
use crate::graphql;

/// The standard introspection query sent to every endpoint at boot.
pub const INTROSPECTION_QUERY: &str = r#"
query IntrospectionQuery {
  __schema {
    queryType { name }
    mutationType { name }
    subscriptionType { name }
    types { ...FullType }
    directives {
      name
      description
      isRepeatable
      locations
      args { ...InputValue }
    }
  }
}
fragment FullType on __Type {
  kind
  name
  description
  fields(includeDeprecated: true) {
    name
    description
    args { ...InputValue }
    type { ...TypeRef }
    isDeprecated
    deprecationReason
  }
  inputFields { ...InputValue }
  interfaces { ...TypeRef }
  enumValues(includeDeprecated: true) {
    name
    description
    isDeprecated
    deprecationReason
  }
  possibleTypes { ...TypeRef }
}
fragment InputValue on __InputValue {
  name
  description
  type { ...TypeRef }
  defaultValue
}
fragment TypeRef on __Type {
  kind
  name
  ofType {
    kind
    name
    ofType {
      kind
      name
      ofType {
        kind
        name
        ofType {
          kind
          name
          ofType {
            kind
            name
            ofType {
              kind
              name
              ofType {
                kind
                name
              }
            }
          }
        }
      }
    }
  }
}
"#;

const BUILT_IN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];
const BUILT_IN_DIRECTIVES: [&str; 4] = ["skip", "include", "deprecated", "specifiedBy"];

/// Introspect one endpoint and build its client schema.
///
/// Transport errors, GraphQL errors in the introspection response and
/// malformed response shapes are all fatal for boot.
pub async fn introspect(
    client: &dyn GraphqlClient,
    url: &str,
    context: &Context,
) -> Result<Schema, WeaveError> {
    let response = client
        .request(graphql::Request::new(INTROSPECTION_QUERY), context)
        .await
        .map_err(|e| WeaveError::IntrospectionFailure {
            endpoint: client.service().to_string(),
            reason: e.to_string(),
        })?;
    if !response.errors.is_empty() {
        return Err(WeaveError::IntrospectionFailure {
            endpoint: client.service().to_string(),
            reason: response.errors.iter().map(|e| &e.message).join(", "),
        });
    }
    let data = response
        .data
        .ok_or_else(|| WeaveError::IntrospectionFailure {
            endpoint: client.service().to_string(),
            reason: "introspection response carried no data".to_string(),
        })?;
    build_client_schema(&data, url)
}

/// Build a [`Schema`] from the `data` member of an introspection response.
pub fn build_client_schema(
    data: &serde_json::Value,
    url: &str,
) -> Result<Schema, WeaveError> {
    let introspected: IntrospectedData =
        serde_json::from_value(data.clone()).map_err(|e| WeaveError::SchemaBuildError {
            url: url.to_string(),
            reason: format!("unexpected introspection shape: {e}"),
        })?;
    let sdl = render_sdl(&introspected.schema);
    Schema::parse(&sdl, url).map_err(|e| WeaveError::SchemaBuildError {
        url: url.to_string(),
        reason: e.errors.to_string(),
    })
}

#[derive(Deserialize)]
struct IntrospectedData {
    #[serde(rename = "__schema")]
    schema: IntrospectedSchema,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectedSchema {
    query_type: Option<TypeRef>,
    mutation_type: Option<TypeRef>,
    subscription_type: Option<TypeRef>,
    types: Vec<IntrospectedType>,
    #[serde(default)]
    directives: Vec<IntrospectedDirective>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectedType {
    kind: String,
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    fields: Option<Vec<IntrospectedField>>,
    #[serde(default)]
    input_fields: Option<Vec<IntrospectedInputValue>>,
    #[serde(default)]
    interfaces: Option<Vec<TypeRef>>,
    #[serde(default)]
    enum_values: Option<Vec<IntrospectedEnumValue>>,
    #[serde(default)]
    possible_types: Option<Vec<TypeRef>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectedField {
    name: String,
    description: Option<String>,
    #[serde(default)]
    args: Vec<IntrospectedInputValue>,
    #[serde(rename = "type")]
    ty: TypeRef,
    #[serde(default)]
    is_deprecated: bool,
    deprecation_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectedInputValue {
    name: String,
    description: Option<String>,
    #[serde(rename = "type")]
    ty: TypeRef,
    default_value: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectedEnumValue {
    name: String,
    description: Option<String>,
    #[serde(default)]
    is_deprecated: bool,
    deprecation_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectedDirective {
    name: String,
    description: Option<String>,
    #[serde(default)]
    is_repeatable: bool,
    locations: Vec<String>,
    #[serde(default)]
    args: Vec<IntrospectedInputValue>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeRef {
    kind: Option<String>,
    name: Option<String>,
    of_type: Option<Box<TypeRef>>,
}

impl TypeRef {
    fn render(&self) -> String {
        match (self.kind.as_deref(), &self.of_type) {
            (Some("NON_NULL"), Some(inner)) => format!("{}!", inner.render()),
            (Some("LIST"), Some(inner)) => format!("[{}]", inner.render()),
            _ => self.name.clone().unwrap_or_default(),
        }
    }
}

fn render_sdl(schema: &IntrospectedSchema) -> String {
    let mut sdl = String::new();

    let roots = [
        ("query", &schema.query_type),
        ("mutation", &schema.mutation_type),
        ("subscription", &schema.subscription_type),
    ];
    let named_roots: Vec<_> = roots
        .iter()
        .filter_map(|(kind, ty)| ty.as_ref().and_then(|t| t.name.as_deref()).map(|n| (*kind, n)))
        .collect();
    if !named_roots.is_empty() {
        sdl.push_str("schema {\n");
        for (kind, name) in named_roots {
            sdl.push_str(&format!("  {kind}: {name}\n"));
        }
        sdl.push_str("}\n");
    }

    for directive in &schema.directives {
        if BUILT_IN_DIRECTIVES.contains(&directive.name.as_str()) {
            continue;
        }
        push_description(&mut sdl, &directive.description, "");
        sdl.push_str(&format!("directive @{}", directive.name));
        push_arguments(&mut sdl, &directive.args);
        if directive.is_repeatable {
            sdl.push_str(" repeatable");
        }
        sdl.push_str(&format!(" on {}\n", directive.locations.join(" | ")));
    }

    for ty in &schema.types {
        let Some(name) = ty.name.as_deref() else {
            continue;
        };
        if name.starts_with("__") || BUILT_IN_SCALARS.contains(&name) {
            continue;
        }
        push_description(&mut sdl, &ty.description, "");
        match ty.kind.as_str() {
            "SCALAR" => sdl.push_str(&format!("scalar {name}\n")),
            "OBJECT" => {
                sdl.push_str(&format!("type {name}"));
                push_interfaces(&mut sdl, &ty.interfaces);
                push_fields(&mut sdl, &ty.fields);
            }
            "INTERFACE" => {
                sdl.push_str(&format!("interface {name}"));
                push_interfaces(&mut sdl, &ty.interfaces);
                push_fields(&mut sdl, &ty.fields);
            }
            "UNION" => {
                let members = ty
                    .possible_types
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|t| t.name.as_deref())
                    .join(" | ");
                sdl.push_str(&format!("union {name} = {members}\n"));
            }
            "ENUM" => {
                sdl.push_str(&format!("enum {name} {{\n"));
                for value in ty.enum_values.as_deref().unwrap_or_default() {
                    push_description(&mut sdl, &value.description, "  ");
                    sdl.push_str(&format!("  {}", value.name));
                    push_deprecated(&mut sdl, value.is_deprecated, &value.deprecation_reason);
                    sdl.push('\n');
                }
                sdl.push_str("}\n");
            }
            "INPUT_OBJECT" => {
                sdl.push_str(&format!("input {name} {{\n"));
                for field in ty.input_fields.as_deref().unwrap_or_default() {
                    push_description(&mut sdl, &field.description, "  ");
                    sdl.push_str(&format!("  {}", render_input_value(field)));
                    sdl.push('\n');
                }
                sdl.push_str("}\n");
            }
            _ => {}
        }
    }

    sdl
}

fn push_interfaces(sdl: &mut String, interfaces: &Option<Vec<TypeRef>>) {
    let names: Vec<&str> = interfaces
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|t| t.name.as_deref())
        .collect();
    if !names.is_empty() {
        sdl.push_str(&format!(" implements {}", names.join(" & ")));
    }
}

fn push_fields(sdl: &mut String, fields: &Option<Vec<IntrospectedField>>) {
    sdl.push_str(" {\n");
    for field in fields.as_deref().unwrap_or_default() {
        push_description(sdl, &field.description, "  ");
        sdl.push_str(&format!("  {}", field.name));
        push_arguments(sdl, &field.args);
        sdl.push_str(&format!(": {}", field.ty.render()));
        push_deprecated(sdl, field.is_deprecated, &field.deprecation_reason);
        sdl.push('\n');
    }
    sdl.push_str("}\n");
}

fn push_arguments(sdl: &mut String, args: &[IntrospectedInputValue]) {
    if args.is_empty() {
        return;
    }
    let rendered: Vec<String> = args.iter().map(render_input_value).collect();
    sdl.push_str(&format!("({})", rendered.join(", ")));
}

fn render_input_value(value: &IntrospectedInputValue) -> String {
    let mut rendered = format!("{}: {}", value.name, value.ty.render());
    if let Some(default) = &value.default_value {
        // defaultValue is already a GraphQL literal.
        rendered.push_str(&format!(" = {default}"));
    }
    rendered
}

fn push_deprecated(sdl: &mut String, is_deprecated: bool, reason: &Option<String>) {
    if !is_deprecated {
        return;
    }
    match reason {
        Some(reason) => {
            sdl.push_str(&format!(" @deprecated(reason: {})", render_string(reason)))
        }
        None => sdl.push_str(" @deprecated"),
    }
}

fn push_description(sdl: &mut String, description: &Option<String>, indent: &str) {
    if let Some(description) = description {
        sdl.push_str(&format!(
            "{indent}\"\"\"{}\"\"\"\n",
            description.replace('\\', "\\\\").replace("\"\"\"", "\\\"\"\"")
        ));
    }
}

fn render_string(s: &str) -> String {
    format!(
        "\"{}\"",
        s.replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('\n', "\\n")
    )
}
