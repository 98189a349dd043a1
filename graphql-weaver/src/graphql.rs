//! GraphQL-over-HTTP request, response and error types.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// A GraphQL request, as sent to the woven endpoint or to an upstream.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// The GraphQL query.
    pub query: String,

    /// The optional GraphQL operation name.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub operation_name: Option<String>,

    /// The optional variables in the form of a JSON object.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub variables: Object,

    /// The optional GraphQL extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,
}

impl Request {
    pub fn new(query: impl Into<String>) -> Self {
        Request {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_variables(mut self, variables: Object) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_operation_name(mut self, operation_name: impl Into<String>) -> Self {
        self.operation_name = Some(operation_name.into());
        self
    }
}

/// A GraphQL response, from an upstream or from the woven endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// The response data.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,

    /// The GraphQL errors encountered.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Error>,

    /// The optional GraphQL extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,
}

impl Response {
    pub fn from_data(data: Value) -> Self {
        Response {
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn from_errors(errors: Vec<Error>) -> Self {
        Response {
            errors,
            ..Default::default()
        }
    }
}

/// A [GraphQL error](https://spec.graphql.org/October2021/#sec-Errors)
/// as found in the `errors` member of a [`Response`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Error {
    /// The error message.
    pub message: String,

    /// If this is a field error, the response path to that field.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<Path>,

    /// The optional GraphQL extensions for this error.
    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

impl Error {
    pub fn new(message: impl Into<String>, code: &str) -> Self {
        let mut extensions = Object::new();
        extensions.insert("code".to_string(), code.into());
        Error {
            message: message.into(),
            path: None,
            extensions,
        }
    }

    pub fn with_path(mut self, path: Path) -> Self {
        self.path = Some(path);
        self
    }
}

/// Displays (only) the error message.
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_serializes_with_camel_case_keys() {
        let request = Request::new("{ hello }").with_operation_name("Op");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"query": "{ hello }", "operationName": "Op"})
        );
    }

    #[test]
    fn response_roundtrips_errors_with_paths() {
        let source = json!({
            "data": {"hello": null},
            "errors": [{"message": "boom", "path": ["hello"]}],
        });
        let response: Response = serde_json::from_value(source.clone()).unwrap();
        assert_eq!(response.errors.len(), 1);
        assert_eq!(
            response.errors[0].path,
            Some(crate::json_ext::Path::from_slice(&["hello"]))
        );
        assert_eq!(serde_json::to_value(&response).unwrap(), source);
    }
}
