//! Weaver errors.
use displaydoc::Display;
use serde::Serialize;
use thiserror::Error;

use crate::graphql;
use crate::json_ext::Path;

/// Errors raised while talking to an upstream endpoint.
///
/// These are not returned to the client directly, they are converted to JSON
/// for [`graphql::Error`].
#[derive(Error, Display, Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(untagged)]
#[ignore_extra_doc_attributes]
#[non_exhaustive]
pub enum FetchError {
    /// request was malformed: {reason}
    MalformedRequest {
        /// The reason the serialization failed.
        reason: String,
    },

    /// service '{service}' response was malformed: {reason}
    SubrequestMalformedResponse {
        /// The service that responded with the malformed response.
        service: String,

        /// The reason the deserialization failed.
        reason: String,
    },

    /// HTTP fetch failed from '{service}': {reason}
    ///
    /// note that this relates to a transport error and not a GraphQL error
    SubrequestHttpError {
        status_code: Option<u16>,

        /// The service that failed.
        service: String,

        /// The reason the fetch failed.
        reason: String,
    },
}

impl FetchError {
    /// Convert the fetch error to a GraphQL error.
    pub fn to_graphql_error(&self, path: Option<Path>) -> graphql::Error {
        let mut extensions = match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(extensions)) => extensions,
            _ => Default::default(),
        };
        extensions.insert("code".to_string(), self.extension_code().into());
        graphql::Error {
            message: self.to_string(),
            path,
            extensions,
        }
    }

    pub(crate) fn extension_code(&self) -> &'static str {
        match self {
            FetchError::MalformedRequest { .. } => "MALFORMED_REQUEST",
            FetchError::SubrequestMalformedResponse { .. } => "SUBREQUEST_MALFORMED_RESPONSE",
            FetchError::SubrequestHttpError { .. } => "SUBREQUEST_HTTP_ERROR",
        }
    }
}

/// Configuration errors, fatal at boot.
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// configuration document could not be read: {reason}
    InvalidDocument { reason: String },

    /// endpoint name '{name}' is used more than once
    DuplicateEndpointName { name: String },

    /// endpoint '{name}' has a non-HTTP url '{url}'
    InvalidUrl { name: String, url: String },

    /// link '{link}' on endpoint '{endpoint}': {reason}
    InvalidLink {
        endpoint: String,
        link: String,
        reason: String,
    },
}

/// Fatal inconsistencies inside a schema transformation.
///
/// These indicate a bug in a transformer callback rather than bad user input.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum TransformError {
    /// transformed schema references unknown type '{name}'
    UnknownTypeReference { name: String },

    /// duplicate field '{field}' in type '{type_name}'
    DuplicateField { type_name: String, field: String },

    /// two types map to the same name '{name}'
    DuplicateTypeName { name: String },

    /// '{name}' is not a valid GraphQL name
    InvalidName { name: String },
}

/// Errors that abort the weaving of the merged schema at boot.
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum WeaveError {
    /// configuration is invalid: {0}
    Config(#[from] ConfigError),

    /// introspection of '{endpoint}' failed: {reason}
    IntrospectionFailure { endpoint: String, reason: String },

    /// could not build schema from introspection result of '{url}': {reason}
    SchemaBuildError { url: String, reason: String },

    /// namespace collision: '{item}' is produced by both '{first}' and '{second}'
    NamespaceCollision {
        item: String,
        first: String,
        second: String,
    },

    /// schema transformation failed: {0}
    Transform(#[from] TransformError),

    /// merged schema failed validation: {reason}
    InvalidMergedSchema { reason: String },
}

/// link '{link}' could not be installed: {reason}
///
/// Recoverable: the link is skipped, other links and endpoints continue. The
/// weaving entry points collect these instead of failing the boot.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
#[ignore_extra_doc_attributes]
pub struct WeavingError {
    /// The `ParentType.field` key of the offending link.
    pub link: String,

    /// Why installation failed.
    pub reason: String,
}

/// Request-scoped errors, surfaced as a single GraphQL error on the
/// originating field's response path.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum RequestError {
    /// field '{field}' must not be aliased to '__typename'
    ReservedFieldAlias { field: String },

    /// service '{service}' omitted '{key}' from its response data
    UpstreamContractViolation { service: String, key: String },

    /// the link key at '{path}' resolved to an error value
    KeyFieldError { path: String },

    /// unknown root field '{field}'
    UnroutedField { field: String },

    /// internal error: {reason}
    Internal { reason: String },
}

impl RequestError {
    pub(crate) fn to_graphql_error(&self, path: Option<Path>) -> graphql::Error {
        let mut error = graphql::Error::new(self.to_string(), self.extension_code());
        error.path = path;
        error
    }

    pub(crate) fn extension_code(&self) -> &'static str {
        match self {
            RequestError::ReservedFieldAlias { .. } => "RESERVED_FIELD_ALIAS",
            RequestError::UpstreamContractViolation { .. } => "UPSTREAM_CONTRACT_VIOLATION",
            RequestError::KeyFieldError { .. } => "KEY_FIELD_ERROR",
            RequestError::UnroutedField { .. } => "UNROUTED_FIELD",
            RequestError::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
