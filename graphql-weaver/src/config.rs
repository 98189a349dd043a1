//! Weaver configuration.

use std::collections::HashMap;
use std::collections::HashSet;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use url::Url;

use crate::error::ConfigError;

/// Configuration for the weaver: the set of upstream endpoints to federate.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The upstream endpoints, in merge order.
    pub endpoints: Vec<EndpointConfig>,
}

/// One upstream GraphQL endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    /// Unique endpoint name.
    pub name: String,

    /// Absolute HTTP or HTTPS URL of the endpoint.
    pub url: Url,

    /// Prefix for all type names and root fields of this endpoint.
    ///
    /// Defaults to the endpoint name. The empty string is permitted for a
    /// single pass-through endpoint whose names are left untouched.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub namespace: Option<String>,

    /// Links from scalar fields of this endpoint into fields of other
    /// endpoints, keyed by `ParentType.field`.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub links: HashMap<String, LinkConfig>,
}

impl EndpointConfig {
    /// The effective namespace: the configured one, or the endpoint name.
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(&self.name)
    }
}

/// Declares that a scalar field holds a key resolvable against a field of
/// another endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct LinkConfig {
    /// Dotted path from the merged query root to the target field, e.g.
    /// `B_countryByCode` or `B_countries.byCode`.
    pub field: String,

    /// Dotted path naming the target argument that receives the key, with an
    /// optional nested filter field, e.g. `code` or `filter.code_in`.
    pub argument: String,

    /// Collect the keys of a whole parent list and issue one sub-query.
    #[serde(default)]
    pub batch_mode: bool,

    /// Field on the fetched object holding the linking key.
    ///
    /// Required in batch mode when the upstream does not preserve input
    /// order. Without it, batched results are matched back by position and
    /// the upstream must return them in input-key order.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key_field: Option<String>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for endpoint in &self.endpoints {
            if !names.insert(endpoint.name.as_str()) {
                return Err(ConfigError::DuplicateEndpointName {
                    name: endpoint.name.clone(),
                });
            }
            if !matches!(endpoint.url.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidUrl {
                    name: endpoint.name.clone(),
                    url: endpoint.url.to_string(),
                });
            }
            for (link, config) in &endpoint.links {
                config
                    .validate(link)
                    .map_err(|reason| ConfigError::InvalidLink {
                        endpoint: endpoint.name.clone(),
                        link: link.clone(),
                        reason,
                    })?;
            }
        }
        Ok(())
    }
}

impl LinkConfig {
    fn validate(&self, link: &str) -> Result<(), String> {
        let (parent, field) = parse_link_key(link).ok_or_else(|| {
            "link keys must have the form `ParentType.field`".to_string()
        })?;
        if !is_graphql_name(parent) || !is_graphql_name(field) {
            return Err("link keys must have the form `ParentType.field`".to_string());
        }
        let field_path = parse_dotted_path(&self.field)
            .ok_or_else(|| format!("'{}' is not a valid field path", self.field))?;
        if field_path.is_empty() {
            return Err("the target field path must not be empty".to_string());
        }
        let argument_path = parse_dotted_path(&self.argument)
            .ok_or_else(|| format!("'{}' is not a valid argument path", self.argument))?;
        match argument_path.len() {
            1 | 2 => {}
            0 => return Err("the argument path must not be empty".to_string()),
            _ => {
                return Err(
                    "the argument path must name an argument and at most one nested filter field"
                        .to_string(),
                )
            }
        }
        if self.key_field.is_some() && !self.batch_mode {
            return Err("keyField only applies to batchMode links".to_string());
        }
        if let Some(key_field) = &self.key_field {
            if !is_graphql_name(key_field) {
                return Err(format!("'{key_field}' is not a valid field name"));
            }
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config =
            serde_yaml::from_str(s).map_err(|e| ConfigError::InvalidDocument {
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }
}

/// Splits a `ParentType.field` link key.
pub(crate) fn parse_link_key(link: &str) -> Option<(&str, &str)> {
    link.split_once('.')
}

/// Splits a dotted path into segments, requiring every segment to be a valid
/// GraphQL name.
pub(crate) fn parse_dotted_path(path: &str) -> Option<Vec<&str>> {
    let segments: Vec<&str> = path.split('.').collect();
    segments
        .iter()
        .all(|segment| is_graphql_name(segment))
        .then_some(segments)
}

pub(crate) fn is_graphql_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
