//! Boot-time weaving: introspect, rename, merge, install links.

use std::sync::Arc;

use apollo_compiler::validation::Valid;
use apollo_compiler::Schema;

use crate::client::Context;
use crate::client::GraphqlClient;
use crate::client::HttpGraphqlClient;
use crate::config::Config;
use crate::config::EndpointConfig;
use crate::error::WeaveError;
use crate::error::WeavingError;
use crate::execution;
use crate::graphql;
use crate::introspection;
use crate::links;
use crate::links::LinkInstaller;
use crate::links::LinkMap;
use crate::merge::merge_schemas;
use crate::merge::EndpointSchema;
use crate::merge::Routes;
use crate::rename::Namespace;
use crate::rename::NamespaceRenamer;
use crate::transform::transform_schema;

/// One upstream an endpoint table is built from: its configuration, its
/// client, and optionally its schema as SDL. Without SDL the endpoint is
/// introspected through the client at boot.
pub struct WeaverEndpoint {
    pub config: EndpointConfig,
    pub sdl: Option<String>,
    pub client: Arc<dyn GraphqlClient>,
}

/// One woven upstream at request time.
pub(crate) struct Endpoint {
    pub(crate) name: String,
    pub(crate) namespace: Namespace,
    pub(crate) client: Arc<dyn GraphqlClient>,
}

/// Everything shared by request executions, immutable after boot.
pub(crate) struct Woven {
    pub(crate) schema: Valid<Schema>,
    pub(crate) routes: Routes,
    pub(crate) links: LinkMap,
    pub(crate) endpoints: Vec<Endpoint>,
}

/// A woven schema over several upstream GraphQL endpoints, ready to execute
/// client operations.
pub struct Weaver {
    woven: Arc<Woven>,
    weaving_errors: Vec<WeavingError>,
}

impl Weaver {
    /// Weave the configured endpoints, introspecting each over HTTP.
    pub async fn weave(config: Config) -> Result<Weaver, WeaveError> {
        config.validate()?;
        let endpoints = config
            .endpoints
            .into_iter()
            .map(|endpoint| {
                let client: Arc<dyn GraphqlClient> = Arc::new(HttpGraphqlClient::new(
                    endpoint.name.clone(),
                    endpoint.url.clone(),
                ));
                WeaverEndpoint {
                    config: endpoint,
                    sdl: None,
                    client,
                }
            })
            .collect();
        Self::weave_endpoints(endpoints).await
    }

    /// Weave endpoints with caller-supplied clients and, optionally, schemas.
    pub async fn weave_endpoints(endpoints: Vec<WeaverEndpoint>) -> Result<Weaver, WeaveError> {
        let config = Config {
            endpoints: endpoints
                .iter()
                .map(|endpoint| endpoint.config.clone())
                .collect(),
        };
        config.validate()?;

        let boot_context = Context::default();
        let mut endpoint_schemas = Vec::with_capacity(endpoints.len());
        let mut table = Vec::with_capacity(endpoints.len());
        for (id, endpoint) in endpoints.iter().enumerate() {
            let url = endpoint.config.url.as_str();
            let schema = match &endpoint.sdl {
                Some(sdl) => Schema::parse(sdl, url).map_err(|e| WeaveError::SchemaBuildError {
                    url: url.to_string(),
                    reason: e.errors.to_string(),
                })?,
                None => {
                    introspection::introspect(endpoint.client.as_ref(), url, &boot_context).await?
                }
            };
            let namespace = Namespace::new(endpoint.config.namespace());
            let renamed = transform_schema(
                &schema,
                &[&NamespaceRenamer {
                    namespace: &namespace,
                }],
            )?;
            tracing::debug!(
                endpoint = endpoint.config.name.as_str(),
                types = renamed.types.len(),
                "endpoint schema renamed"
            );
            endpoint_schemas.push(EndpointSchema {
                id,
                name: endpoint.config.name.clone(),
                namespace: namespace.clone(),
                schema: renamed,
            });
            table.push(Endpoint {
                name: endpoint.config.name.clone(),
                namespace,
                client: Arc::clone(&endpoint.client),
            });
        }

        let (merged, routes) = merge_schemas(&endpoint_schemas)?;

        let namespaces: Vec<Namespace> = table
            .iter()
            .map(|endpoint| endpoint.namespace.clone())
            .collect();
        let mut weaving_errors = Vec::new();
        let mut links = links::resolve_links(
            &config.endpoints,
            &namespaces,
            &merged,
            &routes,
            &mut |error| {
                tracing::warn!(link = error.link.as_str(), "skipping link: {}", error.reason);
                weaving_errors.push(error);
            },
        );

        let installer = LinkInstaller::new(&links);
        let installed = transform_schema(&merged, &[&installer])?;
        let failed = installer.take_errors();
        for (key, error) in failed {
            tracing::warn!(link = error.link.as_str(), "link not installed: {}", error.reason);
            links.remove(&key);
            weaving_errors.push(error);
        }

        let schema = installed
            .validate()
            .map_err(|e| WeaveError::InvalidMergedSchema {
                reason: e.errors.to_string(),
            })?;
        tracing::info!(
            endpoints = table.len(),
            types = schema.types.len(),
            "woven schema ready"
        );

        Ok(Weaver {
            woven: Arc::new(Woven {
                schema,
                routes,
                links,
                endpoints: table,
            }),
            weaving_errors,
        })
    }

    /// The merged schema.
    pub fn schema(&self) -> &Valid<Schema> {
        &self.woven.schema
    }

    /// The merged schema as SDL.
    pub fn sdl(&self) -> String {
        self.woven.schema.to_string()
    }

    /// Links that could not be installed at boot. The rest of the schema
    /// works without them.
    pub fn weaving_errors(&self) -> &[WeavingError] {
        &self.weaving_errors
    }

    /// Execute one client operation against the woven schema.
    pub async fn execute(
        &self,
        request: graphql::Request,
        context: &Context,
    ) -> graphql::Response {
        execution::execute(&self.woven, request, context).await
    }
}
