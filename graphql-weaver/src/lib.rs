//! Weave several upstream GraphQL endpoints into a single schema.
//!
//! At boot every configured endpoint is introspected, its type names are
//! prefixed with the endpoint's namespace, and the prefixed schemas are
//! merged under one root. At request time an incoming operation is split
//! per root field into sub-queries against the originating upstreams, and
//! the responses are stitched back together with error paths rewritten into
//! the outer response's coordinate system.
//!
//! A second mechanism, links, declares a scalar field of one endpoint as a
//! foreign key into a field of another; the weaver turns such links into
//! additional sub-queries that are batched and joined transparently.
//!
//! ```no_run
//! use graphql_weaver::{Config, Context, Weaver, graphql};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config: Config = std::fs::read_to_string("weaver.yaml")?.parse()?;
//! let weaver = Weaver::weave(config).await?;
//! let response = weaver
//!     .execute(graphql::Request::new("{ A_hello }"), &Context::default())
//!     .await;
//! # Ok(())
//! # }
//! ```

mod ast;
pub mod client;
pub mod config;
pub mod error;
mod execution;
pub mod graphql;
pub mod introspection;
pub mod json_ext;
mod links;
mod merge;
pub mod rename;
pub mod testing;
pub mod transform;
mod weaver;

pub use client::Context;
pub use client::GraphqlClient;
pub use client::HttpGraphqlClient;
pub use config::Config;
pub use config::EndpointConfig;
pub use config::LinkConfig;
pub use error::ConfigError;
pub use error::FetchError;
pub use error::RequestError;
pub use error::TransformError;
pub use error::WeaveError;
pub use error::WeavingError;
pub use json_ext::Path;
pub use json_ext::PathElement;
pub use weaver::Weaver;
pub use weaver::WeaverEndpoint;
