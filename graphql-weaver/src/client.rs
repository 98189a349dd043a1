//! Upstream GraphQL clients.

use async_trait::async_trait;
use tracing::Instrument;
use url::Url;

use crate::error::FetchError;
use crate::graphql;
use crate::json_ext::Object;

/// Opaque per-request context, forwarded unchanged into every sub-query.
///
/// The weaver never inspects it; clients may use the headers for
/// authentication forwarding and the extensions for anything else.
#[derive(Clone, Debug, Default)]
pub struct Context {
    /// Headers to forward to upstream endpoints.
    pub headers: Vec<(String, String)>,

    /// Arbitrary request-scoped data.
    pub extensions: Object,
}

/// A client executing GraphQL requests against one upstream endpoint.
#[async_trait]
pub trait GraphqlClient: Send + Sync {
    /// The endpoint name, used in error messages.
    fn service(&self) -> &str;

    async fn request(
        &self,
        request: graphql::Request,
        context: &Context,
    ) -> Result<graphql::Response, FetchError>;
}

/// A [`GraphqlClient`] over HTTP.
#[derive(Debug)]
pub struct HttpGraphqlClient {
    service: String,
    url: Url,
    http_client: reqwest::Client,
}

impl HttpGraphqlClient {
    /// Construct a new client that will POST to the supplied URL.
    pub fn new(service: impl Into<String>, url: Url) -> Self {
        HttpGraphqlClient {
            service: service.into(),
            url,
            http_client: reqwest::Client::builder()
                .tcp_keepalive(Some(std::time::Duration::from_secs(5)))
                .build()
                .expect("default reqwest client"),
        }
    }

    async fn send_request(
        &self,
        request: graphql::Request,
        context: &Context,
    ) -> Result<bytes::Bytes, FetchError> {
        let mut builder = self
            .http_client
            .post(self.url.clone())
            .header("Accept", "application/json, text/plain, */*")
            .json(&request);
        for (name, value) in &context.headers {
            builder = builder.header(name, value);
        }

        let response = builder
            .send()
            .instrument(tracing::trace_span!("subquery_request"))
            .await
            .map_err(|err| {
                tracing::error!(fetch_error = err.to_string().as_str());

                FetchError::SubrequestHttpError {
                    status_code: err.status().map(|status| status.as_u16()),
                    service: self.service.clone(),
                    reason: err.to_string(),
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::SubrequestHttpError {
                status_code: Some(status.as_u16()),
                service: self.service.clone(),
                reason: format!("unexpected HTTP status {status}"),
            });
        }

        response.bytes().await.map_err(|err| {
            tracing::error!(fetch_error = err.to_string().as_str());

            FetchError::SubrequestHttpError {
                status_code: None,
                service: self.service.clone(),
                reason: err.to_string(),
            }
        })
    }
}

#[async_trait]
impl GraphqlClient for HttpGraphqlClient {
    fn service(&self) -> &str {
        &self.service
    }

    async fn request(
        &self,
        request: graphql::Request,
        context: &Context,
    ) -> Result<graphql::Response, FetchError> {
        let body = self.send_request(request, context).await?;
        tracing::debug_span!("parse_subquery_response").in_scope(|| {
            serde_json::from_slice::<graphql::Response>(&body).map_err(|error| {
                FetchError::SubrequestMalformedResponse {
                    service: self.service.clone(),
                    reason: error.to_string(),
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::body_partial_json;
    use wiremock::matchers::method;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;

    use super::*;

    #[tokio::test]
    async fn posts_the_request_and_parses_the_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"query": "{ hello }"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"hello": "world"}})),
            )
            .mount(&server)
            .await;

        let client =
            HttpGraphqlClient::new("a", Url::parse(&format!("{}/graphql", server.uri())).unwrap());
        let response = client
            .request(graphql::Request::new("{ hello }"), &Context::default())
            .await
            .unwrap();
        assert_eq!(response.data, Some(json!({"hello": "world"})));
        assert!(response.errors.is_empty());
    }

    #[tokio::test]
    async fn non_2xx_statuses_are_fetch_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = HttpGraphqlClient::new("a", Url::parse(&server.uri()).unwrap());
        let error = client
            .request(graphql::Request::new("{ hello }"), &Context::default())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            FetchError::SubrequestHttpError {
                status_code: Some(500),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn non_json_bodies_are_malformed_responses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = HttpGraphqlClient::new("a", Url::parse(&server.uri()).unwrap());
        let error = client
            .request(graphql::Request::new("{ hello }"), &Context::default())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            FetchError::SubrequestMalformedResponse { .. }
        ));
    }
}
