//! Test doubles for upstream endpoints.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::Context;
use crate::client::GraphqlClient;
use crate::error::FetchError;
use crate::graphql;

type Handler =
    Box<dyn Fn(&graphql::Request) -> Result<graphql::Response, FetchError> + Send + Sync>;

/// A [`GraphqlClient`] answering from a closure and recording every request
/// it receives.
pub struct MockClient {
    service: String,
    handler: Handler,
    requests: Mutex<Vec<graphql::Request>>,
}

impl MockClient {
    pub fn new(
        service: impl Into<String>,
        handler: impl Fn(&graphql::Request) -> graphql::Response + Send + Sync + 'static,
    ) -> Self {
        MockClient {
            service: service.into(),
            handler: Box::new(move |request| Ok(handler(request))),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(service: impl Into<String>, error: FetchError) -> Self {
        MockClient {
            service: service.into(),
            handler: Box::new(move |_| Err(error.clone())),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<graphql::Request> {
        self.requests
            .lock()
            .expect("mock client lock poisoned")
            .clone()
    }
}

#[async_trait]
impl GraphqlClient for MockClient {
    fn service(&self) -> &str {
        &self.service
    }

    async fn request(
        &self,
        request: graphql::Request,
        _context: &Context,
    ) -> Result<graphql::Response, FetchError> {
        let response = (self.handler)(&request);
        self.requests
            .lock()
            .expect("mock client lock poisoned")
            .push(request);
        response
    }
}
