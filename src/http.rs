//! Check that an HTTP endpoint answers a request as expected.

use crate::Error;
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument};

/// A request, the expected response and a timeout for the whole exchange.
#[derive(Debug, Clone)]
pub struct HttpSituation {
    pub request: HttpRequest,
    pub expectation: HttpExpectation,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct HttpExpectation {
    pub status_code: StatusCode,
    pub body: Vec<u8>,
}

impl HttpSituation {
    /// Send the request and compare the response body and status code with the expected ones.
    #[instrument(skip(self), fields(method = %self.request.method, url = %self.request.url))]
    pub async fn check(&self) -> Result<(), Error> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|error| Error::Http("cannot create http client".to_string(), error))?;

        let request = self
            .request
            .headers
            .iter()
            .fold(
                client.request(self.request.method.clone(), &self.request.url),
                |request, (header, value)| request.header(header, value),
            )
            .body(self.request.body.clone());

        let response = request
            .send()
            .await
            .map_err(|error| Error::Http("cannot send request".to_string(), error))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|error| Error::Http("cannot read response body".to_string(), error))?;
        debug!(%status, body = body.len(), "received response");

        if body.as_ref() != self.expectation.body.as_slice() {
            return Err(Error::UnexpectedBody {
                received: String::from_utf8_lossy(&body).into_owned(),
                expected: String::from_utf8_lossy(&self.expectation.body).into_owned(),
            });
        }

        if status != self.expectation.status_code {
            return Err(Error::UnexpectedStatus {
                received: status.as_u16(),
                expected: self.expectation.status_code.as_u16(),
            });
        }

        Ok(())
    }
}
