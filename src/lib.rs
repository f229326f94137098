//! Integration test helpers: ephemeral PostgreSQL and Pub/Sub emulator containers plus
//! convenience functions to seed data, publish messages and check expected side effects.
//!
//! ```ignore
//! let test = IntegrationTest::new(IntegrationTestParams {
//!     pubsub: Some(PubSubParams::default()),
//!     ..Default::default()
//! });
//! let tester = test.pubsub.expect("pubsub tester");
//! let container = tester.start().await?;
//! tester.publish_data(&container, br#"{"myKey": "myValue"}"#).await?;
//! tester
//!     .contains_wanted_messages(&container, Duration::from_secs(1), &[br#"{"myKey": "myValue"}"#])
//!     .await?;
//! ```

pub mod collector;
pub mod http;
pub mod pool;
pub mod postgres;
pub mod pubsub;
pub mod settings;
pub mod unordered;

use crate::{
    postgres::{PostgresParams, PostgresTester},
    pubsub::{PubSubParams, PubSubTester},
};
use error_ext::BoxError;
use std::time::Duration;
use testcontainers::TestcontainersError;
use thiserror::Error;
use tokio::task::JoinError;

/// Which testers an [IntegrationTest] should provide.
#[derive(Debug, Clone, Default)]
pub struct IntegrationTestParams {
    /// Bounds starting containers; defaults to [settings::integration_test_timeout].
    pub timeout: Option<Duration>,
    pub pubsub: Option<PubSubParams>,
    pub postgres: Option<PostgresParams>,
}

/// Testers for the services requested via [IntegrationTestParams].
#[derive(Debug, Clone)]
pub struct IntegrationTest {
    pub pubsub: Option<PubSubTester>,
    pub postgres: Option<PostgresTester>,
}

impl IntegrationTest {
    pub fn new(params: IntegrationTestParams) -> Self {
        let timeout = params
            .timeout
            .unwrap_or_else(settings::integration_test_timeout);

        Self {
            pubsub: params
                .pubsub
                .map(|params| PubSubTester::new(params, timeout)),
            postgres: params
                .postgres
                .map(|params| PostgresTester::new(params, timeout)),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Container(String, #[source] TestcontainersError),

    #[error("{0}")]
    Sqlx(String, #[source] sqlx::Error),

    #[error("{0}")]
    PubSub(String, #[source] BoxError),

    #[error("{0}")]
    Http(String, #[source] reqwest::Error),

    #[error(
        "received messages are different than expected:\n received {received:?}\n expected {expected:?}"
    )]
    UnexpectedMessages {
        received: Vec<String>,
        expected: Vec<String>,
    },

    #[error("received rows are different than expected:\n received {received:?}\n expected {expected:?}")]
    UnexpectedRows {
        received: Vec<String>,
        expected: Vec<String>,
    },

    #[error("unexpected status code: expected {expected}, got {received}")]
    UnexpectedStatus { received: u16, expected: u16 },

    #[error("unexpected body: expected {expected:?}, got {received:?}")]
    UnexpectedBody { received: String, expected: String },

    #[error("{0} did not complete within {1:?}")]
    Timeout(String, Duration),

    #[error("receive task failed")]
    Task(#[source] JoinError),
}

#[cfg(test)]
mod tests {
    use crate::{pubsub::PubSubParams, IntegrationTest, IntegrationTestParams};
    use std::time::Duration;

    #[test]
    fn test_new_integration_test() {
        let test = IntegrationTest::new(IntegrationTestParams {
            timeout: Some(Duration::from_secs(5)),
            pubsub: Some(PubSubParams::default()),
            postgres: None,
        });
        assert!(test.postgres.is_none());

        let tester = test.pubsub.expect("pubsub tester");
        assert_eq!(tester.project_id(), "test-project");
        assert!(tester.topic_id().starts_with("test-topic-"));
        assert!(tester.subscription_id().starts_with("test-sub-"));
        assert_eq!(tester.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_new_integration_test_without_params() {
        let test = IntegrationTest::new(IntegrationTestParams::default());
        assert!(test.pubsub.is_none());
        assert!(test.postgres.is_none());
    }
}
