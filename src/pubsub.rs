//! Ephemeral Google Cloud Pub/Sub emulator container plus publish and receive-and-check helpers.

use crate::{
    collector::{collect, CollectPolicy},
    Error,
};
use error_ext::StdErrorExt;
use google_cloud_gax::{
    conn::Environment,
    grpc::{Code, Status},
};
use google_cloud_googleapis::pubsub::v1::PubsubMessage;
use google_cloud_pubsub::{
    client::{Client, ClientConfig},
    subscription::{Subscription, SubscriptionConfig},
    topic::Topic,
};
use std::{collections::BTreeMap, env, time::Duration};
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use tokio::{sync::mpsc, task, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Redirects Pub/Sub clients to an emulator instead of Google Cloud.
pub const EMULATOR_HOST_ENV_VAR: &str = "PUBSUB_EMULATOR_HOST";

pub const PUBSUB_IMAGE: &str = "thekevjames/gcloud-pubsub-emulator";
pub const PUBSUB_TAG: &str = "latest";

const PUBSUB_PORT: u16 = 8681;
const LIVENESS_PORT: u16 = 8682;
const PROJECT_ENV_VAR: &str = "PUBSUB_PROJECT1";
const READY_MESSAGE: &str = "Server started, listening on";

// Capacity of the channel between the receive callback and the collector.
const PAYLOAD_BUFFER: usize = 64;

/// Topic IDs mapped to the IDs of their subscriptions.
pub type TopicMap = BTreeMap<String, Vec<String>>;

/// A running Pub/Sub emulator container. Dropping it removes the container.
#[derive(Debug)]
pub struct PubSubContainer {
    container: ContainerAsync<GenericImage>,
    project_id: String,
    emulator_host: String,
}

impl PubSubContainer {
    /// Start a new emulator container for the given project, with the given topics and
    /// subscriptions provisioned.
    #[instrument]
    pub async fn start(project_id: &str, topic_map: &TopicMap) -> Result<Self, Error> {
        let container = GenericImage::new(PUBSUB_IMAGE, PUBSUB_TAG)
            .with_exposed_port(PUBSUB_PORT.tcp())
            .with_exposed_port(LIVENESS_PORT.tcp())
            .with_wait_for(WaitFor::message_on_stderr(READY_MESSAGE))
            .with_env_var(PROJECT_ENV_VAR, serialize_topic_map(project_id, topic_map))
            .start()
            .await
            .map_err(|error| Error::Container("cannot start pubsub container".to_string(), error))?;

        let host = container
            .get_host()
            .await
            .map_err(|error| Error::Container("cannot get pubsub host".to_string(), error))?;
        let port = container
            .get_host_port_ipv4(PUBSUB_PORT.tcp())
            .await
            .map_err(|error| Error::Container("cannot map pubsub port".to_string(), error))?;
        let emulator_host = format!("{host}:{port}");
        info!(emulator_host, "started pubsub container");

        let pubsub_container = Self {
            container,
            project_id: project_id.to_string(),
            emulator_host,
        };

        // The image provisions the topic map itself, but possibly only after the server has
        // started, hence make sure it is complete before handing out the container.
        let client = pubsub_container.client().await?;
        for (topic_id, subscription_ids) in topic_map {
            get_or_create_topic(&client, topic_id).await?;
            for subscription_id in subscription_ids {
                get_or_create_subscription(&client, subscription_id, topic_id).await?;
            }
        }

        Ok(pubsub_container)
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// The `host:port` of the emulator's gRPC endpoint.
    pub fn emulator_host(&self) -> &str {
        &self.emulator_host
    }

    /// Create a new [Client] connected to this emulator.
    pub async fn client(&self) -> Result<Client, Error> {
        let config = ClientConfig {
            project_id: Some(self.project_id.clone()),
            environment: Environment::Emulator(self.emulator_host.clone()),
            ..ClientConfig::default()
        };

        Client::new(config)
            .await
            .map_err(|error| Error::PubSub("cannot create pubsub client".to_string(), error.into()))
    }

    /// Set [EMULATOR_HOST_ENV_VAR] for this process, so that code creating its own clients via
    /// `ClientConfig::default()` talks to this emulator.
    pub fn export_emulator_host(&self) {
        env::set_var(EMULATOR_HOST_ENV_VAR, &self.emulator_host);
        debug!(emulator_host = self.emulator_host, "exported emulator host");
    }

    /// Stop and remove this container.
    pub async fn terminate(self) -> Result<(), Error> {
        self.container
            .rm()
            .await
            .map_err(|error| Error::Container("cannot remove pubsub container".to_string(), error))
    }
}

/// Serialize the given project and topic map into the emulator image's format:
/// `PROJECT,TOPIC1:SUBSCRIPTION1:SUBSCRIPTION2,TOPIC2`.
fn serialize_topic_map(project_id: &str, topic_map: &TopicMap) -> String {
    let mut serialized = project_id.to_string();

    for (topic_id, subscription_ids) in topic_map {
        serialized.push(',');
        serialized.push_str(topic_id);
        for subscription_id in subscription_ids {
            serialized.push(':');
            serialized.push_str(subscription_id);
        }
    }

    serialized
}

/// Get the topic with the given ID, creating it if it does not yet exist.
#[instrument(skip(client))]
pub async fn get_or_create_topic(client: &Client, topic_id: &str) -> Result<Topic, Error> {
    let topic = client.topic(topic_id);

    let exists = topic.exists(None).await.map_err(|error| {
        Error::PubSub(format!("cannot check whether topic {topic_id} exists"), error.into())
    })?;
    if exists {
        return Ok(topic);
    }

    match client.create_topic(topic_id, None, None).await {
        Ok(topic) => {
            debug!(topic_id, "created topic");
            Ok(topic)
        }

        Err(status) if status.code() == Code::AlreadyExists => Ok(topic),

        Err(error) => Err(Error::PubSub(
            format!("cannot create topic {topic_id}"),
            error.into(),
        )),
    }
}

/// Get the subscription with the given ID, creating it for the given topic if it does not yet
/// exist.
#[instrument(skip(client))]
pub async fn get_or_create_subscription(
    client: &Client,
    subscription_id: &str,
    topic_id: &str,
) -> Result<Subscription, Error> {
    let subscription = client.subscription(subscription_id);

    let exists = subscription.exists(None).await.map_err(|error| {
        Error::PubSub(
            format!("cannot check whether subscription {subscription_id} exists"),
            error.into(),
        )
    })?;
    if exists {
        return Ok(subscription);
    }

    match client
        .create_subscription(subscription_id, topic_id, SubscriptionConfig::default(), None)
        .await
    {
        Ok(subscription) => {
            debug!(subscription_id, topic_id, "created subscription");
            Ok(subscription)
        }

        Err(status) if status.code() == Code::AlreadyExists => Ok(subscription),

        Err(error) => Err(Error::PubSub(
            format!("cannot create subscription {subscription_id}"),
            error.into(),
        )),
    }
}

/// Publish the given payload to the given topic, creating the topic if needed. Returns the
/// server assigned message ID.
#[instrument(skip(client, payload))]
pub async fn publish(client: &Client, topic_id: &str, payload: &[u8]) -> Result<String, Error> {
    let topic = get_or_create_topic(client, topic_id).await?;
    let mut publisher = topic.new_publisher(None);

    let message = PubsubMessage {
        data: payload.to_vec(),
        ..Default::default()
    };
    let result = publisher.publish(message).await.get().await;
    publisher.shutdown().await;

    let message_id = result.map_err(|error| {
        Error::PubSub(format!("cannot publish to topic {topic_id}"), error.into())
    })?;
    debug!(topic_id, message_id, "published message");

    Ok(message_id)
}

/// Receive messages from the given subscription for at most `wait`, acknowledging each, and
/// compare their payloads with `expected` as an unordered multiset.
#[instrument(skip(client, expected))]
pub async fn check_messages_in_subscription<P>(
    client: &Client,
    subscription_id: &str,
    expected: &[P],
    wait: Duration,
    policy: CollectPolicy,
) -> Result<(), Error>
where
    P: AsRef<[u8]>,
{
    let subscription = client.subscription(subscription_id);

    // Receiving from an unknown subscription would only surface as missing messages.
    let exists = subscription.exists(None).await.map_err(|error| {
        Error::PubSub(
            format!("cannot check whether subscription {subscription_id} exists"),
            error.into(),
        )
    })?;
    if !exists {
        return Err(Error::PubSub(
            format!("cannot receive messages from subscription {subscription_id}"),
            Status::not_found(format!("subscription {subscription_id} does not exist")).into(),
        ));
    }

    let (payload_in, mut payload_out) = mpsc::channel::<Vec<u8>>(PAYLOAD_BUFFER);
    let cancel = CancellationToken::new();

    // The callback may be invoked concurrently; the channel serializes the payloads.
    let receiving = task::spawn({
        let cancel = cancel.clone();
        async move {
            subscription
                .receive(
                    move |message, _| {
                        let payload_in = payload_in.clone();
                        async move {
                            let payload = message.message.data.clone();
                            if payload_in.send(payload).await.is_err() {
                                debug!("collector gone, message will be acknowledged anyway");
                            }
                            if let Err(error) = message.ack().await {
                                warn!(error = error.as_chain(), "cannot acknowledge message");
                            }
                        }
                    },
                    cancel,
                    None,
                )
                .await
        }
    });

    let collected = collect(&mut payload_out, wait, expected, policy).await;
    cancel.cancel();
    drop(payload_out);

    receiving
        .await
        .map_err(Error::Task)?
        .map_err(|error| Error::PubSub("cannot receive messages".to_string(), error.into()))?;

    let received = collected?;
    debug!(received = received.len(), "received expected messages");

    Ok(())
}

/// Parameters for a [PubSubTester]; missing IDs are generated.
#[derive(Debug, Clone, Default)]
pub struct PubSubParams {
    pub project_id: Option<String>,
    pub topic_id: Option<String>,
    pub subscription_id: Option<String>,
}

/// Convenience for tests against a Pub/Sub emulator with a single topic and subscription.
#[derive(Debug, Clone)]
pub struct PubSubTester {
    project_id: String,
    topic_id: String,
    subscription_id: String,
    timeout: Duration,
}

impl PubSubTester {
    /// Create a new [PubSubTester]; `timeout` bounds starting the container.
    pub fn new(params: PubSubParams, timeout: Duration) -> Self {
        Self {
            project_id: params
                .project_id
                .unwrap_or_else(|| "test-project".to_string()),
            topic_id: params
                .topic_id
                .unwrap_or_else(|| format!("test-topic-{}", Uuid::new_v4())),
            subscription_id: params
                .subscription_id
                .unwrap_or_else(|| format!("test-sub-{}", Uuid::new_v4())),
            timeout,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn topic_id(&self) -> &str {
        &self.topic_id
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start a [PubSubContainer] with this tester's topic and subscription; the caller owns it.
    pub async fn start(&self) -> Result<PubSubContainer, Error> {
        let topic_map = TopicMap::from([(
            self.topic_id.clone(),
            vec![self.subscription_id.clone()],
        )]);

        time::timeout(
            self.timeout,
            PubSubContainer::start(&self.project_id, &topic_map),
        )
        .await
        .map_err(|_| Error::Timeout("starting pubsub container".to_string(), self.timeout))?
    }

    /// Publish the given payload to this tester's topic.
    pub async fn publish_data(
        &self,
        container: &PubSubContainer,
        payload: &[u8],
    ) -> Result<String, Error> {
        let client = container.client().await?;
        publish(&client, &self.topic_id, payload).await
    }

    /// Check that exactly the expected payloads, in any order, arrive on this tester's
    /// subscription within `wait`.
    pub async fn contains_wanted_messages<P>(
        &self,
        container: &PubSubContainer,
        wait: Duration,
        expected: &[P],
    ) -> Result<(), Error>
    where
        P: AsRef<[u8]>,
    {
        let client = container.client().await?;
        check_messages_in_subscription(
            &client,
            &self.subscription_id,
            expected,
            wait,
            CollectPolicy::UntilDeadline,
        )
        .await
    }
}
