//! Bounded collection of message payloads, compared against an expected multiset.

use crate::{
    unordered::{readable_payloads, unordered_eq_bytes},
    Error,
};
use std::{pin::pin, time::Duration};
use tokio::{sync::mpsc, time::sleep};
use tracing::{debug, instrument};

/// A source of message payloads, e.g. the receiving end of a channel fed by a subscription.
#[trait_variant::make(Send)]
pub trait PayloadSource {
    /// The next payload or `None`, if the source is exhausted.
    async fn next_payload(&mut self) -> Option<Vec<u8>>;
}

impl PayloadSource for mpsc::Receiver<Vec<u8>> {
    async fn next_payload(&mut self) -> Option<Vec<u8>> {
        self.recv().await
    }
}

/// When to stop collecting payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollectPolicy {
    /// Collect until the wait duration has elapsed or the source is exhausted.
    #[default]
    UntilDeadline,

    /// Like [CollectPolicy::UntilDeadline], but stop as soon as as many payloads as expected have
    /// been received. Contents are still compared at the end.
    UntilCountMatches,
}

/// Collect payloads from the given source for at most `wait` and compare them with `expected` as
/// an unordered multiset. Returns the received payloads on success.
#[instrument(skip(source, expected), fields(expected = expected.len()))]
pub async fn collect<S, P>(
    source: &mut S,
    wait: Duration,
    expected: &[P],
    policy: CollectPolicy,
) -> Result<Vec<Vec<u8>>, Error>
where
    S: PayloadSource,
    P: AsRef<[u8]>,
{
    let mut received = Vec::with_capacity(expected.len());
    let mut deadline = pin!(sleep(wait));

    loop {
        // Payloads already delivered win over an elapsed deadline.
        tokio::select! {
            biased;

            payload = source.next_payload() => match payload {
                Some(payload) => {
                    debug!(payload = %String::from_utf8_lossy(&payload), "received payload");
                    received.push(payload);
                    if policy == CollectPolicy::UntilCountMatches && received.len() == expected.len() {
                        debug!("received expected number of payloads");
                        break;
                    }
                }

                None => {
                    debug!(received = received.len(), "payload source exhausted");
                    break;
                }
            },

            _ = &mut deadline => {
                debug!(received = received.len(), "deadline elapsed");
                break;
            }
        }
    }

    debug!(received = received.len(), "collected payloads");

    if unordered_eq_bytes(&received, expected) {
        Ok(received)
    } else {
        Err(Error::UnexpectedMessages {
            received: readable_payloads(&received),
            expected: readable_payloads(expected),
        })
    }
}
