use std::{
    collections::BTreeSet,
    fmt,
    marker::PhantomData,
    str::FromStr,
};
use thiserror::Error;
use tokio::sync::mpsc;

/// Event topic emitted by the arena contract whenever a score is submitted
/// (the NFT transfer minted alongside the score).
pub const SCORE_SUBMITTED_TOPIC: Topic = Topic::new([
    0xdd, 0xf2, 0x52, 0xad, 0x1b, 0xe2, 0xc8, 0x9b, 0x69, 0xc2, 0xb0, 0x68, 0xfc, 0x37,
    0x8d, 0xaa, 0x95, 0x2b, 0xa7, 0xf1, 0x63, 0xc4, 0xa1, 0x16, 0x28, 0xf5, 0x5a, 0x4d,
    0xf5, 0x23, 0xb3, 0xef,
]);

/// Selector of the `getLeaderboard()` read call.
pub const GET_LEADERBOARD_SELECTOR: Selector = Selector::new([0x8b, 0x6e, 0x6b, 0x6f]);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First six and last four characters joined by an ellipsis, e.g.
    /// `0x1234...cdef`. Short identifiers are returned untouched.
    pub fn abbreviated(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 10 {
            return self.0.clone();
        }
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Topic([u8; 32]);

impl Topic {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Selector([u8; 4]);

impl Selector {
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }
}

fn parse_fixed_hex<const N: usize>(raw: &str) -> Result<[u8; N], hex::FromHexError> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let mut out = [0u8; N];
    hex::decode_to_slice(digits, &mut out)?;
    Ok(out)
}

impl FromStr for Topic {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed_hex(s).map(Self)
    }
}

impl FromStr for Selector {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed_hex(s).map(Self)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// A read evaluated by the endpoint alongside each push, so the pushed
/// payload carries fresh contract state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadCall {
    pub to: Address,
    pub selector: Selector,
}

/// What to listen to. Built up front and moved into the manager on `open`,
/// after which nobody can change it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionRequest {
    source_addresses: BTreeSet<Address>,
    topic_filters: Vec<Topic>,
    auxiliary_reads: Vec<ReadCall>,
    only_push_changes: bool,
}

impl SubscriptionRequest {
    pub fn new() -> Self {
        Self {
            source_addresses: BTreeSet::new(),
            topic_filters: Vec::new(),
            auxiliary_reads: Vec::new(),
            only_push_changes: true,
        }
    }

    /// Score submissions on `contract`, with the full leaderboard read
    /// attached to every push.
    pub fn leaderboard(contract: Address) -> Self {
        Self::new()
            .with_source(contract.clone())
            .with_topic(SCORE_SUBMITTED_TOPIC)
            .with_read(ReadCall {
                to: contract,
                selector: GET_LEADERBOARD_SELECTOR,
            })
    }

    pub fn with_source(mut self, address: Address) -> Self {
        self.source_addresses.insert(address);
        self
    }

    pub fn with_topic(mut self, topic: Topic) -> Self {
        self.topic_filters.push(topic);
        self
    }

    pub fn with_read(mut self, read: ReadCall) -> Self {
        self.auxiliary_reads.push(read);
        self
    }

    pub fn with_only_push_changes(mut self, only_push_changes: bool) -> Self {
        self.only_push_changes = only_push_changes;
        self
    }

    pub fn source_addresses(&self) -> &BTreeSet<Address> {
        &self.source_addresses
    }

    pub fn topic_filters(&self) -> &[Topic] {
        &self.topic_filters
    }

    pub fn auxiliary_reads(&self) -> &[ReadCall] {
        &self.auxiliary_reads
    }

    pub fn only_push_changes(&self) -> bool {
        self.only_push_changes
    }

    pub fn is_empty(&self) -> bool {
        self.source_addresses.is_empty()
            && self.topic_filters.is_empty()
            && self.auxiliary_reads.is_empty()
    }
}

impl Default for SubscriptionRequest {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("endpoint rejected the subscription: {0}")]
    Rejected(String),
    #[error("stream transport failed: {0}")]
    Transport(String),
    #[error("undecodable stream payload: {0}")]
    Decode(String),
    #[error("stream already closed")]
    Closed,
}

#[derive(Debug)]
pub enum Delivery<R> {
    Data(R),
    Error(StreamError),
}

/// Sink an endpoint pushes into. Everything it receives goes through the
/// manager, which decides whether the owner still wants it.
pub struct StreamHandlers<R> {
    tx: mpsc::UnboundedSender<Delivery<R>>,
}

impl<R> StreamHandlers<R> {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Delivery<R>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns `false` once the subscription has been released and nothing
    /// is listening anymore.
    pub fn on_data(&self, record: R) -> bool {
        self.tx.send(Delivery::Data(record)).is_ok()
    }

    pub fn on_error(&self, err: StreamError) -> bool {
        self.tx.send(Delivery::Error(err)).is_ok()
    }

    pub fn is_released(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<R> Clone for StreamHandlers<R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

pub trait StreamEndpoint: Send + Sync + 'static {
    type Record: Send + 'static;
    type Subscription: Subscription;

    /// Register `request`. `Ok(None)` means the endpoint accepted the call but
    /// produced nothing to listen to, which callers treat like a rejection.
    ///
    /// The manager always drives this future to completion, even after the
    /// owner closed, and unsubscribes whatever it returns.
    fn subscribe(
        &self,
        request: &SubscriptionRequest,
        handlers: StreamHandlers<Self::Record>,
    ) -> impl Future<Output = Result<Option<Self::Subscription>, StreamError>> + Send;
}

pub trait Subscription: Send + 'static {
    fn unsubscribe(self) -> impl Future<Output = Result<(), StreamError>> + Send;
}

/// Subscription type of endpoints that never hand one out.
#[derive(Debug)]
pub enum NoSubscription {}

impl Subscription for NoSubscription {
    async fn unsubscribe(self) -> Result<(), StreamError> {
        match self {}
    }
}

/// Endpoint used when no push transport is configured; every subscribe is
/// rejected, so views run on polling alone.
pub struct UnavailableEndpoint<R> {
    reason: String,
    _record: PhantomData<fn() -> R>,
}

impl<R> UnavailableEndpoint<R> {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            _record: PhantomData,
        }
    }
}

impl<R: Send + 'static> StreamEndpoint for UnavailableEndpoint<R> {
    type Record = R;
    type Subscription = NoSubscription;

    async fn subscribe(
        &self,
        _request: &SubscriptionRequest,
        _handlers: StreamHandlers<R>,
    ) -> Result<Option<NoSubscription>, StreamError> {
        Err(StreamError::Rejected(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn score_submitted_topic__displays_as_prefixed_hex() {
        assert_eq!(
            SCORE_SUBMITTED_TOPIC.to_string(),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
        assert_eq!(GET_LEADERBOARD_SELECTOR.to_string(), "0x8b6e6b6f");
    }

    #[test]
    fn topic_from_str__accepts_with_and_without_prefix() {
        // given
        let with_prefix =
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
        let without_prefix = with_prefix.trim_start_matches("0x");

        // when
        let a: Topic = with_prefix.parse().unwrap();
        let b: Topic = without_prefix.parse().unwrap();

        // then
        assert_eq!(a, SCORE_SUBMITTED_TOPIC);
        assert_eq!(b, SCORE_SUBMITTED_TOPIC);
    }

    #[test]
    fn selector_from_str__rejects_wrong_length() {
        assert!("0x8b6e6b".parse::<Selector>().is_err());
        assert!("0x8b6e6b6f00".parse::<Selector>().is_err());
        assert_eq!(
            "0x8b6e6b6f".parse::<Selector>().unwrap(),
            GET_LEADERBOARD_SELECTOR
        );
    }

    #[test]
    fn abbreviated__keeps_first_six_and_last_four() {
        let address = Address::new("0x1234567890abcdef1234567890abcdef12345678");
        assert_eq!(address.abbreviated(), "0x1234...5678");
    }

    #[test]
    fn abbreviated__short_identifier_is_unchanged() {
        assert_eq!(Address::new("0xabc").abbreviated(), "0xabc");
        assert_eq!(Address::new("0123456789").abbreviated(), "0123456789");
    }

    #[test]
    fn leaderboard_request__targets_contract_topic_and_read() {
        // given
        let contract = Address::new("0xcontract");

        // when
        let request = SubscriptionRequest::leaderboard(contract.clone());

        // then
        assert!(request.source_addresses().contains(&contract));
        assert_eq!(request.topic_filters(), &[SCORE_SUBMITTED_TOPIC]);
        assert_eq!(
            request.auxiliary_reads(),
            &[ReadCall {
                to: contract,
                selector: GET_LEADERBOARD_SELECTOR,
            }]
        );
        assert!(request.only_push_changes());
        assert!(!request.is_empty());
    }

    #[test]
    fn stream_handlers__report_release_once_receiver_dropped() {
        // given
        let (handlers, rx) = StreamHandlers::<u32>::channel();
        assert!(handlers.on_data(1));

        // when
        drop(rx);

        // then
        assert!(handlers.is_released());
        assert!(!handlers.on_data(2));
        assert!(!handlers.on_error(StreamError::Closed));
    }
}
