use crate::leaderboard_client::{
    ScoreRowDto,
    rows_into_entries,
};
use futures::{
    SinkExt,
    StreamExt,
    stream::SplitSink,
};
use live_sync::{
    StreamEndpoint,
    StreamError,
    StreamHandlers,
    Subscription,
    SubscriptionRequest,
    UnavailableEndpoint,
    leaderboard::ScoreBatch,
};
use serde::Deserialize;
use serde_json::{
    Value,
    json,
};
use tokio::{
    net::TcpStream,
    task::JoinHandle,
};
use tokio_tungstenite::{
    MaybeTlsStream,
    WebSocketStream,
    connect_async,
    tungstenite::protocol::Message,
};
use tracing::{
    debug,
    info,
    warn,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn subscribe_frame(request: &SubscriptionRequest) -> Value {
    let sources: Vec<String> = request
        .source_addresses()
        .iter()
        .map(|address| address.to_string())
        .collect();
    let topics: Vec<String> = request
        .topic_filters()
        .iter()
        .map(|topic| topic.to_string())
        .collect();
    let calls: Vec<Value> = request
        .auxiliary_reads()
        .iter()
        .map(|read| json!({ "to": read.to.as_str(), "data": read.selector.to_string() }))
        .collect();
    json!({
        "type": "subscribe",
        "eventContractSources": sources,
        "topicOverrides": topics,
        "ethCalls": calls,
        "onlyPushChanges": request.only_push_changes(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ServerFrame {
    Data { rows: Vec<ScoreRowDto> },
    Error { message: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, PartialEq)]
pub enum Inbound {
    Data(ScoreBatch),
    Error(StreamError),
    Ignored,
}

pub fn decode_frame(text: &str) -> Inbound {
    match serde_json::from_str::<ServerFrame>(text) {
        Ok(ServerFrame::Data { rows }) => match rows_into_entries(rows) {
            Ok(batch) => Inbound::Data(batch),
            Err(err) => Inbound::Error(StreamError::Decode(format!("{err:#}"))),
        },
        Ok(ServerFrame::Error { message }) => {
            Inbound::Error(StreamError::Transport(message))
        }
        Ok(ServerFrame::Other) => Inbound::Ignored,
        Err(err) => Inbound::Error(StreamError::Decode(err.to_string())),
    }
}

/// Push endpoint speaking JSON over a WebSocket.
#[derive(Clone, Debug)]
pub struct WsStreamEndpoint {
    url: String,
}

impl WsStreamEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl StreamEndpoint for WsStreamEndpoint {
    type Record = ScoreBatch;
    type Subscription = WsSubscription;

    async fn subscribe(
        &self,
        request: &SubscriptionRequest,
        handlers: StreamHandlers<ScoreBatch>,
    ) -> Result<Option<WsSubscription>, StreamError> {
        let (socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        let (mut writer, mut reader) = socket.split();
        writer
            .send(Message::Text(subscribe_frame(request).to_string().into()))
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        info!(url = %self.url, "stream subscription sent");

        let reader_task = tokio::spawn(async move {
            while let Some(message) = reader.next().await {
                let listening = match message {
                    Ok(Message::Text(text)) => match decode_frame(text.as_str()) {
                        Inbound::Data(batch) => handlers.on_data(batch),
                        Inbound::Error(err) => handlers.on_error(err),
                        Inbound::Ignored => !handlers.is_released(),
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "stream closed by server");
                        break;
                    }
                    Ok(_) => !handlers.is_released(),
                    Err(err) => {
                        warn!(%err, "stream read failed");
                        handlers.on_error(StreamError::Transport(err.to_string()));
                        break;
                    }
                };
                if !listening {
                    break;
                }
            }
        });

        Ok(Some(WsSubscription {
            writer,
            reader: Some(reader_task),
        }))
    }
}

pub struct WsSubscription {
    writer: SplitSink<Socket, Message>,
    reader: Option<JoinHandle<()>>,
}

impl Subscription for WsSubscription {
    async fn unsubscribe(mut self) -> Result<(), StreamError> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        let frame = json!({ "type": "unsubscribe" }).to_string();
        self.writer
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        self.writer
            .close()
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))
    }
}

impl Drop for WsSubscription {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Leaderboard push source: a live socket, or nothing at all, in which case
/// every subscribe is refused and the board polls.
pub enum ScoreStream {
    Live(WsStreamEndpoint),
    Offline(UnavailableEndpoint<ScoreBatch>),
}

impl ScoreStream {
    pub fn from_url(url: Option<&str>) -> Self {
        match url {
            Some(url) => ScoreStream::Live(WsStreamEndpoint::new(url)),
            None => ScoreStream::Offline(UnavailableEndpoint::new(
                "no stream endpoint configured",
            )),
        }
    }
}

impl StreamEndpoint for ScoreStream {
    type Record = ScoreBatch;
    type Subscription = WsSubscription;

    async fn subscribe(
        &self,
        request: &SubscriptionRequest,
        handlers: StreamHandlers<ScoreBatch>,
    ) -> Result<Option<WsSubscription>, StreamError> {
        match self {
            ScoreStream::Live(endpoint) => endpoint.subscribe(request, handlers).await,
            ScoreStream::Offline(endpoint) => endpoint
                .subscribe(request, handlers)
                .await
                .map(|none| none.map(|never| match never {})),
        }
    }
}
