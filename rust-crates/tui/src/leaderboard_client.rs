use anyhow::{
    Context,
    Result,
    anyhow,
};
use live_sync::{
    Address,
    leaderboard::{
        LeaderboardSource,
        ScoreEntry,
    },
};
use serde::Deserialize;

/// Reads the full ranking from the read gateway.
#[derive(Clone)]
pub struct LeaderboardClient {
    base_url: String,
    http: reqwest::Client,
}

impl LeaderboardClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client for leaderboard")?;
        Ok(Self { base_url, http })
    }

    pub async fn leaderboard(&self) -> Result<Vec<ScoreEntry>> {
        let url = format!("{}/leaderboard", self.base_url);
        let res = self
            .http
            .get(url)
            .send()
            .await
            .context("leaderboard request failed")?;
        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .context("failed to read leaderboard response body")?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes);
            return Err(anyhow!(
                "leaderboard gateway responded with {status}: {body}"
            ));
        }
        let rows: Vec<ScoreRowDto> =
            serde_json::from_slice(&bytes).context("invalid leaderboard payload")?;
        rows_into_entries(rows)
    }
}

/// Where the leaderboard comes from. Without a gateway the board simply stays
/// empty.
#[derive(Clone)]
pub enum LeaderboardReader {
    Http(LeaderboardClient),
    Empty,
}

impl LeaderboardReader {
    pub fn from_url(url: Option<&str>) -> Result<Self> {
        match url {
            Some(url) => LeaderboardClient::new(url).map(Self::Http),
            None => Ok(Self::Empty),
        }
    }
}

impl LeaderboardSource for LeaderboardReader {
    async fn fetch_leaderboard(&self) -> Result<Vec<ScoreEntry>> {
        match self {
            LeaderboardReader::Http(client) => client.leaderboard().await,
            LeaderboardReader::Empty => Ok(Vec::new()),
        }
    }
}

/// Scores are 64-bit on chain, so gateways may send them as decimal strings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FlexibleInt {
    Unsigned(u64),
    Signed(i64),
    Text(String),
}

impl FlexibleInt {
    fn to_u64(&self) -> Result<u64> {
        match self {
            FlexibleInt::Unsigned(n) => Ok(*n),
            FlexibleInt::Signed(n) => {
                u64::try_from(*n).map_err(|_| anyhow!("negative value {n}"))
            }
            FlexibleInt::Text(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("not an unsigned integer: {raw:?}")),
        }
    }

    fn to_i64(&self) -> Result<i64> {
        match self {
            FlexibleInt::Unsigned(n) => {
                i64::try_from(*n).map_err(|_| anyhow!("value {n} out of range"))
            }
            FlexibleInt::Signed(n) => Ok(*n),
            FlexibleInt::Text(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("not an integer: {raw:?}")),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ScoreRowDto {
    player: String,
    score: FlexibleInt,
    timestamp: FlexibleInt,
}

impl TryFrom<ScoreRowDto> for ScoreEntry {
    type Error = anyhow::Error;

    fn try_from(dto: ScoreRowDto) -> Result<Self> {
        Ok(ScoreEntry {
            score: dto.score.to_u64().context("bad score")?,
            timestamp: dto.timestamp.to_i64().context("bad timestamp")?,
            player: Address::new(dto.player),
        })
    }
}

pub fn rows_into_entries(rows: Vec<ScoreRowDto>) -> Result<Vec<ScoreEntry>> {
    rows.into_iter().map(ScoreEntry::try_from).collect()
}
