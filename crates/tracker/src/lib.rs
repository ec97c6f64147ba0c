//! HTTP(S) tracker client: builds an announce request, issues it, and
//! decodes the bencoded response into a list of peer addresses.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use rbt_bencode::Value;
use rbt_core::Id20;
use thiserror::Error;

#[derive(Clone, Copy)]
pub enum TrackerRequestEvent {
    Started,
    Stopped,
    Completed,
}

pub struct TrackerRequest<'a> {
    pub announce_url: &'a str,
    pub info_hash: &'a Id20,
    pub peer_id: &'a Id20,
    pub event: Option<TrackerRequestEvent>,
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub numwant: Option<usize>,
}

impl<'a> TrackerRequest<'a> {
    fn as_querystring(&self) -> String {
        use std::fmt::Write;
        let mut s = String::new();
        s.push_str("info_hash=");
        s.push_str(&urlencoding::encode_binary(&self.info_hash.0));
        s.push_str("&peer_id=");
        s.push_str(&urlencoding::encode_binary(&self.peer_id.0));
        if let Some(event) = self.event {
            write!(
                s,
                "&event={}",
                match event {
                    TrackerRequestEvent::Started => "started",
                    TrackerRequestEvent::Stopped => "stopped",
                    TrackerRequestEvent::Completed => "completed",
                }
            )
            .unwrap();
        }
        write!(s, "&port={}", self.port).unwrap();
        write!(s, "&uploaded={}", self.uploaded).unwrap();
        write!(s, "&downloaded={}", self.downloaded).unwrap();
        write!(s, "&left={}", self.left).unwrap();
        s.push_str("&compact=1&no_peer_id=1");
        if let Some(numwant) = self.numwant {
            write!(s, "&numwant={numwant}").unwrap();
        }
        s
    }

    fn url(&self) -> String {
        let sep = if self.announce_url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.announce_url, sep, self.as_querystring())
    }
}

#[derive(Debug, Clone)]
pub struct TrackerResponse {
    pub interval: u64,
    pub seeders: u64,
    pub leechers: u64,
    pub peers: Vec<SocketAddr>,
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker returned a failure reason: {0}")]
    Failure(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed tracker response: {0}")]
    Bencode(#[from] rbt_bencode::DecodeError),
    #[error("malformed tracker response: {0}")]
    Malformed(String),
}

pub struct TrackerClient {
    http: reqwest::Client,
}

impl Default for TrackerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    pub async fn announce(&self, req: &TrackerRequest<'_>) -> Result<TrackerResponse, TrackerError> {
        let url = req.url();
        tracing::debug!(url, "announcing to tracker");
        let bytes = self.http.get(&url).send().await?.bytes().await?;
        parse_tracker_response(&bytes)
    }
}

fn parse_tracker_response(buf: &[u8]) -> Result<TrackerResponse, TrackerError> {
    let value = rbt_bencode::decode(buf)?;
    let dict = value
        .as_dict()
        .ok_or_else(|| TrackerError::Malformed("response is not a dict".into()))?;

    if let Some(reason) = dict.get(b"failure reason".as_slice()).and_then(Value::as_str) {
        return Err(TrackerError::Failure(reason.to_string()));
    }

    let interval = dict
        .get(b"interval".as_slice())
        .and_then(Value::as_int)
        .ok_or_else(|| TrackerError::Malformed("missing \"interval\"".into()))? as u64;
    let seeders = dict.get(b"complete".as_slice()).and_then(Value::as_int).unwrap_or(0) as u64;
    let leechers = dict.get(b"incomplete".as_slice()).and_then(Value::as_int).unwrap_or(0) as u64;

    let peers_value = dict
        .get(b"peers".as_slice())
        .ok_or_else(|| TrackerError::Malformed("missing \"peers\"".into()))?;

    let peers = match peers_value {
        Value::ByteString(compact) => parse_compact_peers(compact)?,
        Value::List(entries) => parse_dict_peers(entries)?,
        _ => return Err(TrackerError::Malformed("\"peers\" has unexpected shape".into())),
    };

    Ok(TrackerResponse {
        interval,
        seeders,
        leechers,
        peers,
    })
}

fn parse_compact_peers(buf: &[u8]) -> Result<Vec<SocketAddr>, TrackerError> {
    if buf.len() % 6 != 0 {
        return Err(TrackerError::Malformed(
            "compact peers length is not a multiple of 6".into(),
        ));
    }
    Ok(buf
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::V4(SocketAddrV4::new(ip, port))
        })
        .collect())
}

fn parse_dict_peers(entries: &[Value]) -> Result<Vec<SocketAddr>, TrackerError> {
    entries
        .iter()
        .map(|entry| {
            let d = entry
                .as_dict()
                .ok_or_else(|| TrackerError::Malformed("peer entry is not a dict".into()))?;
            let ip = d
                .get(b"ip".as_slice())
                .and_then(Value::as_str)
                .ok_or_else(|| TrackerError::Malformed("peer entry missing \"ip\"".into()))?;
            let port = d
                .get(b"port".as_slice())
                .and_then(Value::as_int)
                .ok_or_else(|| TrackerError::Malformed("peer entry missing \"port\"".into()))?;
            let ip: std::net::IpAddr = ip
                .parse()
                .map_err(|_| TrackerError::Malformed(format!("invalid ip {ip:?}")))?;
            Ok(SocketAddr::new(ip, port as u16))
        })
        .collect()
}
