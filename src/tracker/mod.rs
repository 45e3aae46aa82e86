//! The HTTP tracker announce client. This sits just outside the core: it
//! formats the announce request and fetches the response body, then hands
//! the raw bytes to [`response::decode`], which is the piece this engine is
//! actually responsible for.

pub mod response;

pub use response::TrackerResponse;

use crate::error::Result;
use crate::{PeerId, Sha1Hash};
use percent_encoding::{percent_encode, NON_ALPHANUMERIC};

/// The parameters of a single announce request to an HTTP tracker.
pub struct AnnounceRequest<'a> {
    pub announce_url: &'a str,
    pub info_hash: Sha1Hash,
    pub peer_id: PeerId,
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
}

/// Performs a single HTTP GET announce and decodes the response.
pub async fn announce(request: &AnnounceRequest<'_>) -> Result<TrackerResponse> {
    let url = build_url(request);
    log::debug!("announcing to {}", request.announce_url);
    let client = reqwest::Client::new();
    let body = client.get(url).send().await?.bytes().await?;
    let response = response::decode(&body)?;
    log::info!(
        "tracker returned {} peers, interval {:?}",
        response.peers.len(),
        response.interval
    );
    Ok(response)
}

fn build_url(request: &AnnounceRequest<'_>) -> String {
    // info_hash and peer_id are raw 20-byte strings, not necessarily valid
    // UTF-8, so they're percent-encoded byte-for-byte rather than run
    // through a higher level URL-building API that expects text.
    format!(
        "{}?info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
        request.announce_url,
        percent_encode_bytes(&request.info_hash),
        percent_encode_bytes(&request.peer_id),
        request.port,
        request.uploaded,
        request.downloaded,
        request.left,
    )
}

fn percent_encode_bytes(bytes: &[u8]) -> String {
    percent_encode(bytes, NON_ALPHANUMERIC).to_string()
}

impl From<reqwest::Error> for crate::error::Error {
    fn from(e: reqwest::Error) -> Self {
        crate::error::Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}
