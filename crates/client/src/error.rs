use std::path::PathBuf;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClientError {
    #[snafu(display("chat id '{raw}' is invalid for {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display("endpoint '{raw}' is not a valid URL on `{stage}`: {message}"))]
    InvalidEndpoint {
        stage: &'static str,
        raw: String,
        message: String,
    },
    #[snafu(display("failed to build HTTP client on `{stage}`: {source}"))]
    BuildHttpClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("chat query is empty"))]
    EmptyQuery { stage: &'static str },
    #[snafu(display("transport failed on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("{endpoint} returned status {status}: {body}"))]
    Status {
        stage: &'static str,
        endpoint: String,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to decode {endpoint} response on `{stage}`: {source}"))]
    DecodeResponse {
        stage: &'static str,
        endpoint: String,
        source: serde_json::Error,
    },
    #[snafu(display("failed to read upload file at {path:?}: {source}"))]
    ReadUploadFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("upload rejected: {message}"))]
    Upload {
        stage: &'static str,
        message: String,
    },
}

pub type ClientResult<T> = Result<T, ClientError>;
