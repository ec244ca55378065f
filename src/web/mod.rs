use derive_more::Display;

pub mod audit;
pub mod auth;
pub mod gateway;
pub mod index;
pub mod metrics;
pub mod server;
pub mod upstream;

#[derive(Debug, Display)]
pub enum WebError {
    #[display(fmt = "Unauthorized")]
    Unauthenticated,
    #[display(fmt = "{}", _0)]
    Forbidden(String),
    #[display(fmt = "Not Found")]
    NotFound,
    #[display(fmt = "{}", _0)]
    BadRequest(String),
    #[display(fmt = "request body exceeds {} bytes", _0)]
    PayloadTooLarge(u64),
    #[display(fmt = "upstream unavailable: {}", _0)]
    UpstreamUnavailable(String),
    #[display(fmt = "upstream timed out")]
    UpstreamTimeout,
    #[display(fmt = "{}", _0)]
    Internal(String),
}

impl WebError {
    pub fn status_code(&self) -> u16 {
        match *self {
            WebError::Unauthenticated => 401,
            WebError::Forbidden(_) => 403,
            WebError::NotFound => 404,
            WebError::BadRequest(_) => 400,
            WebError::PayloadTooLarge(_) => 413,
            WebError::UpstreamUnavailable(_) => 502,
            WebError::UpstreamTimeout => 504,
            WebError::Internal(_) => 500,
        }
    }

    /// Error body in the shape the PowerDNS API uses
    pub fn to_json(&self) -> String {
        serde_json::json!({ "error": self.to_string() }).to_string()
    }
}

impl From<upstream::UpstreamError> for WebError {
    fn from(err: upstream::UpstreamError) -> Self {
        match err {
            upstream::UpstreamError::Timeout => WebError::UpstreamTimeout,
            upstream::UpstreamError::Transport(reason) => WebError::UpstreamUnavailable(reason),
        }
    }
}

impl From<serde_json::Error> for WebError {
    fn from(err: serde_json::Error) -> Self {
        WebError::Internal(err.to_string())
    }
}

impl std::error::Error for WebError {}

pub type Result<T> = std::result::Result<T, WebError>;
