/// Errors returned by the Toyota connected-services client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unsupported vehicle generation: {0}")]
    UnsupportedGeneration(String),

    #[error("invalid vehicle listing entry: {0}")]
    Listing(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// HTTP status code, if the error came from a non-success response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Status { status, .. } => Some(*status),
            Error::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True for 401/403 responses and failed token operations.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_)) || matches!(self.status(), Some(401) | Some(403))
    }

    /// 400 responses are expected for some subscription states.
    pub fn is_bad_request(&self) -> bool {
        self.status() == Some(400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> Error {
        Error::Status {
            status: code,
            url: "https://example.invalid/v1".to_string(),
            body: String::new(),
        }
    }

    #[test]
    fn test_classification() {
        assert!(status(401).is_auth());
        assert!(status(403).is_auth());
        assert!(!status(400).is_auth());
        assert!(status(400).is_bad_request());
        assert!(Error::Auth("expired".to_string()).is_auth());
        assert_eq!(status(500).status(), Some(500));
        assert_eq!(Error::UnsupportedGeneration("99X".to_string()).status(), None);
    }
}
