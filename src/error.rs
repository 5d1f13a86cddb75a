use thiserror::Error;

/// Failures talking to the scrape backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend answered with content type {content_type:?} instead of JSON")]
    NotJson { content_type: Option<String> },

    #[error("backend JSON could not be decoded: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("request to backend failed: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport(err.to_string())
    }
}

/// Everything that can end a step's auto-chaining, plus the input and state
/// checks done before a session starts.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("protocol error: {detail}")]
    Protocol { detail: String },

    #[error("invalid link: {message}")]
    InvalidLink { message: String },

    #[error("scrape failed at step {step}: {message}")]
    Scrape {
        step: usize,
        message: String,
        error_type: Option<String>,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("target URL is empty")]
    EmptyUrl,

    #[error("invalid target URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("an analysis is already in progress")]
    AlreadyRunning,

    #[error("the previous analysis must be cleared with a new search first")]
    NeedsReset,

    #[error("no step is waiting to be continued")]
    NothingToContinue,
}

impl From<BackendError> for AnalysisError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Transport(msg) => AnalysisError::Network(msg),
            other => AnalysisError::Protocol {
                detail: other.to_string(),
            },
        }
    }
}

impl AnalysisError {
    /// Text meant for the person who submitted the URL.
    pub fn user_message(&self) -> String {
        match self {
            AnalysisError::Protocol { .. } => {
                "The server returned an unexpected non-JSON response (possibly an HTML error page)."
                    .to_string()
            }
            AnalysisError::InvalidLink { message } => {
                format!("This link could not be analyzed: {message}. Please check it and submit again.")
            }
            AnalysisError::Scrape { message, .. } => {
                format!("An error occurred during analysis: {message}")
            }
            AnalysisError::Network(_) => {
                "Failed to connect to the server. Please try again.".to_string()
            }
            AnalysisError::EmptyUrl => "Please enter a valid URL.".to_string(),
            AnalysisError::InvalidUrl(_) => "The URL could not be understood.".to_string(),
            AnalysisError::AlreadyRunning => "An analysis is already running.".to_string(),
            AnalysisError::NeedsReset => "Start a new search before analyzing again.".to_string(),
            AnalysisError::NothingToContinue => "There is no step waiting to continue.".to_string(),
        }
    }

    /// Bad input the user has to fix, as opposed to a transient failure.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            AnalysisError::InvalidLink { .. } | AnalysisError::EmptyUrl | AnalysisError::InvalidUrl(_)
        )
    }
}
