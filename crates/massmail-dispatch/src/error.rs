use thiserror::Error;

/// A template whose braces do not pair up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unclosed '{{' at byte {offset}")]
    UnclosedGroup { offset: usize },
    #[error("unmatched '}}' at byte {offset}")]
    UnopenedGroup { offset: usize },
}

impl TemplateError {
    pub fn offset(&self) -> usize {
        match self {
            Self::UnclosedGroup { offset } | Self::UnopenedGroup { offset } => *offset,
        }
    }
}

/// Rejected worker configuration. Raised before any worker starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("SMTP host is empty")]
    MissingHost,

    #[error("invalid {field} address: {address:?}")]
    InvalidAddress { field: &'static str, address: String },

    #[error("{field} contains a line break")]
    LineBreak { field: &'static str },

    #[error("malformed {field} template")]
    Template {
        field: &'static str,
        #[source]
        source: TemplateError,
    },
}
