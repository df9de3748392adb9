use std::error::Error as StdError;

use thiserror::Error;

use crate::{config::LoadError, domain::error::DomainError, infra::error::InfraError};

/// Failure of one logical backend query.
///
/// Clone so that every caller attached to a deduplicated in-flight request can
/// receive the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("transport failed: {0}")]
    Transport(String),
    #[error("backend returned errors: {}", .messages.join("; "))]
    Graphql { messages: Vec<String> },
    #[error("failed to decode `{operation}` response: {detail}")]
    Decode {
        operation: &'static str,
        detail: String,
    },
    #[error("`{operation}` response is missing `{field}`")]
    Malformed {
        operation: &'static str,
        field: &'static str,
    },
    #[error("query task aborted: {0}")]
    Aborted(String),
}

impl QueryError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn decode(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            operation,
            detail: err.to_string(),
        }
    }
}

/// Errors raised by a [`ContentSource`](crate::application::ports::ContentSource).
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("page `{slug}` not found")]
    NotFound { slug: String },
}

impl SourceError {
    /// Collapse into the error type carried by the query cache.
    pub fn into_query(self) -> QueryError {
        match self {
            SourceError::Query(err) => err,
            other @ SourceError::NotFound { .. } => QueryError::Graphql {
                messages: vec![other.to_string()],
            },
        }
    }
}

/// Failure of the user-facing "load current page" path.
///
/// Clone for the same reason as [`QueryError`]: concurrent loads of one page
/// share a single outcome.
#[derive(Debug, Clone, Error)]
pub enum PageLoadError {
    #[error("page `{locale}/{slug}` not found")]
    NotFound { locale: String, slug: String },
    #[error("failed to load page `{locale}/{slug}`: {source}")]
    Source {
        locale: String,
        slug: String,
        #[source]
        source: SourceError,
    },
    #[error("page `{locale}/{slug}` could not be assembled: {source}")]
    Assembly {
        locale: String,
        slug: String,
        #[source]
        source: DomainError,
    },
}

impl PageLoadError {
    pub fn from_source(locale: &str, slug: &str, source: SourceError) -> Self {
        match source {
            SourceError::NotFound { .. } => Self::NotFound {
                locale: locale.to_string(),
                slug: slug.to_string(),
            },
            other => Self::Source {
                locale: locale.to_string(),
                slug: slug.to_string(),
                source: other,
            },
        }
    }

    /// Message safe to show in the rendered error state.
    pub fn public_message(&self) -> &'static str {
        match self {
            PageLoadError::NotFound { .. } => "This page does not exist.",
            PageLoadError::Source { .. } => "This page is temporarily unavailable.",
            PageLoadError::Assembly { .. } => "This page could not be displayed.",
        }
    }

    /// Full error chain, outermost first, for logs.
    pub fn report(&self) -> Vec<String> {
        let mut messages = vec![self.to_string()];
        let mut current = self.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        messages
    }
}

/// Top-level error of the `vitrine` binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Page(#[from] PageLoadError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
