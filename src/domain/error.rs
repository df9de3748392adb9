use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("page payload for `{slug}` is missing `{field}`")]
    MissingField { slug: String, field: &'static str },
    #[error("page `{slug}` lists {metadata} sections but carries {payload} section payloads")]
    SectionMismatch {
        slug: String,
        metadata: usize,
        payload: usize,
    },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn missing_field(slug: impl Into<String>, field: &'static str) -> Self {
        Self::MissingField {
            slug: slug.into(),
            field,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
