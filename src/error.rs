use std::fmt;

use thiserror::Error;

use crate::model::ChannelKind;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOperation {
    SaveTitle,
    SaveContent,
    CreateChapter,
    DeleteChapter,
    ReorderChapters,
    RenameBook,
}

impl WriteOperation {
    pub fn save(kind: ChannelKind) -> Self {
        match kind {
            ChannelKind::Title => Self::SaveTitle,
            ChannelKind::Content => Self::SaveContent,
        }
    }
}

impl fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::SaveTitle => "title save",
            Self::SaveContent => "content save",
            Self::CreateChapter => "chapter create",
            Self::DeleteChapter => "chapter delete",
            Self::ReorderChapters => "chapter reorder",
            Self::RenameBook => "book rename",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("{operation} failed for {target}: {message}")]
    TransientWrite {
        operation: WriteOperation,
        target: String,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("gateway error: {0}")]
    Gateway(String),
}

impl SessionError {
    /// Classifies a failed gateway write.
    pub fn from_write(
        operation: WriteOperation,
        target: impl Into<String>,
        err: GatewayError,
    ) -> Self {
        match err {
            GatewayError::NotFound(what) => Self::NotFound(what),
            GatewayError::Backend(err) => Self::TransientWrite {
                operation,
                target: target.into(),
                message: format!("{err:#}"),
            },
        }
    }
}

impl From<GatewayError> for SessionError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(what) => Self::NotFound(what),
            GatewayError::Backend(err) => Self::Gateway(format!("{err:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_failures_are_classified() {
        let err = SessionError::from_write(
            WriteOperation::SaveContent,
            "chapter c1",
            GatewayError::Backend(anyhow::anyhow!("connection reset")),
        );
        assert_eq!(
            err.to_string(),
            "content save failed for chapter c1: connection reset"
        );

        let err = SessionError::from_write(
            WriteOperation::SaveTitle,
            "chapter c1",
            GatewayError::NotFound("chapter c1".to_string()),
        );
        assert_eq!(err, SessionError::NotFound("chapter c1".to_string()));
    }
}
