/// Result alias that carries the custom [`PlayerError`] type.
pub type Result<T> = std::result::Result<T, PlayerError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    /// The byte stream is not a recognised animated image container.
    #[error("invalid container: {0}")]
    InvalidContainer(String),
    /// The container declares zero frames.
    #[error("container declares no frames")]
    EmptySequence,
    /// Every frame in the container failed to decode, so there is no poster.
    #[error("none of the container's frames could be decoded")]
    NoDecodableFrames,
    /// A single frame could not be decoded. Never fatal to a sequence.
    #[error("frame {index} failed to decode: {reason}")]
    FrameDecode { index: usize, reason: String },
    /// Configuration values that cannot be used.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Free form message for the application layer.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Wrapper around configuration parse errors.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl PlayerError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn frame_decode(index: usize, reason: impl ToString) -> Self {
        Self::FrameDecode {
            index,
            reason: reason.to_string(),
        }
    }

    /// Whether the error prevents a sequence from being constructed.
    pub fn is_fatal_to_sequence(&self) -> bool {
        matches!(
            self,
            Self::InvalidContainer(_) | Self::EmptySequence | Self::NoDecodableFrames
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_not_fatal_to_a_sequence() {
        let err = PlayerError::msg("failed to read clip.gif");
        assert_eq!(err.to_string(), "failed to read clip.gif");
        assert!(!err.is_fatal_to_sequence());
        assert!(PlayerError::EmptySequence.is_fatal_to_sequence());
        assert!(!PlayerError::frame_decode(3, "truncated").is_fatal_to_sequence());
    }
}
