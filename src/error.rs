use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CarnError {
    #[error("Unsupported upscale factor {0}: only powers of two and 3 are implemented")]
    UnsupportedScale(usize),

    #[error("{channels} {role} channels are not divisible by {groups} groups")]
    GroupDivisibility {
        role: &'static str,
        channels: usize,
        groups: usize,
    },

    #[error("Expected input of shape (N, {expected_channels}, H, W), got {shape:?}")]
    InputShape {
        expected_channels: usize,
        shape: Vec<usize>,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, CarnError>;
