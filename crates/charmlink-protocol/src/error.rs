use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("hex input has odd length {0}")]
    OddLength(usize),

    #[error("invalid hex character {ch:?} at position {position}")]
    InvalidHex { ch: char, position: usize },

    #[error("decoded bytes are not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
}
