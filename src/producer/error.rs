use crate::transport::ErrorCode;

#[derive(thiserror::Error, Debug, Clone)]
pub enum ProducerError {
    #[error("the producer is closed")]
    ProducerClosed,
    #[error("the given record is larger than the batch max_size ({0} bytes)")]
    RecordTooLarge(usize),
    #[error("broker rejected the batch: {0}")]
    Rejected(ErrorCode),
    #[error("failed to receive record metadata, batch notifier was dropped")]
    GetRecordMetadata,
    #[error("an internal producer error occurred: {0}")]
    Internal(String),
}
