use std::fmt;

/// Identity of a stream. Every lookup is scoped by the bucket as well as the
/// stream id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    pub bucket_id: String,
    pub stream_id: String,
}

impl StreamKey {
    pub fn new(bucket_id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            stream_id: stream_id.into(),
        }
    }

    pub fn is_in_bucket(&self, bucket_id: &str) -> bool {
        self.bucket_id == bucket_id
    }
}

/// Latest commit sequence and stream revision within a revision window,
/// observed together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamPosition {
    pub commit_sequence: u64,
    pub stream_revision: u64,
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket_id, self.stream_id)
    }
}
