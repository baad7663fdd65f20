/// Per-request context handed to codecs. Codecs stay pure; anything
/// time- or identity-dependent comes in through here.
#[derive(Debug, Clone)]
pub struct CodecCtx {
    pub request_id: String,
    /// Wall-clock seconds used when a response object must be synthesized.
    pub unix_time: i64,
}

impl CodecCtx {
    pub fn new(request_id: impl Into<String>, unix_time: i64) -> Self {
        Self {
            request_id: request_id.into(),
            unix_time,
        }
    }
}
