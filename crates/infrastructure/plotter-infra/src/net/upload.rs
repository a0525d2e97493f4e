use bytes::Bytes;
use futures::stream::{self, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::Body;

use crate::api::{ProgressFn, UploadSource};
use crate::error::TransportError;

pub(crate) const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Split into cheap `Bytes` slices of at most `UPLOAD_CHUNK_BYTES`.
pub(crate) fn chunk(bytes: &Bytes) -> Vec<Bytes> {
    (0..bytes.len())
        .step_by(UPLOAD_CHUNK_BYTES)
        .map(|start| bytes.slice(start..(start + UPLOAD_CHUNK_BYTES).min(bytes.len())))
        .collect()
}

/// Multipart body whose `file` part reports progress as each chunk is pulled by the connection.
pub(crate) fn multipart_form(source: UploadSource, progress: ProgressFn) -> Result<Form, TransportError> {
    let total = source.len();
    let mut sent = 0u64;
    let body = stream::iter(chunk(&source.bytes)).map(move |piece| {
        sent += piece.len() as u64;
        progress(sent);
        Ok::<Bytes, std::io::Error>(piece)
    });

    let part = Part::stream_with_length(Body::wrap_stream(body), total)
        .file_name(source.file_name)
        .mime_str(&source.content_type)
        .map_err(|e| TransportError::InvalidRequest(format!("bad content type: {e}")))?;

    Ok(Form::new().part("file", part))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_cover_the_whole_buffer() {
        let data = Bytes::from(vec![7u8; UPLOAD_CHUNK_BYTES * 2 + 10]);
        let pieces = chunk(&data);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[2].len(), 10);
        assert_eq!(pieces.iter().map(|p| p.len()).sum::<usize>(), data.len());
    }

    #[test]
    fn empty_buffer_has_no_chunks() {
        assert!(chunk(&Bytes::new()).is_empty());
    }
}
