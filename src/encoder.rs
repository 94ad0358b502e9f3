use bytes::Bytes;
use opencv::{
    core::{Mat, Vector},
    imgcodecs,
};
use thiserror::Error;

pub const FRAME_BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Failed to encode frame: {0}")]
    EncodeFrameFailed(opencv::Error),
    #[error("Encoder produced no data")]
    Empty,
}

/// JPEG-encodes a frame at the given quality (0-100).
pub fn encode(frame: &Mat, quality: i32) -> Result<Vec<u8>, EncodeError> {
    let params = Vector::<i32>::from_slice(&[imgcodecs::IMWRITE_JPEG_QUALITY, quality]);
    let mut buf = Vector::<u8>::new();
    let ok = imgcodecs::imencode(".jpg", frame, &mut buf, &params)
        .map_err(EncodeError::EncodeFrameFailed)?;
    if !ok || buf.is_empty() {
        return Err(EncodeError::Empty);
    }
    Ok(buf.into())
}

/// Frames one JPEG as a part of a `multipart/x-mixed-replace` body.
pub fn wrap(jpeg: &[u8]) -> Bytes {
    let part_header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        FRAME_BOUNDARY,
        jpeg.len()
    );
    let mut body = Vec::with_capacity(part_header.len() + jpeg.len() + 2);
    body.extend_from_slice(part_header.as_bytes());
    body.extend_from_slice(jpeg);
    body.extend_from_slice(b"\r\n");
    Bytes::from(body)
}
