use std::time;

use futures::StreamExt;
use reqwest::Response;
use thiserror::Error;

/// Errors while reading a response body for logging.
#[derive(Error, Debug)]
pub enum ResponseBodyError {
    #[error("failed to parse a response as UTF8")]
    ParseUTF8StringError(#[from] std::str::Utf8Error),
    #[error("error while iterating over response body chunks")]
    StreamIterationError(#[from] reqwest::Error),
}

/// Read at most `n` bytes of a response body as text.
pub async fn first_n_bytes_of_response(
    response: Response,
    n: usize,
) -> Result<String, ResponseBodyError> {
    let mut body = response.bytes_stream();
    let mut buffer = String::with_capacity(n);

    while let Some(chunk) = body.next().await {
        if buffer.len() >= n {
            break;
        }

        let chunk = chunk?;
        let upper_bound = std::cmp::min(n - buffer.len(), chunk.len());
        // Cutting mid-character is fine, keep the valid prefix.
        let partial = match std::str::from_utf8(&chunk[..upper_bound]) {
            Ok(s) => s,
            Err(e) if e.valid_up_to() > 0 => {
                std::str::from_utf8(&chunk[..e.valid_up_to()])?
            }
            Err(e) => return Err(e.into()),
        };
        buffer.push_str(partial);
    }

    Ok(buffer)
}

/// Attempt to parse a Retry-After header as a duration, either as a number of
/// seconds or as an RFC2822 date. Returns `None` when missing, malformed or past.
pub fn parse_retry_after_header(header_map: &reqwest::header::HeaderMap) -> Option<time::Duration> {
    let retry_after = header_map
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?;

    if let Ok(seconds) = retry_after.parse::<u64>() {
        return Some(time::Duration::from_secs(seconds));
    }

    let date = chrono::DateTime::parse_from_rfc2822(retry_after).ok()?;
    let duration = chrono::DateTime::<chrono::offset::Utc>::from(date) - chrono::offset::Utc::now();

    // Negative when the date is in the past.
    duration.to_std().ok()
}
