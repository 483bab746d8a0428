use crate::{
    error::{MmsError, MmsResult},
    net::Connection,
};

mod request;
mod response;

pub use request::HttpRequest;
pub use response::HttpResponse;

/// Largest header we are willing to buffer before giving up on finding its end.
pub const MAX_HEADER_SIZE: usize = 128 * 1024;

/// Send `request` and read until the response header is complete.
///
/// Body bytes that arrived with the header are pushed back into the connection, so the
/// next read starts right after the header. They stay visible through
/// [`HttpResponse::body`] for classification.
pub(crate) async fn exchange(
    conn: &mut Connection,
    request: &HttpRequest,
) -> MmsResult<HttpResponse> {
    conn.write_all(&request.build()).await?;

    let mut response = HttpResponse::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = conn.read(&mut buf).await?;
        if n == 0 {
            return Err(MmsError::MalformedResponse(
                "connection closed inside the response header".to_string(),
            ));
        }
        response.append(&buf[..n]);
        if response.parse()? {
            break;
        }
    }

    conn.unread(response.body());
    Ok(response)
}
