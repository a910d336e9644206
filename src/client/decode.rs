//! Response body content-decoding, selected by the response's
//! `Content-Encoding` header. Independent of the chunked/length framing the
//! protocol engines already handle; this layer only ever sees a fully
//! reassembled body.

use async_compression::tokio::bufread::{BrotliDecoder, DeflateDecoder, GzipDecoder, ZstdDecoder};
use bytes::Bytes;
use http::HeaderMap;
use tokio::io::AsyncReadExt;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coding {
    Gzip,
    Deflate,
    Brotli,
    Zstd,
}

fn coding_from_header(headers: &HeaderMap) -> Option<Coding> {
    let value = headers.get(http::header::CONTENT_ENCODING)?.to_str().ok()?;
    match value {
        "gzip" => Some(Coding::Gzip),
        "deflate" => Some(Coding::Deflate),
        "br" => Some(Coding::Brotli),
        "zstd" => Some(Coding::Zstd),
        _ => None,
    }
}

/// Decodes a complete response body per its `Content-Encoding` header. A
/// missing or unrecognized encoding passes the body through unchanged
/// rather than erroring, since an unknown encoding is the server's
/// business, not a framing failure.
pub(crate) async fn decode_content(headers: &HeaderMap, body: Bytes) -> Result<Bytes> {
    let Some(coding) = coding_from_header(headers) else {
        return Ok(body);
    };

    let mut decoded = Vec::new();
    let reader: &[u8] = body.as_ref();
    match coding {
        Coding::Gzip => {
            GzipDecoder::new(reader).read_to_end(&mut decoded).await.map_err(Error::protocol)?;
        }
        Coding::Deflate => {
            DeflateDecoder::new(reader).read_to_end(&mut decoded).await.map_err(Error::protocol)?;
        }
        Coding::Brotli => {
            BrotliDecoder::new(reader).read_to_end(&mut decoded).await.map_err(Error::protocol)?;
        }
        Coding::Zstd => {
            ZstdDecoder::new(reader).read_to_end(&mut decoded).await.map_err(Error::protocol)?;
        }
    }
    Ok(Bytes::from(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gzip_of(payload: &[u8]) -> Vec<u8> {
        use async_compression::tokio::write::GzipEncoder;
        use tokio::io::AsyncWriteExt;

        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(async {
                let mut encoder = GzipEncoder::new(Vec::new());
                encoder.write_all(payload).await.unwrap();
                encoder.shutdown().await.unwrap();
                encoder.into_inner()
            })
    }

    #[tokio::test]
    async fn undoes_gzip_content_encoding() {
        let payload = b"hello, decoded world!";
        let compressed = gzip_of(payload);

        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_ENCODING, "gzip".parse().unwrap());

        let decoded = decode_content(&headers, Bytes::from(compressed)).await.unwrap();
        assert_eq!(&decoded[..], payload);
    }

    #[tokio::test]
    async fn unrecognized_encoding_passes_through() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_ENCODING, "identity".parse().unwrap());

        let decoded = decode_content(&headers, Bytes::from_static(b"raw")).await.unwrap();
        assert_eq!(&decoded[..], b"raw");
    }

    #[tokio::test]
    async fn no_content_encoding_header_passes_through() {
        let decoded = decode_content(&HeaderMap::new(), Bytes::from_static(b"raw")).await.unwrap();
        assert_eq!(&decoded[..], b"raw");
    }
}
