//! Header block compression
//!
//! SPDY/3 header blocks are a zlib stream primed with a fixed dictionary.
//! Each connection owns one [`HeaderEncoder`] and one [`HeaderDecoder`];
//! both keep state across blocks, so blocks must be encoded in send order
//! and decoded in receipt order.
//!
//! Uncompressed block layout:
//!
//! ```text
//! count(32) { name-len(32) name value-len(32) value }*
//! ```
//!
//! Several values for one name are joined with a single NUL byte.

use super::error::{Error, Result};
use super::pool::{BufferPool, PooledBuffer};
use crate::http::Headers;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};
use std::sync::OnceLock;
use tracing::trace;

/// Decoded blocks larger than this are treated as hostile
pub const MAX_DECODED_BLOCK: usize = 1 << 20;

const DICTIONARY_WORDS: &[&str] = &[
    "options", "head", "post", "put", "delete", "trace", "accept", "accept-charset",
    "accept-encoding", "accept-language", "accept-ranges", "age", "allow", "authorization",
    "cache-control", "connection", "content-base", "content-encoding", "content-language",
    "content-length", "content-location", "content-md5", "content-range", "content-type", "date",
    "etag", "expect", "expires", "from", "host", "if-match", "if-modified-since", "if-none-match",
    "if-range", "if-unmodified-since", "last-modified", "location", "max-forwards", "pragma",
    "proxy-authenticate", "proxy-authorization", "range", "referer", "retry-after", "server", "te",
    "trailer", "transfer-encoding", "upgrade", "user-agent", "vary", "via", "warning",
    "www-authenticate", "method", "get", "status", "200 OK", "version", "HTTP/1.1", "url",
    "public", "set-cookie", "keep-alive", "origin",
];

const DICTIONARY_TAIL: &str = "100101201202205206300302303304305306307402405406407408409410411412413414415416417502504505203 Non-Authoritative Information204 No Content301 Moved Permanently400 Bad Request401 Unauthorized403 Forbidden404 Not Found500 Internal Server Error501 Not Implemented503 Service UnavailableJan Feb Mar Apr May Jun Jul Aug Sept Oct Nov Dec 00:00:00 Mon, Tue, Wed, Thu, Fri, Sat, Sun, GMTchunked,text/html,image/png,image/jpg,image/gif,application/xml,application/xhtml+xml,text/plain,text/javascript,publicprivatemax-age=gzip,deflate,sdchcharset=utf-8charset=iso-8859-1,utf-,*,enq=0.";

/// The SPDY/3 header compression dictionary
///
/// Each word is prefixed with its 32-bit big-endian length, followed by the
/// status/date/content-type tail.
pub fn dictionary() -> &'static [u8] {
    static DICTIONARY: OnceLock<Vec<u8>> = OnceLock::new();
    DICTIONARY.get_or_init(|| {
        let mut dict = Vec::with_capacity(1423);
        for word in DICTIONARY_WORDS {
            dict.extend_from_slice(&(word.len() as u32).to_be_bytes());
            dict.extend_from_slice(word.as_bytes());
        }
        dict.extend_from_slice(DICTIONARY_TAIL.as_bytes());
        dict
    })
}

fn entry_size(name: &str, values: &[&str]) -> usize {
    let joined: usize = values.iter().map(|v| v.len()).sum::<usize>() + values.len().saturating_sub(1);
    8 + name.len() + joined
}

/// Compressed output spread over pooled buffers
pub struct ChunkChain {
    chunks: Vec<PooledBuffer>,
}

impl ChunkChain {
    fn new() -> Self {
        ChunkChain { chunks: Vec::new() }
    }

    /// Buffer with free space, spilling into a new one when the last is full
    fn writable(&mut self, pool: &BufferPool) -> &mut PooledBuffer {
        let spill = self.chunks.last().map_or(true, |c| c.is_full());
        if spill {
            self.chunks.push(pool.acquire());
        }
        let last = self.chunks.len() - 1;
        &mut self.chunks[last]
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(|c| c.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Chunks in output order
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.chunks.iter().map(|c| &c[..])
    }

    /// Copy the chain into one contiguous vector; the chunks are released
    /// when the chain is dropped
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }
}

/// Outbound header compression context
pub struct HeaderEncoder {
    compress: Compress,
    pool: BufferPool,
}

impl HeaderEncoder {
    /// Create an encoder whose work and output buffers come from `pool`
    pub fn new(pool: BufferPool) -> Result<Self> {
        let mut compress = Compress::new(Compression::default(), true);
        compress
            .set_dictionary(dictionary())
            .map_err(|e| Error::Compression(e.to_string()))?;
        Ok(HeaderEncoder { compress, pool })
    }

    /// Compress one header block
    ///
    /// Names are lowercased and values for the same name are NUL-joined.
    /// An entry that cannot fit one work buffer fails with `HeaderTooLarge`
    /// before any input reaches the compression context.
    pub fn encode(&mut self, headers: &Headers) -> Result<ChunkChain> {
        let groups = headers.grouped();
        let capacity = self.pool.buffer_size();

        for (name, values) in &groups {
            let size = entry_size(name, values);
            if size > capacity {
                return Err(Error::HeaderTooLarge {
                    name: name.clone(),
                    size,
                });
            }
        }

        let mut chain = ChunkChain::new();
        let mut work = self.pool.acquire();
        work.extend_from_slice(&(groups.len() as u32).to_be_bytes());

        for (name, values) in &groups {
            if entry_size(name, values) > work.remaining() {
                self.deflate(&work, &mut chain, FlushCompress::None)?;
                work.clear();
            }
            let value_len = entry_size(name, values) - 8 - name.len();
            work.extend_from_slice(&(name.len() as u32).to_be_bytes());
            work.extend_from_slice(name.as_bytes());
            work.extend_from_slice(&(value_len as u32).to_be_bytes());
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    work.extend_from_slice(&[0]);
                }
                work.extend_from_slice(value.as_bytes());
            }
        }

        self.deflate(&work, &mut chain, FlushCompress::Sync)?;
        trace!(entries = groups.len(), len = chain.len(), chunks = chain.chunk_count(), "encoded header block");
        Ok(chain)
    }

    fn deflate(&mut self, mut input: &[u8], chain: &mut ChunkChain, flush: FlushCompress) -> Result<()> {
        loop {
            let out = chain.writable(&self.pool);
            let available = out.remaining();
            let before_in = self.compress.total_in();
            let before_out = self.compress.total_out();

            self.compress
                .compress_vec(input, out.vec_mut(), flush)
                .map_err(|e| Error::Compression(e.to_string()))?;

            let consumed = (self.compress.total_in() - before_in) as usize;
            let produced = (self.compress.total_out() - before_out) as usize;
            input = &input[consumed..];

            // Output space left over means zlib has nothing more to emit
            if input.is_empty() && produced < available {
                return Ok(());
            }
        }
    }
}

/// Inbound header decompression context
pub struct HeaderDecoder {
    decompress: Decompress,
}

impl HeaderDecoder {
    pub fn new() -> Self {
        HeaderDecoder {
            decompress: Decompress::new(true),
        }
    }

    /// Inflate and parse one header block
    ///
    /// A failure to inflate leaves the shared context unusable and is
    /// reported as `Compression`; a block that inflates but is malformed is
    /// reported as `InvalidHeaderBlock`.
    pub fn decode(&mut self, block: &[u8]) -> Result<Headers> {
        let raw = self.inflate(block)?;
        parse_block(&raw)
    }

    fn inflate(&mut self, block: &[u8]) -> Result<Vec<u8>> {
        let mut raw = Vec::with_capacity(block.len() * 4 + 64);
        let mut input = block;

        loop {
            if raw.len() == raw.capacity() {
                if raw.len() >= MAX_DECODED_BLOCK {
                    return Err(Error::Compression(format!(
                        "header block inflates beyond {} bytes",
                        MAX_DECODED_BLOCK
                    )));
                }
                raw.reserve(raw.capacity().max(256));
            }
            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();

            let mut primed = false;
            if let Err(e) = self.decompress.decompress_vec(input, &mut raw, FlushDecompress::Sync) {
                if e.needs_dictionary().is_none() {
                    return Err(Error::Compression(e.to_string()));
                }
                self.decompress
                    .set_dictionary(dictionary())
                    .map_err(|e| Error::Compression(e.to_string()))?;
                primed = true;
            }

            let consumed = (self.decompress.total_in() - before_in) as usize;
            let produced = (self.decompress.total_out() - before_out) as usize;
            input = &input[consumed..];

            if input.is_empty() && raw.len() < raw.capacity() {
                return Ok(raw);
            }
            if consumed == 0 && produced == 0 && !primed && raw.len() < raw.capacity() {
                return Err(Error::Compression("header block stalled".to_string()));
            }
        }
    }
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn take_u32(raw: &[u8], pos: &mut usize) -> Result<usize> {
    let bytes = raw
        .get(*pos..*pos + 4)
        .ok_or_else(|| Error::InvalidHeaderBlock("truncated length".to_string()))?;
    *pos += 4;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize)
}

fn take_str<'a>(raw: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a str> {
    let bytes = raw
        .get(*pos..*pos + len)
        .ok_or_else(|| Error::InvalidHeaderBlock("truncated entry".to_string()))?;
    *pos += len;
    std::str::from_utf8(bytes).map_err(|_| Error::InvalidHeaderBlock("non UTF-8 header".to_string()))
}

fn parse_block(raw: &[u8]) -> Result<Headers> {
    let mut pos = 0;
    let count = take_u32(raw, &mut pos)?;
    let mut headers = Headers::new();

    for _ in 0..count {
        let name_len = take_u32(raw, &mut pos)?;
        let name = take_str(raw, &mut pos, name_len)?;
        if name.is_empty() {
            return Err(Error::InvalidHeaderBlock("empty header name".to_string()));
        }
        if name.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(Error::InvalidHeaderBlock(format!("uppercase header name {}", name)));
        }
        let value_len = take_u32(raw, &mut pos)?;
        let value = take_str(raw, &mut pos, value_len)?;
        for part in value.split('\0') {
            headers.insert(name, part);
        }
    }

    if pos != raw.len() {
        return Err(Error::InvalidHeaderBlock(format!(
            "{} trailing bytes after header block",
            raw.len() - pos
        )));
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(buffer_size: usize) -> (HeaderEncoder, HeaderDecoder, BufferPool) {
        let pool = BufferPool::new(buffer_size, 8);
        (HeaderEncoder::new(pool.clone()).unwrap(), HeaderDecoder::new(), pool)
    }

    #[test]
    fn test_dictionary_shape() {
        let dict = dictionary();
        assert_eq!(&dict[..11], b"\x00\x00\x00\x07options");
        assert!(dict.ends_with(b"enq=0."));
    }

    #[test]
    fn test_round_trip_empty() {
        let (mut encoder, mut decoder, _) = pair(4096);
        let chain = encoder.encode(&Headers::new()).unwrap();
        assert_eq!(decoder.decode(&chain.to_vec()).unwrap(), Headers::new());
    }

    #[test]
    fn test_round_trip_single_and_multi_value() {
        let (mut encoder, mut decoder, _) = pair(4096);
        let mut headers = Headers::new();
        headers.insert(":method", "GET");
        headers.insert("Accept", "text/html");
        headers.insert("accept", "text/plain");

        let chain = encoder.encode(&headers).unwrap();
        let decoded = decoder.decode(&chain.to_vec()).unwrap();

        assert_eq!(decoded, headers);
        assert_eq!(decoded.get_all("accept"), vec!["text/html", "text/plain"]);
        assert!(decoded.iter().all(|(name, _)| name == name.to_ascii_lowercase()));
    }

    #[test]
    fn test_context_carries_across_blocks() {
        let (mut encoder, mut decoder, _) = pair(4096);
        for i in 0..5 {
            let mut headers = Headers::new();
            headers.insert(":path", format!("/item/{}", i));
            headers.insert("user-agent", "spdylink");
            let block = encoder.encode(&headers).unwrap().to_vec();
            assert_eq!(decoder.decode(&block).unwrap(), headers);
        }
    }

    #[test]
    fn test_spill_into_multiple_buffers() {
        let (mut encoder, mut decoder, pool) = pair(64);
        let mut headers = Headers::new();
        for i in 0..40 {
            // Incompressible-ish values so the output spans several chunks
            headers.insert(format!("x-h{}", i), format!("{:08x}{:08x}", i * 2654435761u64, i * 40503));
        }

        let chain = encoder.encode(&headers).unwrap();
        assert!(chain.chunk_count() > 1);
        assert_eq!(decoder.decode(&chain.to_vec()).unwrap(), headers);

        drop(chain);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_oversized_entry_rejected_without_advancing() {
        let (mut encoder, mut decoder, pool) = pair(64);
        let mut big = Headers::new();
        big.insert("x-big", "v".repeat(100));

        match encoder.encode(&big) {
            Err(Error::HeaderTooLarge { name, size }) => {
                assert_eq!(name, "x-big");
                assert_eq!(size, 8 + 5 + 100);
            }
            other => panic!("unexpected {:?}", other.map(|c| c.len())),
        }
        assert_eq!(pool.outstanding(), 0);

        // The context is still in step with a fresh decoder
        let mut small = Headers::new();
        small.insert(":status", "200");
        let block = encoder.encode(&small).unwrap().to_vec();
        assert_eq!(decoder.decode(&block).unwrap(), small);
    }

    #[test]
    fn test_out_of_order_decode_fails() {
        let (mut encoder, mut decoder, _) = pair(4096);
        let mut first = Headers::new();
        first.insert(":path", "/a");
        let _skipped = encoder.encode(&first).unwrap().to_vec();
        let mut second = Headers::new();
        second.insert(":path", "/b");
        let block = encoder.encode(&second).unwrap().to_vec();

        assert!(decoder.decode(&block).is_err());
    }

    #[test]
    fn test_malformed_block() {
        assert!(matches!(parse_block(&[0, 0, 0, 1, 0, 0]), Err(Error::InvalidHeaderBlock(_))));
        assert!(matches!(
            parse_block(&[0, 0, 0, 1, 0, 0, 0, 1, b'A', 0, 0, 0, 0]),
            Err(Error::InvalidHeaderBlock(_))
        ));
    }
}
