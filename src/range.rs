use thiserror::Error;

const BYTES_UNIT: &str = "bytes=";

/// A single byte range with inclusive start and exclusive end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end_exclusive: u64,
}

impl ByteRange {
    /// Create a new byte range with inclusive start and exclusive end.
    pub fn new(start: u64, end_exclusive: u64) -> Self {
        ByteRange { start, end_exclusive }
    }

    pub fn len(&self) -> u64 {
        self.end_exclusive - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end_exclusive
    }

    /// The inclusive last byte offset, as written in a `Content-Range` header.
    pub fn last(&self) -> u64 {
        self.end_exclusive.saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    /// Not a `bytes=` range, a bound is not a number, or bounds are reversed.
    #[error("malformed range `{0}`")]
    Malformed(String),
    /// The envelope lies (partly) outside of the representation.
    #[error("range not satisfiable for a length of {total} bytes")]
    NotSatisfiable { total: u64 },
}

/// Parses a raw `Range` header value against a representation of `total` bytes.
///
/// Every comma separated range is folded into one covering envelope, so
/// `bytes=0-9,20-29` yields `[0, 30)`. Returns `Ok(None)` when the envelope is
/// the whole representation and the response should be a plain `200`.
pub fn parse_range_header(header: &str, total: u64) -> Result<Option<ByteRange>, RangeError> {
    let header = header.trim();
    let Some(specs) = header.strip_prefix(BYTES_UNIT) else {
        return Err(RangeError::Malformed(header.to_string()));
    };

    let mut envelope: Option<ByteRange> = None;
    for spec in specs.split(',') {
        let range = parse_spec(spec.trim(), total)?;
        envelope = Some(match envelope {
            None => range,
            Some(current) => ByteRange::new(
                current.start.min(range.start),
                current.end_exclusive.max(range.end_exclusive),
            ),
        });
    }

    // `split` always yields at least one item, and an empty range is malformed
    let Some(envelope) = envelope else {
        return Err(RangeError::Malformed(header.to_string()));
    };

    if envelope.start == 0 && envelope.end_exclusive == total {
        return Ok(None);
    }
    if envelope.end_exclusive > total || envelope.start >= envelope.end_exclusive {
        return Err(RangeError::NotSatisfiable { total });
    }
    Ok(Some(envelope))
}

fn parse_spec(spec: &str, total: u64) -> Result<ByteRange, RangeError> {
    let malformed = || RangeError::Malformed(spec.to_string());

    let (first, last) = spec.split_once('-').ok_or_else(malformed)?;
    let (first, last) = (first.trim(), last.trim());

    match (first.is_empty(), last.is_empty()) {
        (true, true) => Err(malformed()),
        // suffix: the final N bytes
        (true, false) => {
            let suffix = parse_bound(last).ok_or_else(malformed)?;
            if suffix > total {
                return Err(RangeError::NotSatisfiable { total });
            }
            Ok(ByteRange::new(total - suffix, total))
        }
        (false, true) => {
            let first = parse_bound(first).ok_or_else(malformed)?;
            Ok(ByteRange::new(first, total))
        }
        (false, false) => {
            let first = parse_bound(first).ok_or_else(malformed)?;
            let last = parse_bound(last).ok_or_else(malformed)?;
            if first > last {
                return Err(malformed());
            }
            Ok(ByteRange::new(first, last.saturating_add(1)))
        }
    }
}

fn parse_bound(raw: &str) -> Option<u64> {
    // u64::from_str accepts a leading '+', which has no place in a range
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}
