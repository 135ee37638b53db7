//! PackBits run-length encoding
//!
//! The byte-oriented RLE used by Brother raster transfers and TIFF: a
//! count byte `n` in `0..=127` introduces `n + 1` literal bytes; a count
//! byte in `129..=255` introduces a single byte repeated `257 - n`
//! times.  `0x80` is reserved and never emitted, which caps runs at 128
//! repetitions.
//!
//! Two encoders are provided.  Both produce the same wire format and
//! round-trip through [`decode`] bit-exactly; they differ only in how
//! they walk the input.  The shared heuristic: extending a pending
//! literal is free while starting a new run costs one count byte, so a
//! run is only worth starting when it is at least three bytes long — or
//! two when there is no pending literal.

use thiserror::Error;

/// Worst-case encoded size for `len` input bytes
///
/// Literals add one count byte per 128 bytes of input; runs always
/// shrink.
#[must_use]
pub fn max_encoded_len(len: usize) -> usize {
    len + len.div_ceil(128)
}

/// Encode a buffer with the run-scanning PackBits encoder
///
/// Walks the input run by run: a pending literal is extended until a run
/// of at least three bytes (two at the start of the buffer or right
/// after a run) is found, which flushes the literal and emits the run.
#[must_use]
pub fn encode(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(max_encoded_len(src.len()));
    let mut lit_start = 0; // start of the pending literal
    let mut pos = 0;

    while pos < src.len() {
        // Measure the run starting at pos...
        let mut run = 1;
        while pos + run < src.len() && src[pos + run] == src[pos] {
            run += 1;
        }

        let min_run = if lit_start == pos { 2 } else { 3 };
        if run >= min_run {
            emit_literal(&mut out, &src[lit_start..pos]);

            // Emit the run in chunks of at most 128 so 0x80 stays
            // reserved; a leftover single byte joins the next literal.
            let mut remaining = run;
            while remaining > 1 {
                let chunk = remaining.min(128);
                out.push((257 - chunk) as u8);
                out.push(src[pos]);
                pos += chunk;
                remaining -= chunk;
            }
            lit_start = pos;
            pos += remaining; // 0 or 1 byte left over
        } else {
            // Not worth a run, keep it in the literal...
            pos += run;
        }
    }

    emit_literal(&mut out, &src[lit_start..pos]);
    out
}

/// Encode a buffer with the TIFF-style PackBits encoder
///
/// Seeks the next position where adjacent bytes repeat, measures the run
/// there, and decides between extending the literal and starting the
/// run.  Same wire format and heuristic thresholds as [`encode`].
#[must_use]
pub fn encode_tiff(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(max_encoded_len(src.len()));
    let len = src.len();
    let mut start = 0; // start of the literal to emit
    let mut pos = 0;

    while start < len {
        let mut rlen = 0;

        while pos < len {
            // Extend the literal as long as nothing repeats...
            while pos + 1 < len && src[pos] != src[pos + 1] {
                pos += 1;
            }

            // ...then measure the run that stopped us.
            rlen = 1;
            while pos + rlen < len && src[pos] == src[pos + rlen] {
                rlen += 1;
            }

            if rlen >= 2 + usize::from(start != pos) {
                break;
            }

            // Too short, append to the literal instead.
            pos += rlen;
            rlen = 0;
        }

        emit_literal(&mut out, &src[start..pos]);

        while rlen > 1 {
            let chunk = rlen.min(128);
            out.push((257 - chunk) as u8);
            out.push(src[pos]);
            pos += chunk;
            rlen -= chunk;
        }

        start = pos;
        // A leftover run of one becomes part of the next literal.
        pos += rlen;
    }

    out
}

fn emit_literal(out: &mut Vec<u8>, mut lit: &[u8]) {
    while !lit.is_empty() {
        let chunk = lit.len().min(128);
        out.push((chunk - 1) as u8);
        out.extend_from_slice(&lit[..chunk]);
        lit = &lit[chunk..];
    }
}

/// PackBits decoding errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The reserved count byte `0x80` appeared in the stream
    #[error("Reserved pack value 0x80 in stream")]
    ReservedValue,

    /// A count byte promised more data than the stream holds
    #[error("Truncated stream ({0} bytes missing)")]
    Truncated(usize),
}

/// Decode a PackBits stream
pub fn decode(src: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(src.len() * 2);
    let mut pos = 0;

    while pos < src.len() {
        let n = src[pos];
        pos += 1;

        if n < 0x80 {
            let count = usize::from(n) + 1;
            if pos + count > src.len() {
                return Err(DecodeError::Truncated(pos + count - src.len()));
            }
            out.extend_from_slice(&src[pos..pos + count]);
            pos += count;
        } else if n == 0x80 {
            return Err(DecodeError::ReservedValue);
        } else {
            let count = 257 - usize::from(n);
            let Some(&value) = src.get(pos) else {
                return Err(DecodeError::Truncated(1));
            };
            out.extend(std::iter::repeat(value).take(count));
            pos += 1;
        }
    }

    Ok(out)
}
