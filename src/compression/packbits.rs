//! PackBits run-length coding

use crate::error::{Error, Result};

/// Decompresses PackBits data
///
/// - header 0..=127: copy the next `header + 1` literal bytes
/// - header -127..=-1: repeat the next byte `1 - header` times
/// - header -128: no-op
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        let header = data[pos] as i8;
        pos += 1;

        match header {
            -128 => continue,
            0..=127 => {
                let count = header as usize + 1;
                let literal = data
                    .get(pos..pos + count)
                    .ok_or_else(|| Error::Codec("PackBits: insufficient literal bytes".to_string()))?;
                output.extend_from_slice(literal);
                pos += count;
            }
            -127..=-1 => {
                let byte = *data
                    .get(pos)
                    .ok_or_else(|| Error::Codec("PackBits: missing run byte".to_string()))?;
                pos += 1;
                let count = (1 - header as isize) as usize;
                output.resize(output.len() + count, byte);
            }
        }
    }

    Ok(output)
}

/// Compresses data with PackBits, runs of 3+ bytes become repeat packets
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() + data.len() / 128 + 1);
    let mut pos = 0;

    while pos < data.len() {
        let run = run_length(&data[pos..]);
        if run >= 3 {
            output.push((1 - run as isize) as i8 as u8);
            output.push(data[pos]);
            pos += run;
            continue;
        }

        let start = pos;
        while pos < data.len() && pos - start < 128 && run_length(&data[pos..]) < 3 {
            pos += 1;
        }
        output.push((pos - start - 1) as u8);
        output.extend_from_slice(&data[start..pos]);
    }

    output
}

fn run_length(data: &[u8]) -> usize {
    let first = data[0];
    data.iter().take(128).take_while(|&&b| b == first).count()
}
