//! TIFF LZW decompression
//!
//! Codes are packed most-significant bit first and widen from 9 to 12 bits
//! as soon as the table holds `2^n - 1` entries.

use crate::error::{Error, Result};

const CLEAR_CODE: u16 = 256;
const EOI_CODE: u16 = 257;
const FIRST_CODE: usize = 258;
const MAX_CODES: usize = 4096;

/// Decompresses LZW compressed data
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    LzwDecoder::new().decode(data)
}

struct LzwDecoder {
    dictionary: Vec<Vec<u8>>,
    code_size: u8,
}

impl LzwDecoder {
    fn new() -> Self {
        let mut dictionary = Vec::with_capacity(MAX_CODES);
        dictionary.extend((0..=255u8).map(|b| vec![b]));
        // clear and end-of-information placeholders
        dictionary.push(Vec::new());
        dictionary.push(Vec::new());
        Self { dictionary, code_size: 9 }
    }

    fn reset(&mut self) {
        self.dictionary.truncate(FIRST_CODE);
        self.code_size = 9;
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(data.len() * 2);
        let mut reader = BitReader::new(data);
        let mut previous: Option<usize> = None;

        while let Some(code) = reader.read_bits(self.code_size) {
            match code {
                EOI_CODE => break,
                CLEAR_CODE => {
                    self.reset();
                    previous = None;
                }
                _ => {
                    let code = code as usize;
                    let entry = match previous {
                        None => self
                            .dictionary
                            .get(code)
                            .filter(|_| code < 256)
                            .cloned()
                            .ok_or_else(|| Error::Codec(format!("Invalid LZW code: {}", code)))?,
                        Some(prev) => {
                            let entry = if code < self.dictionary.len() {
                                self.dictionary[code].clone()
                            } else if code == self.dictionary.len() {
                                let mut entry = self.dictionary[prev].clone();
                                entry.push(entry[0]);
                                entry
                            } else {
                                return Err(Error::Codec(format!("Invalid LZW code: {}", code)));
                            };
                            self.add_entry(prev, entry[0]);
                            entry
                        }
                    };
                    output.extend_from_slice(&entry);
                    previous = Some(code);
                }
            }
        }

        Ok(output)
    }

    fn add_entry(&mut self, previous: usize, first_byte: u8) {
        if self.dictionary.len() >= MAX_CODES {
            return;
        }
        let mut entry = self.dictionary[previous].clone();
        entry.push(first_byte);
        self.dictionary.push(entry);

        if self.dictionary.len() + 1 >= (1 << self.code_size) && self.code_size < 12 {
            self.code_size += 1;
        }
    }
}

/// Reads MSB-first variable-width codes
struct BitReader<'a> {
    data: &'a [u8],
    buffer: u32,
    bits: u8,
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, buffer: 0, bits: 0, pos: 0 }
    }

    fn read_bits(&mut self, count: u8) -> Option<u16> {
        while self.bits < count {
            let byte = *self.data.get(self.pos)?;
            self.pos += 1;
            self.buffer = (self.buffer << 8) | byte as u32;
            self.bits += 8;
        }
        self.bits -= count;
        let code = (self.buffer >> self.bits) & ((1 << count) - 1);
        self.buffer &= (1 << self.bits) - 1;
        Some(code as u16)
    }
}
