//! Fixed-size bloom filter over byte strings.
//!
//! Bit positions come from double hashing (Kirsch-Mitzenmacher): two 64-bit
//! words are taken from a SHA-256 digest of the item and combined as
//! `h1 + i * h2` for each of the `k` probes.

use std::io::{self, Read, Write};

use sha2::{Digest, Sha256};

const MAGIC: &[u8; 4] = b"CBF1";

/// Refuse to load filters above 1 GiB of bits from a cache file.
const MAX_WORDS: u64 = (1 << 30) / 8;

#[derive(Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
    count: u64,
    capacity: u64,
    error_rate: f64,
}

impl BloomFilter {
    /// Size a filter for `capacity` items at the given false-positive rate.
    pub fn with_rate(capacity: usize, error_rate: f64) -> Self {
        let n = capacity.max(1) as f64;
        let p = error_rate.clamp(1e-12, 0.5);
        let ln2 = std::f64::consts::LN_2;

        let num_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as u32;
        let words = num_bits.div_ceil(64) as usize;

        Self {
            bits: vec![0u64; words],
            num_bits,
            num_hashes,
            count: 0,
            capacity: capacity as u64,
            error_rate: p,
        }
    }

    /// Insert an item. Returns true if at least one bit flipped, i.e. the
    /// item was definitely not present before.
    pub fn insert(&mut self, item: &[u8]) -> bool {
        let (h1, h2) = digest_pair(item);
        let mut flipped = false;
        for i in 0..self.num_hashes {
            let idx = self.index(h1, h2, i);
            let (word, mask) = ((idx / 64) as usize, 1u64 << (idx % 64));
            if self.bits[word] & mask == 0 {
                self.bits[word] |= mask;
                flipped = true;
            }
        }
        if flipped {
            self.count += 1;
        }
        flipped
    }

    /// False means the item was never inserted. True means it probably was.
    pub fn contains(&self, item: &[u8]) -> bool {
        let (h1, h2) = digest_pair(item);
        (0..self.num_hashes).all(|i| {
            let idx = self.index(h1, h2, i);
            self.bits[(idx / 64) as usize] & (1u64 << (idx % 64)) != 0
        })
    }

    /// Number of distinct insertions observed (approximate under collisions).
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    #[inline]
    fn index(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }

    /// Serialize as: magic, capacity, error rate, bit count, hash count,
    /// item count, then the bit words. All integers little-endian.
    pub fn write_to<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_all(MAGIC)?;
        w.write_all(&self.capacity.to_le_bytes())?;
        w.write_all(&self.error_rate.to_bits().to_le_bytes())?;
        w.write_all(&self.num_bits.to_le_bytes())?;
        w.write_all(&self.num_hashes.to_le_bytes())?;
        w.write_all(&self.count.to_le_bytes())?;
        for word in &self.bits {
            w.write_all(&word.to_le_bytes())?;
        }
        w.flush()
    }

    pub fn read_from<R: Read>(mut r: R) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(invalid("bad magic"));
        }

        let capacity = read_u64(&mut r)?;
        let error_rate = f64::from_bits(read_u64(&mut r)?);
        let num_bits = read_u64(&mut r)?;
        let mut hashes = [0u8; 4];
        r.read_exact(&mut hashes)?;
        let num_hashes = u32::from_le_bytes(hashes);
        let count = read_u64(&mut r)?;

        if num_bits == 0 || num_hashes == 0 {
            return Err(invalid("empty geometry"));
        }
        let words = num_bits.div_ceil(64);
        if words > MAX_WORDS {
            return Err(invalid("filter too large"));
        }

        let mut bits = Vec::with_capacity(words as usize);
        for _ in 0..words {
            bits.push(read_u64(&mut r)?);
        }

        Ok(Self {
            bits,
            num_bits,
            num_hashes,
            count,
            capacity,
            error_rate,
        })
    }
}

fn digest_pair(item: &[u8]) -> (u64, u64) {
    let digest = Sha256::digest(item);
    let mut a = [0u8; 8];
    let mut b = [0u8; 8];
    a.copy_from_slice(&digest[0..8]);
    b.copy_from_slice(&digest[8..16]);
    // An even step would only ever visit half the positions when num_bits is even.
    (u64::from_le_bytes(a), u64::from_le_bytes(b) | 1)
}

fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}
