//! RC4 decryption for PDF.
//!
//! RC4 is the stream cipher used by PDF 1.4/1.5 security handlers. It is
//! cryptographically weak, but legacy documents still carry it and the
//! mutation pass must be able to read their streams.

/// RC4 keystream, one byte per [`Iterator::next`].
struct Keystream {
    state: [u8; 256],
    a: usize,
    b: usize,
}

impl Keystream {
    /// Key scheduling. PDF keys are 5-16 bytes (40-128 bits); the key is
    /// cycled over the 256 permutation slots.
    fn schedule(key: &[u8]) -> Self {
        let mut state: [u8; 256] = std::array::from_fn(|i| i as u8);
        let mut j = 0usize;
        for (i, &k) in (0..256usize).zip(key.iter().cycle()) {
            j = (j + state[i] as usize + k as usize) & 0xFF;
            state.swap(i, j);
        }
        Keystream { state, a: 0, b: 0 }
    }
}

impl Iterator for Keystream {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        self.a = (self.a + 1) & 0xFF;
        self.b = (self.b + self.state[self.a] as usize) & 0xFF;
        self.state.swap(self.a, self.b);
        let sum = (self.state[self.a] as usize + self.state[self.b] as usize) & 0xFF;
        Some(self.state[sum])
    }
}

/// Encrypt or decrypt with RC4 (the operation is symmetric).
pub fn rc4_crypt(key: &[u8], data: &[u8]) -> Vec<u8> {
    Keystream::schedule(key)
        .zip(data)
        .map(|(k, &b)| b ^ k)
        .collect()
}
