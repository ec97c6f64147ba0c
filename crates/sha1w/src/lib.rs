//! Wrapper around the `sha1` crate so the hashing backend stays swappable
//! without touching call sites in the piece store.

pub trait ISha1 {
    fn new() -> Self;
    fn update(&mut self, buf: &[u8]);
    fn finish(self) -> [u8; 20];
}

pub struct Sha1Rust {
    inner: sha1::Sha1,
}

pub type Sha1 = Sha1Rust;

impl ISha1 for Sha1Rust {
    fn new() -> Self {
        Sha1Rust {
            inner: sha1::Sha1::default(),
        }
    }

    fn update(&mut self, buf: &[u8]) {
        use sha1::Digest;
        sha1::Sha1::update(&mut self.inner, buf)
    }

    fn finish(self) -> [u8; 20] {
        use sha1::Digest;
        let mut output = [0u8; 20];
        sha1::Sha1::finalize_into(self.inner, (&mut output[..]).into());
        output
    }
}

/// Convenience one-shot hash, used for hashing an already-assembled piece
/// or the raw `info` dict span when computing an info-hash.
pub fn sha1_of(buf: &[u8]) -> [u8; 20] {
    let mut h = Sha1Rust::new();
    h.update(buf);
    h.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_matches_known_digest() {
        let digest = sha1_of(b"");
        assert_eq!(hex::encode_digest(&digest), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    mod hex {
        pub fn encode_digest(d: &[u8; 20]) -> String {
            d.iter().map(|b| format!("{b:02x}")).collect()
        }
    }
}
