use std::str::FromStr;

/// A 20-byte hash: info hashes and peer ids are both this shape.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id20(pub [u8; 20]);

impl Id20 {
    pub fn new(from: [u8; 20]) -> Self {
        Id20(from)
    }

    pub fn as_string(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_bytes(b: &[u8]) -> anyhow::Result<Self> {
        if b.len() != 20 {
            anyhow::bail!("buffer length must be 20, but it's {}", b.len());
        }
        let mut v = [0u8; 20];
        v.copy_from_slice(b);
        Ok(Id20(v))
    }

    pub fn distance(&self, other: &Id20) -> Id20 {
        let mut xor = [0u8; 20];
        for (i, (s, o)) in self.0.iter().zip(other.0.iter()).enumerate() {
            xor[i] = s ^ o;
        }
        Id20(xor)
    }
}

impl Default for Id20 {
    fn default() -> Self {
        Id20([0; 20])
    }
}

impl std::fmt::Debug for Id20 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x?}")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Id20 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

impl FromStr for Id20 {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 40 {
            anyhow::bail!("expected a 40-char hex string, got length {}", s.len());
        }
        let mut out = [0u8; 20];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Id20(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_hex() {
        let s = "cfe1119f124881ca70f7306f32e292194c88c195".get(0..40).unwrap();
        let id = Id20::from_str(s).unwrap();
        assert_eq!(id.as_string(), s);
    }

    #[test]
    fn distance_is_xor() {
        let a = Id20::new([0xff; 20]);
        let b = Id20::new([0x0f; 20]);
        assert_eq!(a.distance(&b), Id20::new([0xf0; 20]));
    }
}
