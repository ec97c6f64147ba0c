use rbt_bencode::{decode, find_top_level_dict_value_span, Value};
use rbt_sha1::sha1_of;

use crate::error::Error;
use crate::hash_id::Id20;

/// A parsed `.torrent` file. Multi-file torrents are only exposed through
/// `total_length` — the on-disk layout is always a single concatenated
/// file, so per-file boundaries are not reconstructed here.
#[derive(Debug, Clone)]
pub struct TorrentMeta {
    pub announce: Option<String>,
    pub announce_list: Vec<Vec<String>>,
    pub name: Option<String>,
    pub piece_length: u32,
    /// Concatenated 20-byte SHA-1 hashes, one per piece.
    pub pieces: Vec<u8>,
    pub total_length: u64,
    pub info_hash: Id20,
}

impl TorrentMeta {
    pub fn from_bytes(buf: &[u8]) -> Result<Self, Error> {
        let info_span = find_top_level_dict_value_span(buf, b"info")
            .ok_or_else(|| Error::Metainfo("missing \"info\" dict".into()))?;
        let info_hash = Id20::new(sha1_of(&buf[info_span]));

        let top = decode(buf)?;
        let top = top
            .as_dict()
            .ok_or_else(|| Error::Metainfo("torrent file is not a dict".into()))?;

        let announce = top.get(b"announce".as_slice()).and_then(Value::as_str).map(String::from);
        let announce_list = top
            .get(b"announce-list".as_slice())
            .and_then(Value::as_list)
            .map(|tiers| {
                tiers
                    .iter()
                    .filter_map(Value::as_list)
                    .map(|tier| tier.iter().filter_map(Value::as_str).map(String::from).collect())
                    .collect()
            })
            .unwrap_or_default();

        let info = top
            .get(b"info".as_slice())
            .ok_or_else(|| Error::Metainfo("missing \"info\" dict".into()))?
            .as_dict()
            .ok_or_else(|| Error::Metainfo("\"info\" is not a dict".into()))?;

        let name = info.get(b"name".as_slice()).and_then(Value::as_str).map(String::from);

        let piece_length = info
            .get(b"piece length".as_slice())
            .and_then(Value::as_int)
            .ok_or_else(|| Error::Metainfo("missing \"piece length\"".into()))? as u32;

        let pieces = info
            .get(b"pieces".as_slice())
            .and_then(Value::as_bytes)
            .ok_or_else(|| Error::Metainfo("missing \"pieces\"".into()))?
            .to_vec();
        if pieces.len() % 20 != 0 {
            return Err(Error::Metainfo("\"pieces\" length is not a multiple of 20".into()));
        }

        let total_length = match (
            info.get(b"length".as_slice()).and_then(Value::as_int),
            info.get(b"files".as_slice()).and_then(Value::as_list),
        ) {
            (Some(length), None) => length as u64,
            (None, Some(files)) => {
                let mut total = 0u64;
                for f in files {
                    let f = f
                        .as_dict()
                        .ok_or_else(|| Error::Metainfo("file entry is not a dict".into()))?;
                    let len = f
                        .get(b"length".as_slice())
                        .and_then(Value::as_int)
                        .ok_or_else(|| Error::Metainfo("file entry missing \"length\"".into()))?;
                    let path = f
                        .get(b"path".as_slice())
                        .and_then(Value::as_list)
                        .ok_or_else(|| Error::Metainfo("file entry missing \"path\"".into()))?;
                    validate_path_components(path)?;
                    total += len as u64;
                }
                total
            }
            _ => {
                return Err(Error::Metainfo(
                    "info dict must have exactly one of \"length\" or \"files\"".into(),
                ))
            }
        };

        if total_length == 0 {
            return Err(Error::ZeroLength);
        }

        Ok(TorrentMeta {
            announce,
            announce_list,
            name,
            piece_length,
            pieces,
            total_length,
            info_hash,
        })
    }

    pub fn piece_hash(&self, piece: u32) -> Option<&[u8]> {
        let start = piece as usize * 20;
        self.pieces.get(start..start + 20)
    }

    pub fn compare_hash(&self, piece: u32, hash: &[u8; 20]) -> Option<bool> {
        self.piece_hash(piece).map(|expected| expected == hash)
    }

    /// Tracker announce URLs to try, preferring `announce-list` tiers over
    /// the single legacy `announce` field when both are present.
    pub fn iter_announce(&self) -> impl Iterator<Item = &str> {
        if self.announce_list.iter().flatten().next().is_some() {
            itertools_either::Either::Left(self.announce_list.iter().flatten().map(String::as_str))
        } else {
            itertools_either::Either::Right(self.announce.iter().map(String::as_str))
        }
    }
}

fn validate_path_components(path: &[Value]) -> Result<(), Error> {
    for bit in path {
        let bit = bit
            .as_str()
            .ok_or_else(|| Error::Metainfo("non-UTF8 path component".into()))?;
        if bit == ".." || bit.contains('/') || bit.contains('\\') {
            return Err(Error::PathTraversal(bit.to_string()));
        }
    }
    Ok(())
}

/// A tiny local stand-in for `itertools::Either` — the only thing this
/// crate needs from that dependency, so it isn't pulled in for one enum.
mod itertools_either {
    pub enum Either<L, R> {
        Left(L),
        Right(R),
    }

    impl<L, R, T> Iterator for Either<L, R>
    where
        L: Iterator<Item = T>,
        R: Iterator<Item = T>,
    {
        type Item = T;

        fn next(&mut self) -> Option<T> {
            match self {
                Either::Left(l) => l.next(),
                Either::Right(r) => r.next(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_file_torrent() -> Vec<u8> {
        let pieces = vec![0u8; 20];
        let mut info = b"d6:lengthi10e4:name4:a.ext12:piece lengthi10e6:pieces20:".to_vec();
        info.extend_from_slice(&pieces);
        info.push(b'e');
        let announce = b"http://a/b";
        let mut buf = format!("d8:announce{}:", announce.len()).into_bytes();
        buf.extend_from_slice(announce);
        buf.extend_from_slice(b"4:info");
        buf.extend_from_slice(&info);
        buf.push(b'e');
        buf
    }

    #[test]
    fn parses_single_file_torrent() {
        let buf = single_file_torrent();
        let meta = TorrentMeta::from_bytes(&buf).unwrap();
        assert_eq!(meta.total_length, 10);
        assert_eq!(meta.piece_length, 10);
        assert_eq!(meta.name.as_deref(), Some("a.ext"));
        assert_eq!(meta.announce.as_deref(), Some("http://a/b"));
        assert_eq!(meta.pieces.len(), 20);
    }

    #[test]
    fn info_hash_is_stable_across_runs() {
        let buf = single_file_torrent();
        let a = TorrentMeta::from_bytes(&buf).unwrap();
        let b = TorrentMeta::from_bytes(&buf).unwrap();
        assert_eq!(a.info_hash, b.info_hash);
    }

    #[test]
    fn rejects_path_traversal_in_multi_file_torrent() {
        let info = b"d4:filesld6:lengthi5e4:pathl2:..eee12:piece lengthi10e6:pieces20:01234567890123456789e";
        let mut buf = b"d4:info".to_vec();
        buf.extend_from_slice(info);
        buf.push(b'e');
        let err = TorrentMeta::from_bytes(&buf).unwrap_err();
        assert!(matches!(err, Error::PathTraversal(_)));
    }
}
