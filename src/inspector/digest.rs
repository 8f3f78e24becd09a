//! 屏幕摘要
//!
//! 相似度摘要是可替换的策略：`bytes -> 定长摘要`、`摘要 × 摘要 -> 距离`。
//! - [`ContentHashDigest`]：对截图字节做 SHA-256，距离为比特汉明距离。任何字节差异（包括重新压缩）
//!   都会得到很大的距离，所以只会漏判重复，永远不会把两个不同的屏幕误合并。
//! - [`PerceptualDigest`]：8×8 双梯度感知哈希，能容忍轻微的像素差异。
//!
//! 结构摘要是元素树描述文本的 SHA-256，只用于 compare 时的佐证。

use std::fmt;

use image_hasher::{HashAlg, HasherConfig};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::config::DigestKind;
use crate::core::InspectorError;

/// 定长不透明摘要，序列化为十六进制字符串
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(Vec<u8>);

impl Digest {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for Digest {
    type Error = hex::FromHexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        hex::decode(value).map(Self)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.to_hex()
    }
}

/// 两个摘要的比特汉明距离；长度不同视为无穷远
pub fn hamming_distance(a: &Digest, b: &Digest) -> u32 {
    if a.0.len() != b.0.len() {
        return u32::MAX;
    }
    a.0.iter().zip(&b.0).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// 相似度摘要策略
pub trait DigestStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// 从截图字节计算摘要
    fn digest(&self, bytes: &[u8]) -> Result<Digest, InspectorError>;

    fn distance(&self, a: &Digest, b: &Digest) -> u32 {
        hamming_distance(a, b)
    }
}

/// 字节级内容哈希
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentHashDigest;

impl DigestStrategy for ContentHashDigest {
    fn name(&self) -> &'static str {
        "content"
    }

    fn digest(&self, bytes: &[u8]) -> Result<Digest, InspectorError> {
        if bytes.is_empty() {
            return Err(InspectorError::CaptureFailed("screenshot is empty".into()));
        }
        Ok(Digest(Sha256::digest(bytes).to_vec()))
    }
}

/// 双梯度感知哈希
#[derive(Debug, Default, Clone, Copy)]
pub struct PerceptualDigest;

impl DigestStrategy for PerceptualDigest {
    fn name(&self) -> &'static str {
        "perceptual"
    }

    fn digest(&self, bytes: &[u8]) -> Result<Digest, InspectorError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| InspectorError::CaptureFailed(format!("screenshot is not a decodable image: {}", e)))?;
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::DoubleGradient)
            .hash_size(8, 8)
            .to_hasher();
        let hash = hasher.hash_image(&img);
        Ok(Digest(hash.as_bytes().to_vec()))
    }
}

/// 按配置选择策略
pub fn strategy_for(kind: DigestKind) -> Box<dyn DigestStrategy> {
    match kind {
        DigestKind::Content => Box::new(ContentHashDigest),
        DigestKind::Perceptual => Box::new(PerceptualDigest),
    }
}

/// 元素树描述的结构摘要（十六进制 SHA-256）
pub fn structural_digest(hierarchy: &str) -> String {
    hex::encode(Sha256::digest(hierarchy.trim().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Luma};
    use std::io::Cursor;

    fn gradient_png(reversed: bool, poke: bool) -> Vec<u8> {
        let mut img = ImageBuffer::from_fn(64, 64, |x, _| {
            let v = (x * 4) as u8;
            Luma([if reversed { 255 - v } else { v }])
        });
        if poke {
            img.put_pixel(10, 10, Luma([0]));
        }
        let mut buf = Vec::new();
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_hamming_distance() {
        let a = Digest::from_bytes(vec![0b0000_0000, 0xff]);
        let b = Digest::from_bytes(vec![0b0000_0111, 0xff]);
        assert_eq!(hamming_distance(&a, &b), 3);
        assert_eq!(hamming_distance(&a, &a), 0);
        assert_eq!(hamming_distance(&a, &Digest::from_bytes(vec![0])), u32::MAX);
    }

    #[test]
    fn test_digest_hex_round_trip() {
        let d = Digest::from_bytes(vec![0xde, 0xad, 0xbe, 0xef]);
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, "\"deadbeef\"");
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn test_content_hash_is_conservative() {
        let s = ContentHashDigest;
        let a = s.digest(b"screen-a").unwrap();
        let same = s.digest(b"screen-a").unwrap();
        let b = s.digest(b"screen-b").unwrap();
        assert_eq!(a.as_bytes().len(), 32);
        assert_eq!(s.distance(&a, &same), 0);
        // 一个字节的差异也远超默认阈值
        assert!(s.distance(&a, &b) > 5);
        assert!(s.digest(b"").is_err());
    }

    #[test]
    fn test_perceptual_digest_tolerates_small_changes() {
        let s = PerceptualDigest;
        let base = s.digest(&gradient_png(false, false)).unwrap();
        let poked = s.digest(&gradient_png(false, true)).unwrap();
        let reversed = s.digest(&gradient_png(true, false)).unwrap();
        assert!(s.distance(&base, &poked) < 5);
        assert!(s.distance(&base, &reversed) > 5);
    }

    #[test]
    fn test_perceptual_digest_rejects_non_images() {
        assert!(matches!(
            PerceptualDigest.digest(b"not an image"),
            Err(InspectorError::CaptureFailed(_))
        ));
    }

    #[test]
    fn test_structural_digest_ignores_outer_whitespace() {
        let a = structural_digest("<node text=\"Login\"/>\n");
        let b = structural_digest("  <node text=\"Login\"/>");
        let c = structural_digest("<node text=\"Sign up\"/>");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
