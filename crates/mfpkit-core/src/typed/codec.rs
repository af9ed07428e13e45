//! EnvelopeCodec - メッセージと文字列 blob の相互変換
//!
//! The device carries channel data in a string field, so messages are JSON
//! armored with standard base64.
//!
//! # フロー
//! 1. serde_json で bytes にシリアライズ
//! 2. base64 で文字列化
//! 3. 受信側は逆順にデコード。失敗はそのリクエストだけのエラーになる

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::CodecError;

pub struct EnvelopeCodec;

impl EnvelopeCodec {
    pub fn encode<T: Serialize>(message: &T) -> Result<String, CodecError> {
        let bytes = serde_json::to_vec(message)?;
        Ok(STANDARD.encode(bytes))
    }

    pub fn decode<T: DeserializeOwned>(blob: &str) -> Result<T, CodecError> {
        let bytes = STANDARD.decode(blob.trim())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
