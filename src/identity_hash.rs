use hmac::{Hmac, Mac};
use sha2::Sha256;

/// 对客户端标识做 HMAC-SHA256 并截取前 16 字节（hex），用于日志与错误上报去敏。
pub fn hmac_hex16(salt: &str, value: &str) -> String {
    // HMAC 接受任意长度的 key，new_from_slice 不会失败
    let mut mac = match Hmac::<Sha256>::new_from_slice(salt.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(value.as_bytes());
    let bytes = mac.finalize().into_bytes();
    hex::encode(&bytes[..16])
}

/// 按配置派生客户端哈希；未配置盐值时不输出任何客户端信息。
pub fn client_hash(salt_opt: Option<&str>, client_id: &str) -> Option<String> {
    let salt = salt_opt.filter(|s| !s.is_empty())?;
    Some(hmac_hex16(salt, client_id))
}
