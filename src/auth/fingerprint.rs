use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use sha2::{Digest, Sha256};

/// 冲突后缀的最大尝试次数
pub const MAX_SUFFIX_ATTEMPTS: u32 = 100;

/// 生成设备指纹
///
/// 对 UA、IP、附加信息与当天日期做 SHA-256 单向散列。同一客户端
/// 当天内得到稳定指纹；碰撞视为小概率事件而非不可能事件，
/// 冲突由绑定路径的后缀派生处理。
pub fn generate_fingerprint(user_agent: &str, ip_address: &str, additional: Option<&str>) -> String {
    let input = format!(
        "{}|{}|{}|{}",
        user_agent,
        ip_address,
        additional.unwrap_or(""),
        Utc::now().format("%Y%m%d")
    );

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// 生成冲突解决的候选指纹序列
///
/// 形如 `{原指纹}-U{用户ID}-{NN}`，NN 为 01..=100。调用方依次探测，
/// 取第一个未被占用的候选。
pub fn suffix_candidates(original: &str, user_id: i64) -> impl Iterator<Item = String> + '_ {
    (1..=MAX_SUFFIX_ATTEMPTS).map(move |i| format!("{}-U{}-{:02}", original, user_id, i))
}

/// 候选全部被占用时的保底方案：时间戳后缀（秒级，足以保证唯一）
pub fn timestamp_fallback(original: &str, user_id: i64) -> String {
    format!(
        "{}-U{}-{}",
        original,
        user_id,
        Utc::now().format("%Y%m%d%H%M%S")
    )
}
