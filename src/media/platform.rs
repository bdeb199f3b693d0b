//! Origin platform detection and per-platform fetch profiles

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Social platform a media URL originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Douyin,
    Xiaohongshu,
    Weibo,
    Bilibili,
    Kuaishou,
    Unknown,
}

/// CDN host suffixes per platform
const HOST_SUFFIXES: &[(Platform, &[&str])] = &[
    (
        Platform::Douyin,
        &["douyin.com", "douyinvod.com", "douyinpic.com", "amemv.com", "iesdouyin.com"],
    ),
    (
        Platform::Xiaohongshu,
        &["xiaohongshu.com", "xhscdn.com", "xhslink.com"],
    ),
    (
        Platform::Weibo,
        &["weibo.com", "weibo.cn", "sinaimg.cn", "weibocdn.com"],
    ),
    (
        Platform::Bilibili,
        &["bilibili.com", "hdslb.com", "bilivideo.com", "bilivideo.cn"],
    ),
    (
        Platform::Kuaishou,
        &["kuaishou.com", "kwimgs.com", "yximgs.com", "kwaicdn.com"],
    ),
];

impl Platform {
    /// All known platforms, excluding `Unknown`
    pub const KNOWN: [Platform; 5] = [
        Platform::Douyin,
        Platform::Xiaohongshu,
        Platform::Weibo,
        Platform::Bilibili,
        Platform::Kuaishou,
    ];

    /// Detect the platform from a media URL's host
    pub fn detect(url: &str) -> Platform {
        let Some(host) = reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        else {
            return Platform::Unknown;
        };

        HOST_SUFFIXES
            .iter()
            .find(|(_, suffixes)| suffixes.iter().any(|s| host_matches(&host, s)))
            .map(|(platform, _)| *platform)
            .unwrap_or(Platform::Unknown)
    }

    /// Referer the origin expects before it serves media bytes
    pub fn referer(self) -> Option<&'static str> {
        match self {
            Platform::Douyin => Some("https://www.douyin.com/"),
            Platform::Xiaohongshu => Some("https://www.xiaohongshu.com/"),
            Platform::Weibo => Some("https://weibo.com/"),
            Platform::Bilibili => Some("https://www.bilibili.com/"),
            Platform::Kuaishou => Some("https://www.kuaishou.com/"),
            Platform::Unknown => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Douyin => "douyin",
            Platform::Xiaohongshu => "xiaohongshu",
            Platform::Weibo => "weibo",
            Platform::Bilibili => "bilibili",
            Platform::Kuaishou => "kuaishou",
            Platform::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "douyin" | "tiktok-cn" => Ok(Platform::Douyin),
            "xiaohongshu" | "xhs" | "rednote" => Ok(Platform::Xiaohongshu),
            "weibo" => Ok(Platform::Weibo),
            "bilibili" => Ok(Platform::Bilibili),
            "kuaishou" => Ok(Platform::Kuaishou),
            "unknown" => Ok(Platform::Unknown),
            other => Err(format!("Unknown platform: {}", other)),
        }
    }
}

/// `host` equals `suffix` or is a subdomain of it
pub(crate) fn host_matches(host: &str, suffix: &str) -> bool {
    host == suffix
        || host
            .strip_suffix(suffix)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        assert_eq!(
            Platform::detect("https://v26-web.douyinvod.com/abc/video.mp4"),
            Platform::Douyin
        );
        assert_eq!(
            Platform::detect("https://sns-webpic-qc.xhscdn.com/202401/abc"),
            Platform::Xiaohongshu
        );
        assert_eq!(
            Platform::detect("https://wx3.sinaimg.cn/large/abc.jpg"),
            Platform::Weibo
        );
        assert_eq!(
            Platform::detect("https://i0.hdslb.com/bfs/archive/a.jpg"),
            Platform::Bilibili
        );
        assert_eq!(Platform::detect("https://cdn.example/a.mp4"), Platform::Unknown);
        assert_eq!(Platform::detect("not a url"), Platform::Unknown);
    }

    #[test]
    fn test_host_matches_requires_label_boundary() {
        assert!(host_matches("sinaimg.cn", "sinaimg.cn"));
        assert!(host_matches("wx1.sinaimg.cn", "sinaimg.cn"));
        assert!(!host_matches("evilsinaimg.cn", "sinaimg.cn"));
    }

    #[test]
    fn test_from_str_round_trip() {
        for platform in Platform::KNOWN {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
        assert_eq!("XHS".parse::<Platform>().unwrap(), Platform::Xiaohongshu);
        assert!("myspace".parse::<Platform>().is_err());
    }
}
