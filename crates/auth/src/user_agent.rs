//! Best-effort User-Agent classification for audit metadata.
//!
//! Substring matching against well-known tokens. The result only decorates
//! audit entries and never feeds an authorization decision.

use serde::{Deserialize, Serialize};

pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub browser: String,
    pub os: String,
    pub device: String,
}

impl ClientInfo {
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        let ua = user_agent.unwrap_or_default();
        Self {
            browser: browser(ua).to_string(),
            os: operating_system(ua).to_string(),
            device: device(ua).to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "browser": self.browser,
            "os": self.os,
            "device": self.device,
        })
    }
}

// Order matters: Edge and Opera also advertise Chrome, Chrome also advertises Safari.
fn browser(ua: &str) -> &'static str {
    if ua.contains("Edg") {
        "Edge"
    } else if ua.contains("OPR") || ua.contains("Opera") {
        "Opera"
    } else if ua.contains("Firefox") {
        "Firefox"
    } else if ua.contains("Chrome") {
        "Chrome"
    } else if ua.contains("Safari") {
        "Safari"
    } else if ua.contains("MSIE") || ua.contains("Trident") {
        "Internet Explorer"
    } else {
        UNKNOWN
    }
}

fn operating_system(ua: &str) -> &'static str {
    if ua.contains("Windows") {
        "Windows"
    } else if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iOS") {
        "iOS"
    } else if ua.contains("Mac OS") || ua.contains("Macintosh") {
        "macOS"
    } else if ua.contains("Android") {
        "Android"
    } else if ua.contains("Linux") {
        "Linux"
    } else {
        UNKNOWN
    }
}

fn device(ua: &str) -> &'static str {
    if ua.contains("iPad") || ua.contains("Tablet") {
        "Tablet"
    } else if ua.contains("Mobile") || ua.contains("iPhone") || ua.contains("Android") {
        "Mobile"
    } else {
        "Desktop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desktop_chrome() {
        let info = ClientInfo::from_user_agent(Some(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
        ));
        assert_eq!(info.browser, "Chrome");
        assert_eq!(info.os, "Windows");
        assert_eq!(info.device, "Desktop");
    }

    #[test]
    fn test_edge_is_not_chrome() {
        let info = ClientInfo::from_user_agent(Some(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_0) AppleWebKit/537.36 Chrome/120.0 Safari/537.36 Edg/120.0",
        ));
        assert_eq!(info.browser, "Edge");
        assert_eq!(info.os, "macOS");
    }

    #[test]
    fn test_mobile_safari() {
        let info = ClientInfo::from_user_agent(Some(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 Version/17.0 Mobile/15E148 Safari/604.1",
        ));
        assert_eq!(info.browser, "Safari");
        assert_eq!(info.os, "iOS");
        assert_eq!(info.device, "Mobile");
    }

    #[test]
    fn test_unknown_agent() {
        let info = ClientInfo::from_user_agent(Some("curl/8.4.0"));
        assert_eq!(info.browser, UNKNOWN);
        assert_eq!(info.os, UNKNOWN);
        assert_eq!(info.device, "Desktop");

        assert_eq!(ClientInfo::from_user_agent(None).browser, UNKNOWN);
    }
}
