//! What the scanning user sees about the device asking to be logged in.

use woothee::parser::Parser;

use crate::storage::models::{DeviceInfo, DeviceKind};

/// User-Agent strings longer than this are cut before parsing and storage.
pub const MAX_USER_AGENT_LEN: usize = 512;

/// Build the requester's device record from an optional User-Agent header.
pub fn requester_device(user_agent: Option<&str>) -> DeviceInfo {
    let raw = match user_agent.map(str::trim) {
        Some(ua) if !ua.is_empty() => truncate(ua, MAX_USER_AGENT_LEN),
        _ => return DeviceInfo::default(),
    };

    let Some(result) = Parser::new().parse(raw) else {
        return DeviceInfo {
            raw_user_agent: raw.to_string(),
            ..DeviceInfo::default()
        };
    };

    let kind = match result.category {
        "pc" => DeviceKind::Desktop,
        "smartphone" | "mobilephone" => DeviceKind::Mobile,
        "tablet" => DeviceKind::Tablet,
        "crawler" => DeviceKind::Bot,
        _ => DeviceKind::Unknown,
    };

    DeviceInfo {
        browser: known(result.name),
        browser_version: known(result.version),
        kind,
        os: known(result.os),
        os_version: known(&result.os_version),
        raw_user_agent: raw.to_string(),
    }
}

/// One-line label such as "Chrome on Windows 10".
pub fn describe_device(device: &DeviceInfo) -> String {
    match (&device.browser, &device.os) {
        (Some(browser), Some(os)) => format!("{browser} on {os}"),
        (Some(browser), None) => browser.clone(),
        (None, Some(os)) => os.clone(),
        (None, None) => "Unknown device".to_string(),
    }
}

fn known(value: &str) -> Option<String> {
    if value.is_empty() || value == "UNKNOWN" {
        None
    } else {
        Some(value.to_string())
    }
}

/// Cut at a char boundary no later than `max` bytes.
fn truncate(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
