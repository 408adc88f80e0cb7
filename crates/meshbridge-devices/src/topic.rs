//! Bus topic layout.
//!
//! ```text
//! <base>/<alias>[/<endpoint>]/set[/<property>]
//! <base>/<alias>[/<endpoint>]/get[/<property>]
//! <base>/bridge/request/device/{bind,unbind,configure,rename}
//! ```

use std::fmt;

/// Direction of a device topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Set,
    Get,
}

/// `<alias>[/<endpoint>]/set|get[/<property>]` with the base stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopic {
    /// Alias, possibly followed by an endpoint label
    pub path: String,
    pub kind: TopicKind,
    /// Single-property form (`.../set/brightness`)
    pub property: Option<String>,
}

/// Operator request handled by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Bind,
    Unbind,
    Configure,
    Rename,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bind => "bind",
            Self::Unbind => "unbind",
            Self::Configure => "configure",
            Self::Rename => "rename",
        }
    }

    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "bind" => Some(Self::Bind),
            "unbind" => Some(Self::Unbind),
            "configure" => Some(Self::Configure),
            "rename" => Some(Self::Rename),
            _ => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified inbound topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedTopic {
    Device(DeviceTopic),
    Request(RequestKind),
    /// Our own output or something we do not handle
    Ignored,
}

/// Topic builder and parser for one base topic.
#[derive(Debug, Clone)]
pub struct Topics {
    base: String,
}

impl Topics {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Pattern covering every topic the bridge consumes.
    pub fn subscription(&self) -> String {
        format!("{}/#", self.base)
    }

    pub fn state(&self, alias: &str) -> String {
        format!("{}/{}", self.base, alias)
    }

    pub fn availability(&self, alias: &str) -> String {
        format!("{}/{}/availability", self.base, alias)
    }

    pub fn bridge_state(&self) -> String {
        format!("{}/bridge/state", self.base)
    }

    pub fn request(&self, kind: RequestKind) -> String {
        format!("{}/bridge/request/device/{}", self.base, kind)
    }

    pub fn response(&self, kind: RequestKind) -> String {
        format!("{}/bridge/response/device/{}", self.base, kind)
    }

    pub fn parse(&self, topic: &str) -> ParsedTopic {
        let Some(rest) = topic
            .strip_prefix(self.base.as_str())
            .and_then(|r| r.strip_prefix('/'))
        else {
            return ParsedTopic::Ignored;
        };

        if let Some(bridge) = rest.strip_prefix("bridge/") {
            return bridge
                .strip_prefix("request/device/")
                .and_then(RequestKind::from_segment)
                .map(ParsedTopic::Request)
                .unwrap_or(ParsedTopic::Ignored);
        }

        let segments: Vec<&str> = rest.split('/').collect();
        let n = segments.len();
        let kind_of = |s: &str| match s {
            "set" => Some(TopicKind::Set),
            "get" => Some(TopicKind::Get),
            _ => None,
        };

        let (path_len, kind, property) = if n >= 2 && kind_of(segments[n - 1]).is_some() {
            (n - 1, kind_of(segments[n - 1]), None)
        } else if n >= 3 && kind_of(segments[n - 2]).is_some() {
            (n - 2, kind_of(segments[n - 2]), Some(segments[n - 1].to_string()))
        } else {
            return ParsedTopic::Ignored;
        };

        let path = segments[..path_len].join("/");
        match kind {
            Some(kind) if !path.is_empty() && property.as_deref() != Some("") => {
                ParsedTopic::Device(DeviceTopic {
                    path,
                    kind,
                    property,
                })
            }
            _ => ParsedTopic::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_topics() {
        let topics = Topics::new("zigbee2mqtt");
        assert_eq!(
            topics.parse("zigbee2mqtt/hall/bulb/set"),
            ParsedTopic::Device(DeviceTopic {
                path: "hall/bulb".to_string(),
                kind: TopicKind::Set,
                property: None,
            })
        );
        assert_eq!(
            topics.parse("zigbee2mqtt/switch/l2/set/state"),
            ParsedTopic::Device(DeviceTopic {
                path: "switch/l2".to_string(),
                kind: TopicKind::Set,
                property: Some("state".to_string()),
            })
        );
        assert_eq!(
            topics.parse("zigbee2mqtt/bulb/get"),
            ParsedTopic::Device(DeviceTopic {
                path: "bulb".to_string(),
                kind: TopicKind::Get,
                property: None,
            })
        );
    }

    #[test]
    fn test_parse_requests_and_ignored() {
        let topics = Topics::new("zigbee2mqtt");
        assert_eq!(
            topics.parse("zigbee2mqtt/bridge/request/device/bind"),
            ParsedTopic::Request(RequestKind::Bind)
        );
        assert_eq!(topics.parse("zigbee2mqtt/bridge/state"), ParsedTopic::Ignored);
        assert_eq!(topics.parse("zigbee2mqtt/bulb"), ParsedTopic::Ignored);
        assert_eq!(topics.parse("zigbee2mqtt/set"), ParsedTopic::Ignored);
        assert_eq!(topics.parse("other/bulb/set"), ParsedTopic::Ignored);
        assert_eq!(
            topics.response(RequestKind::Unbind),
            "zigbee2mqtt/bridge/response/device/unbind"
        );
    }
}
