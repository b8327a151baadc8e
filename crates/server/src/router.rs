//! Classifies MQTT topics into `(prefix, device, event)` (§4.10). The
//! broker's own echo of our outbound publishes shares the same `things/<id>`
//! shape as a genuine inbound message, so outgoing suffixes are recognised
//! and silently dropped rather than treated as unknown.

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prefix {
    AglAll,
    AglProd,
    Aws,
}

impl Prefix {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "agl/all" => Some(Prefix::AglAll),
            "agl/prod" => Some(Prefix::AglProd),
            "$aws" => Some(Prefix::Aws),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundEvent {
    ShadowGet,
    ShadowUpdate,
    Mode,
    RecipeGet,
    EventsInfo,
    EventsWarning,
}

impl InboundEvent {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "shadow/get" => Some(Self::ShadowGet),
            "shadow/update" => Some(Self::ShadowUpdate),
            "mode" => Some(Self::Mode),
            "recipe/get" => Some(Self::RecipeGet),
            "events/software/info/put" => Some(Self::EventsInfo),
            "events/software/warning/put" => Some(Self::EventsWarning),
            _ => None,
        }
    }
}

/// Suffixes this server itself publishes under `things/<id>/...`. Seeing one
/// of these inbound means we're observing our own publish looped back.
const OUTGOING_SUFFIXES: &[&str] = &[
    "shadow/get/accepted",
    "shadow/update/accepted",
    "shadow/update/delta",
    "recipe",
    "rpc/put",
];

static TOPIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(agl/all|agl/prod|\$aws)/things/([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})/(.+)$",
    )
    .expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub prefix: Prefix,
    pub device_id: String,
    pub event: InboundEvent,
}

/// `Ok(None)` is an echo of our own traffic and should be ignored silently.
/// `Err(())` is an unrecognised topic shape and should be logged at error
/// level by the caller.
pub fn classify(topic: &str) -> Result<Option<Classified>, ()> {
    let caps = TOPIC_RE.captures(topic).ok_or(())?;
    let prefix = Prefix::from_str(&caps[1]).ok_or(())?;
    let device_id = caps[2].to_ascii_lowercase();
    let suffix = &caps[3];

    if OUTGOING_SUFFIXES.contains(&suffix) {
        return Ok(None);
    }

    InboundEvent::from_str(suffix)
        .map(|event| {
            Some(Classified {
                prefix,
                device_id,
                event,
            })
        })
        .ok_or(())
}

/// Subscription filters the client registers on connect. Brokers treat a
/// leading `$` specially and exclude `$`-prefixed topics from a bare `#`
/// wildcard, so `$aws/#` is subscribed separately.
pub fn subscriptions() -> Vec<&'static str> {
    vec!["#", "$aws/#"]
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "12345678-1234-1234-1234-123456789abc";

    #[test]
    fn classifies_vendor_shadow_get() {
        let topic = format!("agl/all/things/{UUID}/shadow/get");
        let got = classify(&topic).unwrap().unwrap();
        assert_eq!(got.prefix, Prefix::AglAll);
        assert_eq!(got.event, InboundEvent::ShadowGet);
        assert_eq!(got.device_id, UUID);
    }

    #[test]
    fn classifies_aws_shadow_update() {
        let topic = format!("$aws/things/{UUID}/shadow/update");
        let got = classify(&topic).unwrap().unwrap();
        assert_eq!(got.prefix, Prefix::Aws);
        assert_eq!(got.event, InboundEvent::ShadowUpdate);
    }

    #[test]
    fn classifies_nested_event_suffix() {
        let topic = format!("agl/prod/things/{UUID}/events/software/warning/put");
        let got = classify(&topic).unwrap().unwrap();
        assert_eq!(got.event, InboundEvent::EventsWarning);
    }

    #[test]
    fn ignores_our_own_echoes() {
        for suffix in OUTGOING_SUFFIXES {
            let topic = format!("$aws/things/{UUID}/{suffix}");
            assert_eq!(classify(&topic), Ok(None), "{suffix}");
        }
    }

    #[test]
    fn rejects_unknown_suffix() {
        let topic = format!("agl/prod/things/{UUID}/unknown/thing");
        assert!(classify(&topic).is_err());
    }

    #[test]
    fn rejects_malformed_uuid() {
        let topic = "agl/all/things/not-a-uuid/shadow/get";
        assert!(classify(topic).is_err());
    }

    #[test]
    fn rejects_unknown_prefix() {
        let topic = format!("other/things/{UUID}/shadow/get");
        assert!(classify(&topic).is_err());
    }
}
