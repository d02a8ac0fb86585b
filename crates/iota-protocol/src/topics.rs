//! MQTT topic builders and the bridge topic grammar.
//!
//! Topic structure:
//! ```text
//! api/{ver}/me/claim                         anonymous claim request
//! api/{ver}/{token}/{path...}                bridged POST
//! api/{ver}/{token}/{path...}/request/{rid}  bridged GET
//! {token}/{path...}/response/{rid}           bridged GET response
//! {token}/me/attributes                      attribute broadcast
//! {token}/me/rpc/request/{seq}               outbound RPC request
//! {token}/me/rpc/response/{seq}              RPC reply
//! me/claim/{claim_id}                        claim approval result
//! ```

/// Filter the server subscribes to for the MQTT→HTTP bridge.
pub const BRIDGE_FILTER: &str = "api/#";

// ─── Server→device topics ───

pub fn attributes(token: &str) -> String {
    format!("{token}/me/attributes")
}

pub fn rpc_request(token: &str, seq: u64) -> String {
    format!("{token}/me/rpc/request/{seq}")
}

pub fn rpc_response(token: &str, seq: u64) -> String {
    format!("{token}/me/rpc/response/{seq}")
}

pub fn claim_result(claim_id: &str) -> String {
    format!("me/claim/{claim_id}")
}

/// Response topic for a bridged GET request.
pub fn bridge_response(token: &str, path: &str, request_id: &str) -> String {
    format!("{token}/{path}/response/{request_id}")
}

// ─── Bridge topic parsing ───

/// A device-originated topic classified by the bridge grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeRequest {
    /// `api/{ver}/me/claim` — anonymous claim, no token.
    Claim { version: String },
    /// `api/{ver}/{token}/{path}/request/{rid}` — GET with correlation id.
    Get {
        version: String,
        token: String,
        path: String,
        request_id: String,
    },
    /// `api/{ver}/{token}/{path}` — POST, response dropped.
    Post {
        version: String,
        token: String,
        path: String,
    },
}

/// Parse a topic under `api/#` into a bridge request.
///
/// Returns `None` for topics outside the grammar (wrong prefix or
/// fewer than four segments).
pub fn parse_bridge_topic(topic: &str) -> Option<BridgeRequest> {
    let sp: Vec<&str> = topic.split('/').collect();

    if sp.first() != Some(&"api") || sp.len() < 4 {
        return None;
    }

    if sp.len() == 4 && sp[2] == "me" && sp[3] == "claim" {
        return Some(BridgeRequest::Claim {
            version: sp[1].to_string(),
        });
    }

    let version = sp[1].to_string();
    let token = sp[2].to_string();

    if sp.len() >= 6 && sp[sp.len() - 2] == "request" {
        Some(BridgeRequest::Get {
            version,
            token,
            path: sp[3..sp.len() - 2].join("/"),
            request_id: sp[sp.len() - 1].to_string(),
        })
    } else {
        Some(BridgeRequest::Post {
            version,
            token,
            path: sp[3..].join("/"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_topic() {
        assert_eq!(attributes("T0K3N"), "T0K3N/me/attributes");
    }

    #[test]
    fn rpc_topics() {
        assert_eq!(rpc_request("T", 17), "T/me/rpc/request/17");
        assert_eq!(rpc_response("T", 17), "T/me/rpc/response/17");
    }

    #[test]
    fn claim_result_topic() {
        assert_eq!(claim_result("pi-42"), "me/claim/pi-42");
    }

    #[test]
    fn bridge_response_topic() {
        assert_eq!(
            bridge_response("T", "me/attributes", "9"),
            "T/me/attributes/response/9"
        );
    }

    #[test]
    fn parse_anonymous_claim() {
        let parsed = parse_bridge_topic("api/v1/me/claim").unwrap();
        assert_eq!(
            parsed,
            BridgeRequest::Claim {
                version: "v1".into()
            }
        );
    }

    #[test]
    fn parse_bridged_get() {
        let parsed = parse_bridge_topic("api/v1/T0K3N/me/attributes/request/9").unwrap();
        assert_eq!(
            parsed,
            BridgeRequest::Get {
                version: "v1".into(),
                token: "T0K3N".into(),
                path: "me/attributes".into(),
                request_id: "9".into(),
            }
        );
    }

    #[test]
    fn parse_bridged_post() {
        let parsed = parse_bridge_topic("api/v1/T0K3N/me/attributes").unwrap();
        assert_eq!(
            parsed,
            BridgeRequest::Post {
                version: "v1".into(),
                token: "T0K3N".into(),
                path: "me/attributes".into(),
            }
        );
    }

    #[test]
    fn short_request_suffix_is_a_post() {
        // "request" as the 4th of 5 segments is part of the path, not a
        // GET marker: the grammar needs at least 6 segments for GET.
        let parsed = parse_bridge_topic("api/v1/T/request/9").unwrap();
        assert_eq!(
            parsed,
            BridgeRequest::Post {
                version: "v1".into(),
                token: "T".into(),
                path: "request/9".into(),
            }
        );
    }

    #[test]
    fn parse_invalid_topics() {
        assert!(parse_bridge_topic("api/v1/me").is_none());
        assert!(parse_bridge_topic("notapi/v1/T/me/attributes").is_none());
        assert!(parse_bridge_topic("").is_none());
    }

    #[test]
    fn deep_path_get_joins_middle_segments() {
        let parsed = parse_bridge_topic("api/v1/T/devices/pi-1/rpc/request/3").unwrap();
        assert_eq!(
            parsed,
            BridgeRequest::Get {
                version: "v1".into(),
                token: "T".into(),
                path: "devices/pi-1/rpc".into(),
                request_id: "3".into(),
            }
        );
    }
}
