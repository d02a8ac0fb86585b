//! The connect and ACL rules.

use std::sync::LazyLock;

use regex::Regex;

use crate::source::CredentialSource;

/// The fixed privileged account the broker plugin itself uses.
pub const SUPER_USER: &str = "iota";

/// Topic access the broker is asking about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Subscribe,
}

impl Access {
    /// Mosquitto's numeric access codes.
    pub fn from_mosquitto(acc: i32) -> Option<Self> {
        match acc {
            1 => Some(Access::Read),
            2 => Some(Access::Write),
            4 => Some(Access::Subscribe),
            _ => None,
        }
    }
}

static CLAIM_REQUEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^api/v[0-9.]+/me/claim$").expect("claim request pattern"));
static CLAIM_RESPONSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^me/claim/([^/]+)$").expect("claim response pattern"));
static API_REQUEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^api/v[0-9.]+/([^/]+)/.+$").expect("api request pattern"));
static API_RESPONSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^([^/]+)/me/.+$").expect("api response pattern"));

/// May this identity connect to the broker?
pub async fn connect_check(
    source: &dyn CredentialSource,
    username: &str,
    password: &str,
    _client_id: &str,
) -> bool {
    // The super user authenticates with the shared password only.
    if username == SUPER_USER {
        return password == source.super_user_password();
    }

    // Anonymous devices may log in to claim themselves.
    if username.is_empty() {
        return true;
    }

    // A user can authenticate with name and password.
    if !password.is_empty() {
        return source.authenticate(username, password).await;
    }

    // Or with an access token in the username, as devices do.
    source.verify_user_token(username) || source.verify_device_token(username)
}

/// May this identity touch `topic` with `access`?
pub fn acl_check(
    source: &dyn CredentialSource,
    client_id: &str,
    username: &str,
    topic: &str,
    access: Access,
) -> bool {
    // The super user has full access to all topics.
    if username == SUPER_USER {
        return true;
    }

    // Anonymous devices: write the claim request, read their own
    // claim result, nothing else.
    if username.is_empty() {
        if client_id.is_empty() {
            return false;
        }
        return match access {
            Access::Write => CLAIM_REQUEST.is_match(topic),
            Access::Read | Access::Subscribe => CLAIM_RESPONSE
                .captures(topic)
                .is_some_and(|caps| &caps[1] == client_id),
        };
    }

    if source.verify_device_token(username) {
        // A device can publish requests for itself or for another
        // device it holds a valid token for.
        if let Some(caps) = API_REQUEST.captures(topic) {
            let subject = &caps[1];
            return access == Access::Write
                && (subject == username || source.verify_device_token(subject));
        }

        // Response topics follow the same ownership rule, for both
        // subscribing to responses and publishing RPC replies.
        if let Some(caps) = API_RESPONSE.captures(topic) {
            let subject = &caps[1];
            return subject == username || source.verify_device_token(subject);
        }

        // Wildcard filters that could reach the api namespace are off
        // limits for devices.
        if access == Access::Subscribe
            && (topic == "#" || topic.starts_with("api/") || topic.starts_with("+/"))
        {
            return false;
        }

        // Devices may talk to each other on any other topic.
        return true;
    }

    // Authenticated users have full access.
    true
}
