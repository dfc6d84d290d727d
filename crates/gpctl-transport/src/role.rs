//! Logical channel roles.
//!
//! The six message roles carry the command/settings/query protocol. The
//! remaining roles are plain readable attributes (model number, battery
//! level, wifi credentials) that some devices expose alongside.

use std::fmt;
use std::str::FromStr;

/// A logical endpoint on the camera, keyed by protocol role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelRole {
    Command,
    CommandResponse,
    Settings,
    SettingsResponse,
    Query,
    QueryResponse,
    ModelNumber,
    BatteryLevel,
    WifiSsid,
    WifiPassword,
    WifiState,
}

/// Roles that must be present for a device to be usable.
pub const REQUIRED_ROLES: [ChannelRole; 4] = [
    ChannelRole::Command,
    ChannelRole::CommandResponse,
    ChannelRole::Query,
    ChannelRole::QueryResponse,
];

/// Roles that deliver protocol messages as notifications.
pub const NOTIFYING_ROLES: [ChannelRole; 3] = [
    ChannelRole::CommandResponse,
    ChannelRole::SettingsResponse,
    ChannelRole::QueryResponse,
];

impl ChannelRole {
    /// Every known role, message roles first.
    pub const ALL: [ChannelRole; 11] = [
        ChannelRole::Command,
        ChannelRole::CommandResponse,
        ChannelRole::Settings,
        ChannelRole::SettingsResponse,
        ChannelRole::Query,
        ChannelRole::QueryResponse,
        ChannelRole::ModelNumber,
        ChannelRole::BatteryLevel,
        ChannelRole::WifiSsid,
        ChannelRole::WifiPassword,
        ChannelRole::WifiState,
    ];

    /// Stable kebab-case name used in logs and the CLI.
    pub fn name(self) -> &'static str {
        match self {
            ChannelRole::Command => "command",
            ChannelRole::CommandResponse => "command-response",
            ChannelRole::Settings => "settings",
            ChannelRole::SettingsResponse => "settings-response",
            ChannelRole::Query => "query",
            ChannelRole::QueryResponse => "query-response",
            ChannelRole::ModelNumber => "model-number",
            ChannelRole::BatteryLevel => "battery-level",
            ChannelRole::WifiSsid => "wifi-ssid",
            ChannelRole::WifiPassword => "wifi-password",
            ChannelRole::WifiState => "wifi-state",
        }
    }

    /// Returns true if the protocol writes framed messages to this role.
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            ChannelRole::Command | ChannelRole::Settings | ChannelRole::Query
        )
    }

    /// Returns true if this role delivers framed protocol notifications.
    pub fn is_notifying(self) -> bool {
        NOTIFYING_ROLES.contains(&self)
    }

    /// Returns true if this role is a plain readable attribute.
    pub fn is_attribute(self) -> bool {
        !self.is_writable() && !self.is_notifying()
    }

    /// The role on which replies to writes on `self` arrive.
    pub fn response_role(self) -> Option<ChannelRole> {
        match self {
            ChannelRole::Command => Some(ChannelRole::CommandResponse),
            ChannelRole::Settings => Some(ChannelRole::SettingsResponse),
            ChannelRole::Query => Some(ChannelRole::QueryResponse),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChannelRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ChannelRole::ALL
            .into_iter()
            .find(|role| role.name() == s)
            .ok_or_else(|| format!("unknown channel role '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for role in ChannelRole::ALL {
            assert_eq!(role.name().parse::<ChannelRole>().unwrap(), role);
        }
        assert!("bogus".parse::<ChannelRole>().is_err());
    }

    #[test]
    fn role_classes_are_disjoint() {
        for role in ChannelRole::ALL {
            let classes = [role.is_writable(), role.is_notifying(), role.is_attribute()];
            assert_eq!(classes.iter().filter(|c| **c).count(), 1, "{role}");
        }
    }

    #[test]
    fn writable_roles_have_response_roles() {
        assert_eq!(
            ChannelRole::Command.response_role(),
            Some(ChannelRole::CommandResponse)
        );
        assert_eq!(
            ChannelRole::Query.response_role(),
            Some(ChannelRole::QueryResponse)
        );
        assert_eq!(ChannelRole::WifiSsid.response_role(), None);
    }
}
