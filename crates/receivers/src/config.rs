//! Receiver settings decoding and validation helpers.
//!
//! Each receiver config is a `serde(default)` struct decoded from the JSON
//! blob of its `[[receivers]]` table, then validated before the instance is
//! built. Validation errors name the offending field.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ReceiverError;
use crate::receiver::ReceiverKind;

/// Receiver settings that can check themselves.
pub trait ReceiverConfig: DeserializeOwned + Default {
    fn validate(&self) -> Result<(), ReceiverError>;
}

/// Decodes and validates a settings blob. `null` yields the defaults.
pub fn from_settings<T: ReceiverConfig>(
    kind: ReceiverKind,
    settings: &Value,
) -> Result<T, ReceiverError> {
    let config: T = match settings {
        Value::Null => T::default(),
        other => serde_json::from_value(other.clone())
            .map_err(|e| ReceiverError::config(kind.type_name(), e.to_string()))?,
    };
    config.validate()?;
    Ok(config)
}

pub fn validate_not_empty(field: &str, value: &str) -> Result<(), ReceiverError> {
    if value.trim().is_empty() {
        return Err(ReceiverError::config(field, "must not be empty"));
    }
    Ok(())
}

/// Parses an optional multicast group; empty means none.
pub fn parse_multicast(field: &str, value: &str) -> Result<Option<IpAddr>, ReceiverError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    let addr: IpAddr = value
        .parse()
        .map_err(|_| ReceiverError::config(field, format!("'{value}' is not an IP address")))?;
    if !addr.is_multicast() {
        return Err(ReceiverError::config(
            field,
            format!("'{value}' is not a multicast address"),
        ));
    }
    Ok(Some(addr))
}

/// Wildcard listen address for the requested family.
pub fn any_addr(ipv6: bool, port: u16) -> SocketAddr {
    let ip = if ipv6 {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    } else {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    };
    SocketAddr::new(ip, port)
}

/// Loopback listen address for the requested family.
pub fn loopback_addr(ipv6: bool, port: u16) -> SocketAddr {
    let ip = if ipv6 {
        IpAddr::V6(Ipv6Addr::LOCALHOST)
    } else {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    };
    SocketAddr::new(ip, port)
}
