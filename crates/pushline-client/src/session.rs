//! Session identity and control-link resolution

use std::collections::HashMap;

use url::Url;

use pushline_core::protocol::{CONTROL_ADDRESS_KEY, SESSION_ID_KEY};

use crate::error::{PushClientError, Result};

/// Server-assigned identity of a logical streaming connection.
///
/// The id stays stable across rebinds; the whole struct is dropped when the
/// stream terminates without a rebind, or on explicit disconnect.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    id: String,
    control_url: Url,
    bind_count: u64,
    properties: HashMap<String, String>,
}

impl Session {
    /// Build a session from the `key:value` headers of a successful
    /// create-session handshake.
    pub fn from_handshake(properties: HashMap<String, String>, base_url: &Url) -> Result<Self> {
        let id = properties.get(SESSION_ID_KEY).cloned().ok_or_else(|| {
            PushClientError::Handshake {
                lines: vec![format!("missing {SESSION_ID_KEY} header")],
            }
        })?;
        let control_url = resolve_control_url(
            base_url,
            properties.get(CONTROL_ADDRESS_KEY).map(String::as_str),
        )?;
        Ok(Self {
            id,
            control_url,
            bind_count: 0,
            properties,
        })
    }

    /// Fold in the headers of a bind handshake.
    ///
    /// The server may move the control link between binds; the session id
    /// itself never changes.
    pub fn absorb_rebind(
        &mut self,
        properties: HashMap<String, String>,
        base_url: &Url,
    ) -> Result<()> {
        if let Some(addr) = properties.get(CONTROL_ADDRESS_KEY) {
            self.control_url = resolve_control_url(base_url, Some(addr))?;
        }
        self.properties.extend(properties);
        self.bind_count += 1;
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn control_url(&self) -> &Url {
        &self.control_url
    }

    pub fn bind_count(&self) -> u64 {
        self.bind_count
    }

    /// Any other handshake header, as received.
    #[allow(dead_code)]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Resolve the effective control-link address.
///
/// With no override the base address is used as-is. An override replaces
/// host, port and path while keeping the base scheme; servers behind a load
/// balancer use it to point control traffic at a specific node.
fn resolve_control_url(base: &Url, custom: Option<&str>) -> Result<Url> {
    match custom {
        None => Ok(base.clone()),
        Some(addr) => Ok(Url::parse(&format!("{}://{}", base.scheme(), addr))?),
    }
}
