//! Transport spec fetch
//!
//! The service publishes transport-construction options as JSON at
//! `<url>/<pathname>/spec`. The fetch happens once, before any socket is
//! opened; a transfer error means no connection is attempted at all.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::types::Result;

/// Transport options served by the remote spec endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransportSpec {
    /// Socket mount path the transport should dial
    #[serde(default)]
    pub pathname: Option<String>,

    /// Name of the wire framing in use on the server
    #[serde(default)]
    pub transformer: Option<String>,

    /// Remaining options, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fetch transport options from the service's spec endpoint
pub async fn fetch_transport_spec(config: &ClientConfig) -> Result<TransportSpec> {
    let url = config.spec_url();
    info!("Spec: fetching transport options from {}", url);

    let response = reqwest::get(&url).await?.error_for_status()?;
    let spec: TransportSpec = response.json().await?;

    debug!(
        "Spec: transformer={:?} pathname={:?}",
        spec.transformer, spec.pathname
    );
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_deserializes_known_and_extra_fields() {
        let raw = json!({
            "pathname": "/socket",
            "transformer": "websockets",
            "parser": "json",
            "timeout": 35000
        });

        let spec: TransportSpec = serde_json::from_value(raw).unwrap();
        assert_eq!(spec.pathname.as_deref(), Some("/socket"));
        assert_eq!(spec.transformer.as_deref(), Some("websockets"));
        assert_eq!(spec.extra.get("parser"), Some(&json!("json")));
        assert_eq!(spec.extra.get("timeout"), Some(&json!(35000)));
    }

    #[test]
    fn test_spec_tolerates_empty_object() {
        let spec: TransportSpec = serde_json::from_value(json!({})).unwrap();
        assert!(spec.pathname.is_none());
        assert!(spec.transformer.is_none());
        assert!(spec.extra.is_empty());
    }
}
