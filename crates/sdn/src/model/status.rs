use serde::{Deserialize, Serialize};

/// Status reported by `GET /sdn-status.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SdnStatus {
    /// Addresses of the management (host-facing) interface.
    #[serde(rename = "mgmtIPs")]
    pub mgmt_ips: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub config_errors: Vec<ConfigError>,
}

/// Failure to apply one configuration item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigError {
    pub item_ref: String,
    pub err_msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_omitted_when_empty() {
        let status = SdnStatus {
            mgmt_ips: vec!["192.168.0.2".into()],
            config_errors: vec![],
        };
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, r#"{"mgmtIPs":["192.168.0.2"]}"#);

        let status = SdnStatus {
            mgmt_ips: vec![],
            config_errors: vec![ConfigError {
                item_ref: "Veth/ep-client".into(),
                err_msg: "boom".into(),
            }],
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["configErrors"][0]["itemRef"], "Veth/ep-client");
        assert_eq!(json["configErrors"][0]["errMsg"], "boom");
    }
}
