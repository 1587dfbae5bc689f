//! Configuration builders for testing.

use crate::config::{CostConfig, InfluxConfig, PortalConfig};

/// Portal configuration with every base URL pointed at the given server.
pub fn test_portal_config(base_url: String) -> PortalConfig {
    PortalConfig {
        email: "user@example.com".to_string(),
        password: "hunter2".to_string(),
        account_number: "900000001".to_string(),
        meter_id: "12345678".to_string(),
        client_id: "test-client-id".to_string(),
        login_base_url: base_url.clone(),
        account_base_url: base_url.clone(),
        website_base_url: base_url,
    }
}

pub fn test_influx_config(url: String) -> InfluxConfig {
    InfluxConfig {
        url,
        org: "test-org".to_string(),
        token: "test-token".to_string(),
        bucket: "test-bucket".to_string(),
    }
}

pub fn test_cost_config(liter_cost: f64) -> CostConfig {
    CostConfig {
        liter_cost,
        currency: "GBP".to_string(),
    }
}
