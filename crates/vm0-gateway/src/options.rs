//! Gateway configuration.
//!
//! All knobs are grouped into one value constructed at startup and handed to
//! [`crate::Gateway`], so multiple gateway instances with different options
//! can coexist in one process (and in tests).

use std::path::PathBuf;

/// Default rewriting endpoint origin.
pub const DEFAULT_API_URL: &str = "https://www.vm0.ai";

/// Default location of the proxy registry file.
pub const DEFAULT_REGISTRY_PATH: &str = "/tmp/proxy-registry.json";

/// Environment variable holding the optional Vercel protection bypass secret.
pub const VERCEL_BYPASS_ENV: &str = "VERCEL_AUTOMATION_BYPASS_SECRET";

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Origin of the vm0 API; MITM-mode requests are rewritten to its proxy
    /// webhook endpoint.
    pub api_url: String,

    /// Path of the registry file mapping VM IPs to run registrations.
    pub registry_path: PathBuf,

    /// Secret for the `x-vercel-protection-bypass` header, if deployed
    /// behind Vercel deployment protection.
    pub vercel_bypass: Option<String>,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            registry_path: PathBuf::from(DEFAULT_REGISTRY_PATH),
            vercel_bypass: None,
        }
    }
}

impl GatewayOptions {
    /// Defaults plus the bypass secret from the environment.
    pub fn from_env() -> Self {
        Self {
            vercel_bypass: std::env::var(VERCEL_BYPASS_ENV)
                .ok()
                .filter(|s| !s.is_empty()),
            ..Self::default()
        }
    }
}
