// Path: crates/worker/src/registry.rs
//! Loads service profiles from disk.
//!
//! One JSON file per service; the file stem is the stable config id.
//! Profiles that cannot rotate (no Safe, no key, unregistered id) are
//! logged and skipped rather than failing startup.

use mech_types::error::RegistryError;
use mech_types::{Service, ServiceProfile};
use std::path::Path;

pub struct ServiceRegistry {
    services: Vec<Service>,
}

impl ServiceRegistry {
    pub fn load(profile_dir: &Path) -> Result<Self, RegistryError> {
        let mut services = Vec::new();
        let mut entries: Vec<_> = std::fs::read_dir(profile_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        entries.sort();

        for path in entries {
            let config_id = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };
            let raw = std::fs::read_to_string(&path)?;
            let profile: ServiceProfile =
                serde_json::from_str(&raw).map_err(|e| RegistryError::Profile {
                    file: path.display().to_string(),
                    message: e.to_string(),
                })?;

            match Service::from_profile(&config_id, profile) {
                Some(mut service) => {
                    // Key files are stored relative to the profile dir.
                    if service.key_file.is_relative() {
                        service.key_file = profile_dir.join(&service.key_file);
                    }
                    services.push(service);
                }
                None => {
                    tracing::warn!(
                        target: "registry",
                        event = "service_excluded",
                        config_id,
                        "profile missing safe, key, or on-chain id; excluded from rotation"
                    );
                }
            }
        }

        if services.is_empty() {
            return Err(RegistryError::NoServices);
        }
        tracing::info!(
            target: "registry",
            event = "loaded",
            count = services.len(),
            staked = services.iter().filter(|s| s.is_staked()).count(),
        );
        Ok(Self { services })
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn staked(&self) -> Vec<&Service> {
        self.services.iter().filter(|s| s.is_staked()).collect()
    }

    pub fn get(&self, config_id: &str) -> Option<&Service> {
        self.services
            .iter()
            .find(|s| s.service_config_id == config_id)
    }

    /// Every mech this worker operates, for intake discovery.
    pub fn managed_mechs(&self) -> Vec<alloy_primitives::Address> {
        self.services.iter().map(|s| s.mech_address).collect()
    }
}
