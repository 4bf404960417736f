//! C8: authenticates the runtime against configured container registries at
//! startup. A failed login is logged and skipped — other registries, or
//! anonymous pulls, may still be usable.

use std::sync::Arc;

use crate::config::RegistryCredential;
use crate::runtime::ContainerRuntime;

pub async fn login_to_registries(
    runtime: &Arc<dyn ContainerRuntime>,
    registries: &[RegistryCredential],
) {
    for reg in registries {
        match runtime.login(&reg.registry, &reg.username, &reg.password).await {
            Ok(()) => log::debug!("logged in to registry {}", reg.registry),
            Err(e) => log::warn!("failed to log in to registry {}: {}", reg.registry, e),
        }
    }
}
