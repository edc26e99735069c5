pub mod cadc;
pub mod eso;
pub mod http;
pub mod smoka;

use crate::config::{ArchiveSettings, ResolvedConfig};
use crate::domain::Archive;
use crate::error::SkyError;
use crate::search::ArchiveBackend;
use crate::store::Store;

pub fn backend_for(
    settings: &ArchiveSettings,
    store: &Store,
) -> Result<Box<dyn ArchiveBackend>, SkyError> {
    Ok(match settings.archive {
        Archive::Cfht => Box::new(cadc::CadcBackend::new(settings)?),
        Archive::Eso => Box::new(eso::EsoBackend::new(settings)?),
        Archive::Smoka => Box::new(smoka::SmokaBackend::new(
            settings,
            store.obslog_cache_dir(),
        )?),
    })
}

/// HTTP backends for every enabled archive.
pub fn build_backends(
    config: &ResolvedConfig,
    store: &Store,
) -> Result<Vec<Box<dyn ArchiveBackend>>, SkyError> {
    config
        .enabled_archives()
        .map(|settings| backend_for(settings, store))
        .collect()
}
