use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use appointment_cell::{Clinic, InMemoryClinicDirectory, Service};

/// On-disk clinic catalog.
#[derive(Debug, Default, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub clinics: Vec<Clinic>,
    #[serde(default)]
    pub services: Vec<Service>,
}

pub async fn load_directory(path: Option<&str>) -> anyhow::Result<InMemoryClinicDirectory> {
    let catalog = match path {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read clinic catalog {}", path))?;
            parse_catalog(&raw).with_context(|| format!("invalid clinic catalog {}", path))?
        }
        None => Catalog::default(),
    };

    info!(
        "Loaded {} clinics and {} services",
        catalog.clinics.len(),
        catalog.services.len()
    );
    Ok(InMemoryClinicDirectory::with_catalog(catalog.clinics, catalog.services))
}

fn parse_catalog(raw: &str) -> anyhow::Result<Catalog> {
    Ok(serde_json::from_str(raw)?)
}
