//! Volume selection
//!
//! The migrator hands the discovered volumes to a [`VolumeSelector`] in
//! interactive mode. [`DialoguerSelector`] is the terminal implementation.

use async_trait::async_trait;
use dialoguer::theme::ColorfulTheme;
use dialoguer::MultiSelect;
use tracing::info;

use crate::docker::{format_bytes, Volume};
use crate::error::{MigrateError, Result};

/// Outcome of an interactive selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Non-empty subset, in discovery order
    Chosen(Vec<Volume>),
    /// User aborted the prompt
    Cancelled,
}

/// Chooses the volumes to migrate
#[async_trait]
pub trait VolumeSelector: Send + Sync {
    async fn select(&self, volumes: Vec<Volume>) -> Result<Selection>;
}

/// One line per volume: `name (container) mount size`
pub fn volume_label(volume: &Volume) -> String {
    format!(
        "{} ({}) {} {}",
        volume.name, volume.container, volume.mount_path, volume.size
    )
}

/// Sum of the known volume sizes
pub fn total_size(volumes: &[Volume]) -> u64 {
    volumes.iter().map(|v| v.size_bytes).sum()
}

/// Log the volumes about to be migrated
pub fn display_volumes(volumes: &[Volume]) {
    info!("Volumes to migrate ({}):", volumes.len());
    for volume in volumes {
        info!("  {}", volume_label(volume));
    }
    info!("Total size: {}", format_bytes(total_size(volumes)));
}

/// Keep the volumes at `indices`, preserving discovery order
pub fn pick(volumes: Vec<Volume>, indices: &[usize]) -> Result<Selection> {
    let chosen: Vec<Volume> = volumes
        .into_iter()
        .enumerate()
        .filter(|(i, _)| indices.contains(i))
        .map(|(_, v)| v)
        .collect();

    if chosen.is_empty() {
        return Err(MigrateError::Selection("no volumes selected".to_string()));
    }
    Ok(Selection::Chosen(chosen))
}

/// Terminal multi-select with every volume pre-selected
#[derive(Debug, Clone, Default)]
pub struct DialoguerSelector;

impl DialoguerSelector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VolumeSelector for DialoguerSelector {
    async fn select(&self, volumes: Vec<Volume>) -> Result<Selection> {
        if volumes.is_empty() {
            return Err(MigrateError::Selection("no volumes to select".to_string()));
        }

        let labels: Vec<String> = volumes.iter().map(volume_label).collect();
        let prompt = format!(
            "Select volumes to migrate ({} discovered, {} total; Space toggles, Enter confirms, Esc cancels)",
            volumes.len(),
            format_bytes(total_size(&volumes))
        );

        let answer = tokio::task::spawn_blocking(move || {
            let defaults = vec![true; labels.len()];
            MultiSelect::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .items(&labels)
                .defaults(&defaults)
                .interact_opt()
        })
        .await
        .map_err(|e| MigrateError::Selection(format!("prompt task failed: {}", e)))?
        .map_err(|e| MigrateError::Selection(e.to_string()))?;

        match answer {
            Some(indices) => pick(volumes, &indices),
            None => Ok(Selection::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume(name: &str, size_bytes: u64) -> Volume {
        Volume {
            name: name.to_string(),
            container: "web".to_string(),
            mount_path: "/data".to_string(),
            size: format_bytes(size_bytes),
            size_bytes,
        }
    }

    #[test]
    fn test_volume_label() {
        assert_eq!(volume_label(&volume("db", 2048)), "db (web) /data 2.0 KB");
    }

    #[test]
    fn test_pick_preserves_order() {
        let volumes = vec![volume("a", 1), volume("b", 2), volume("c", 3)];
        match pick(volumes, &[2, 0]).unwrap() {
            Selection::Chosen(chosen) => {
                let names: Vec<_> = chosen.iter().map(|v| v.name.as_str()).collect();
                assert_eq!(names, vec!["a", "c"]);
            }
            Selection::Cancelled => panic!("expected a selection"),
        }
    }

    #[test]
    fn test_pick_nothing_is_an_error() {
        let err = pick(vec![volume("a", 1)], &[]).unwrap_err();
        assert!(matches!(err, MigrateError::Selection(_)));
    }

    #[test]
    fn test_total_size() {
        assert_eq!(total_size(&[volume("a", 1), volume("b", 2)]), 3);
    }
}
