use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use patchworld_core::{BlockArea, CellSize, ConfigurationError};
use patchworld_system_donor::donor_cell_range;
use patchworld_system_scheduler::Config as SchedulerConfig;
use serde::Deserialize;

/// Engine settings read from a TOML file; every key has a default.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct EngineConfig {
    /// Cell dimensions.
    pub(crate) grid: GridSection,
    /// Donor range and selection policy.
    pub(crate) donor: DonorSection,
    /// Copy behaviour.
    pub(crate) copy: CopySection,
    /// Per-cycle budgets and cadence.
    pub(crate) performance: PerformanceSection,
    /// Pregeneration and proximity triggers.
    pub(crate) generation: GenerationSection,
    /// Source and target world setup.
    pub(crate) worlds: WorldsSection,
}

/// `[grid]`
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct GridSection {
    pub(crate) cell_width: i32,
    pub(crate) cell_length: i32,
}

impl Default for GridSection {
    fn default() -> Self {
        Self {
            cell_width: 16,
            cell_length: 16,
        }
    }
}

/// `[donor]`
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct DonorSection {
    pub(crate) min_x: i32,
    pub(crate) max_x: i32,
    pub(crate) min_z: i32,
    pub(crate) max_z: i32,
    pub(crate) prefer_land_attempts: u32,
    pub(crate) seed: u64,
}

impl Default for DonorSection {
    fn default() -> Self {
        Self {
            min_x: -256,
            max_x: 255,
            min_z: -256,
            max_z: 255,
            prefer_land_attempts: 96,
            seed: 0x5eed,
        }
    }
}

/// `[copy]`
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct CopySection {
    pub(crate) copy_biomes: bool,
    pub(crate) bulk: bool,
}

impl Default for CopySection {
    fn default() -> Self {
        Self {
            copy_biomes: true,
            bulk: false,
        }
    }
}

/// `[performance]`
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct PerformanceSection {
    pub(crate) max_units_per_cycle: usize,
    pub(crate) max_queued: usize,
    pub(crate) cycle_interval_ms: u64,
    pub(crate) check_interval_ms: u64,
}

impl Default for PerformanceSection {
    fn default() -> Self {
        Self {
            max_units_per_cycle: 4096,
            max_queued: 64,
            cycle_interval_ms: 50,
            check_interval_ms: 250,
        }
    }
}

/// `[generation]`
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct GenerationSection {
    pub(crate) pregen_radius: i32,
    pub(crate) edge_trigger_distance: i32,
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            pregen_radius: 1,
            edge_trigger_distance: 8,
        }
    }
}

/// `[worlds]`
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct WorldsSection {
    pub(crate) target_name: String,
    pub(crate) target_identity: String,
    pub(crate) source_min_height: i32,
    pub(crate) source_max_height: i32,
    pub(crate) target_min_height: i32,
    pub(crate) target_max_height: i32,
    pub(crate) terrain_seed: u64,
    pub(crate) sea_level: i32,
}

impl Default for WorldsSection {
    fn default() -> Self {
        Self {
            target_name: "patchworld".to_owned(),
            target_identity: "patchworld-0001".to_owned(),
            source_min_height: 0,
            source_max_height: 64,
            target_min_height: 0,
            target_max_height: 64,
            terrain_seed: 7,
            sea_level: 32,
        }
    }
}

/// Typed values derived from an [`EngineConfig`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Settings {
    pub(crate) size: CellSize,
    pub(crate) donor_range: BlockArea,
    pub(crate) scheduler: SchedulerConfig,
    pub(crate) cycle_interval: Duration,
    pub(crate) check_interval: Duration,
}

impl EngineConfig {
    /// Reads the configuration at `path`, or the defaults when no path is given.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Parses a TOML document.
    pub(crate) fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Converts the raw settings into validated engine values.
    ///
    /// Nothing is touched on disk; every configuration failure surfaces here.
    pub(crate) fn validate(&self) -> Result<Settings, ConfigurationError> {
        let size = CellSize::new(self.grid.cell_width, self.grid.cell_length)?;
        let scheduler = SchedulerConfig::new(
            self.performance.max_units_per_cycle,
            self.performance.max_queued,
        )?;
        let donor_range = BlockArea::new(
            self.donor.min_x,
            self.donor.max_x,
            self.donor.min_z,
            self.donor.max_z,
        );
        let _ = donor_cell_range(donor_range, size)?;
        Ok(Settings {
            size,
            donor_range,
            scheduler,
            cycle_interval: Duration::from_millis(self.performance.cycle_interval_ms.max(1)),
            check_interval: Duration::from_millis(self.performance.check_interval_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let settings = EngineConfig::default().validate().expect("valid defaults");
        assert_eq!(settings.size, CellSize::new(16, 16).expect("valid size"));
        assert_eq!(settings.scheduler.max_queued(), 64);
        assert_eq!(settings.cycle_interval, Duration::from_millis(50));
    }

    #[test]
    fn partial_documents_fall_back_to_defaults() {
        let config = EngineConfig::parse(
            r#"
            [grid]
            cell_width = 32

            [worlds]
            target_identity = "abc"
            "#,
        )
        .expect("parse");
        assert_eq!(config.grid.cell_width, 32);
        assert_eq!(config.grid.cell_length, 16);
        assert_eq!(config.worlds.target_identity, "abc");
        assert_eq!(config.worlds.target_name, "patchworld");
        assert_eq!(config.performance, PerformanceSection::default());
    }

    #[test]
    fn sample_config_matches_defaults() {
        let config = EngineConfig::parse(include_str!("../patchworld.toml")).expect("parse");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(EngineConfig::parse("[grid]\ncell_widht = 4\n").is_err());
    }

    #[test]
    fn invalid_values_surface_configuration_errors() {
        let mut config = EngineConfig::default();
        config.grid.cell_length = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::NonPositiveCellSize {
                width: 16,
                length: 0
            })
        );

        let mut config = EngineConfig::default();
        config.performance.max_units_per_cycle = 0;
        assert_eq!(config.validate(), Err(ConfigurationError::ZeroBudget));
    }

    #[test]
    fn undersized_donor_range_is_rejected_before_startup() {
        let mut config = EngineConfig::default();
        config.donor.min_x = 0;
        config.donor.max_x = 14;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::DonorRangeTooSmall { .. })
        ));

        config.donor.max_x = 15;
        assert!(config.validate().is_ok());
    }
}
