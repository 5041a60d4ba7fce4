use dataflow::evaluation::{EvaluationMode, EvaluationSettings};
use dataflow::simulation::{ActorSpec, GeneratorSettings, SimulationConfig, Transform};
use directories::ProjectDirs;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct EvaluationSection {
    pub mode: EvaluationMode,
    pub threaded: bool,
    pub enable_graph_eval: bool,
    pub perf_data: bool,
}

impl Default for EvaluationSection {
    fn default() -> Self {
        let settings = EvaluationSettings::default();
        Self {
            mode: EvaluationMode::Automatic,
            threaded: settings.threaded,
            enable_graph_eval: settings.enable_graph_eval,
            perf_data: settings.perf_data,
        }
    }
}

impl EvaluationSection {
    pub fn settings(&self) -> EvaluationSettings {
        EvaluationSettings {
            enable_graph_eval: self.enable_graph_eval,
            threaded: self.threaded,
            perf_data: self.perf_data,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GeneratorSection {
    pub stall_timeout_secs: f64,
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            stall_timeout_secs: GeneratorSettings::default().stall_timeout.as_secs_f64(),
        }
    }
}

impl GeneratorSection {
    pub fn settings(&self) -> GeneratorSettings {
        let secs = if self.stall_timeout_secs.is_finite() && self.stall_timeout_secs > 0.0 {
            self.stall_timeout_secs
        } else {
            warn!(
                "Ignoring invalid stall_timeout_secs {}, using the default",
                self.stall_timeout_secs
            );
            return GeneratorSettings::default();
        };
        GeneratorSettings {
            stall_timeout: Duration::from_secs_f64(secs),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub evaluation: EvaluationSection,
    pub simulation: SimulationConfig,
    pub actor: ActorSpec,
    pub generator: GeneratorSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            evaluation: EvaluationSection::default(),
            simulation: SimulationConfig::default(),
            actor: ActorSpec {
                blueprint_class: "DampedSpring".to_string(),
                transform: Transform::default(),
                skeletal_mesh_visible: false,
                cache_destination: "spring_cache.json".to_string(),
            },
            generator: GeneratorSection::default(),
        }
    }
}

fn get_config_path() -> Option<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from("org", "dataflow", "dataflow") {
        let config_dir = proj_dirs.config_dir();
        if !config_dir.exists() {
            if let Err(e) = fs::create_dir_all(config_dir) {
                error!("Failed to create config directory: {}", e);
                return None;
            }
        }
        return Some(config_dir.join("dataflow.toml"));
    }
    None
}

fn read_config(path: &Path) -> Option<AppConfig> {
    match fs::read_to_string(path) {
        Ok(toml_str) => match toml::from_str(&toml_str) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                Some(config)
            }
            Err(e) => {
                warn!("Failed to parse config file, using defaults: {}", e);
                None
            }
        },
        Err(e) => {
            warn!("Failed to read config file, using defaults: {}", e);
            None
        }
    }
}

/// Load from `explicit` if given, otherwise from the platform config
/// directory. Missing or malformed files fall back to defaults.
pub fn load_config(explicit: Option<&Path>) -> AppConfig {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => get_config_path().filter(|p| p.exists()),
    };
    path.and_then(|p| read_config(&p)).unwrap_or_default()
}

pub fn save_config(config: &AppConfig) {
    if let Some(path) = get_config_path() {
        match toml::to_string_pretty(config) {
            Ok(toml_str) => {
                if let Err(e) = fs::write(&path, toml_str) {
                    error!("Failed to write config file: {}", e);
                } else {
                    info!("Configuration saved to {}", path.display());
                }
            }
            Err(e) => {
                error!("Failed to serialize config: {}", e);
            }
        }
    }
}
