// ============================================================================
// config.rs — TriEvo
// Evolution parameters, coordinate convention, and window configuration.
// ============================================================================

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Where pixel-space y = 0 lies relative to the decoded reference rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// y = 0 is the first decoded row (top of the image).
    #[default]
    TopLeft,
    /// y = 0 is the last decoded row.
    BottomLeft,
}

impl Origin {
    /// Flag value handed to the kernels.
    pub fn flip_flag(self) -> u32 {
        match self {
            Origin::TopLeft => 0,
            Origin::BottomLeft => 1,
        }
    }
}

/// Parameters of one refinement tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolverConfig {
    pub population_size: usize,
    pub rounds: u32,
    pub survivors: usize,
    /// Vertex perturbation bound as a fraction of the image width/height.
    pub mutation_fraction: f32,
    pub initial_color: [f32; 4],
    pub seed: Option<u64>,
    pub origin: Origin,
}

impl Default for EvolverConfig {
    fn default() -> Self {
        Self {
            population_size: 1024,
            rounds: 50,
            survivors: 4,
            mutation_fraction: 0.01,
            initial_color: [1.0, 1.0, 1.0, 1.0],
            seed: None,
            origin: Origin::TopLeft,
        }
    }
}

impl EvolverConfig {
    pub fn load_json(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.population_size == 0 {
            return Err(EngineError::EmptyPopulation);
        }
        if self.survivors == 0 || self.survivors > self.population_size {
            return Err(EngineError::InvalidConfig(format!(
                "survivors must be in 1..={}, got {}",
                self.population_size, self.survivors
            )));
        }
        if self.rounds == 0 {
            return Err(EngineError::InvalidConfig("rounds must be at least 1".into()));
        }
        if !self.mutation_fraction.is_finite() || self.mutation_fraction <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "mutation_fraction must be positive, got {}",
                self.mutation_fraction
            )));
        }
        Ok(())
    }

    /// Maximum vertex offset per axis for an image of `width` x `height`.
    pub fn mutation_bounds(&self, width: u32, height: u32) -> (i32, i32) {
        let bx = (self.mutation_fraction as f64 * width as f64).ceil() as i32;
        let by = (self.mutation_fraction as f64 * height as f64).ceil() as i32;
        (bx.max(1), by.max(1))
    }
}

/// Window and display settings.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub title: String,
    pub window_size: (u32, u32),
    pub clear_color: [f64; 3],
    pub auto_advance: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: String::from("Image Generator"),
            window_size: (640, 480),
            clear_color: [0.15, 0.2, 0.3],
            auto_advance: false,
        }
    }
}
