use std::path::Path;

use cu::pre::*;
use embercc_front::{Options, Platform};

/// TOML configuration of the compiler driver
///
/// The `[limits]` keys are the recursion/iteration caps of the template
/// engine; they are tunables, not constants.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetConfig {
    pub platform: Platform,
    pub pointer_width: u32,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            platform: Platform::Linux,
            pointer_width: 8,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LimitsConfig {
    pub recursion_cap: u32,
    pub iteration_budget: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            recursion_cap: 64,
            iteration_budget: 10000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TemplatesConfig {
    #[serde(default)]
    pub lazy_instantiation: bool,
}

impl Config {
    /// Load config from a file; a missing path yields the defaults
    pub fn load(path: Option<&str>) -> cu::Result<Self> {
        let Some(path) = path else {
            return Ok(Self {
                target: TargetConfig::default(),
                limits: LimitsConfig::default(),
                templates: TemplatesConfig::default(),
            });
        };
        let path = Path::new(path);
        let file_content = cu::fs::read_string(path)?;
        let config = toml::parse::<Config>(&file_content)?;

        match config.target.pointer_width {
            4 | 8 => {}
            _ => cu::bail!("invalid config.target.pointer-width. must be 4 or 8"),
        }
        if config.limits.recursion_cap == 0 {
            cu::bail!("config.limits.recursion-cap must be nonzero");
        }
        if config.limits.iteration_budget == 0 {
            cu::bail!("config.limits.iteration-budget must be nonzero");
        }
        Ok(config)
    }

    pub fn to_options(&self) -> Options {
        Options {
            recursion_cap: self.limits.recursion_cap,
            iteration_budget: self.limits.iteration_budget,
            lazy_instantiation: self.templates.lazy_instantiation,
            platform: self.target.platform,
            ptr_width: self.target.pointer_width,
        }
    }
}
