#[macro_use]
extern crate tracing;

mod app_config;
mod args;
mod browser_config;
mod session_config;
mod timings;

pub use app_config::{
    get_config_dir,
    get_data_dir,
    AppConfig,
};
pub use args::Args;
pub use browser_config::{
    BrowserConfig,
    UserDataDir,
};
use serde::{
    Deserialize,
    Serialize,
};
pub use session_config::{
    SessionConfig,
    DEFAULT_DISPLAY_NAME,
};
use std::path::{
    Path,
    PathBuf,
};
pub use timings::Timings;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten, skip_serializing)]
    pub app_config: AppConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<url::Url>,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub headless: bool,
    /// Leave the room once the bot is the only participant left.
    #[serde(default)]
    pub auto_exit: bool,
    /// Keep the browser profile between runs so a login survives.
    #[serde(default)]
    pub persistent_profile: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_dir: Option<PathBuf>,
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: PathBuf,
    #[serde(default)]
    pub timings: Timings,
}

const DEFAULT_CONFIG: &str = include_str!("default-config.yaml");

fn default_name() -> String {
    DEFAULT_DISPLAY_NAME.to_string()
}

fn default_recordings_dir() -> PathBuf {
    PathBuf::from("recordings")
}

impl Default for Config {
    fn default() -> Self {
        serde_yml::from_str(DEFAULT_CONFIG).expect("Failed to parse default config")
    }
}

impl Config {
    /// Layers the embedded defaults, the optional `config.yaml` of the config
    /// directory and the command line arguments, in that order.
    pub fn new(args: Args) -> Result<Self, config::ConfigError> {
        let data_dir = get_data_dir();
        let config_dir = get_config_dir();
        let mut builder = config::Config::builder()
            .set_default("data_dir", data_dir.display().to_string())?
            .set_default("config_dir", config_dir.display().to_string())?;

        builder = builder.add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Yaml));

        let config_files = [("config.yaml", config::FileFormat::Yaml)];

        for (file, format) in &config_files {
            let source = config::File::from(config_dir.join(file))
                .format(*format)
                .required(false);
            builder = builder.add_source(source);
        }

        builder = builder.add_source(args);

        let cfg: Self = builder.build()?.try_deserialize()?;

        debug!(?cfg, "Loaded configuration");

        Ok(cfg)
    }

    pub fn data_dir(&self) -> &Path {
        &self.app_config.data_dir
    }
}
