use eyre::{
    bail,
    OptionExt as _,
    Result,
};
use url::Url;

pub const DEFAULT_DISPLAY_NAME: &str = "Assistant";

/// Everything a single recording session needs to know about the room it
/// joins.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub display_name: String,
    pub room_url: Url,
    pub app_config: super::Config,
}

impl SessionConfig {
    pub fn new(config: &super::Config) -> Result<Self> {
        let room_url = config.url.clone().ok_or_eyre("No room URL provided")?;
        if room_url.host_str().is_none() {
            bail!("Room URL {room_url} has no host");
        }

        let display_name = match config.name.trim() {
            "" => DEFAULT_DISPLAY_NAME.to_string(),
            name => name.to_string(),
        };

        Ok(Self {
            display_name,
            room_url,
            app_config: config.clone(),
        })
    }

    /// Host the room lives on. Navigation away from it means an external
    /// login is in progress.
    pub fn room_host(&self) -> &str {
        self.room_url.host_str().unwrap_or_default()
    }

    pub fn room_origin(&self) -> String {
        self.room_url.origin().unicode_serialization()
    }

    pub fn is_room_url(&self, url: &Url) -> bool {
        url.host_str() == Some(self.room_host())
    }
}
