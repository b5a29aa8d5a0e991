use clap::Parser;
use std::path::PathBuf;

/// Joins a video-conference room, records it and leaves once alone.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version = version(), about, long_about = None)]
pub struct Args {
    /// Address of the room to join.
    #[clap(value_name = "ROOM_URL")]
    pub url: Option<String>,

    /// Display name used when the room asks for one.
    #[clap(value_name = "NAME")]
    pub name: Option<String>,

    /// Run the browser without a window.
    #[clap(long, action)]
    pub headless: bool,

    /// Keep recording after everybody else has left.
    #[clap(long = "no-auto-exit", action)]
    pub no_auto_exit: bool,

    /// Use a throw-away browser profile instead of the persistent one.
    ///   - a logged in account will not be remembered
    #[clap(long = "ephemeral-profile", action)]
    pub ephemeral_profile: bool,

    /// Directory the recording is written into.
    #[clap(long = "recordings-dir", value_name = "DIR")]
    pub recordings_dir: Option<PathBuf>,

    /// Directory of the persistent browser profile.
    #[clap(long = "user-data-dir", value_name = "DIR")]
    pub user_data_dir: Option<PathBuf>,
}

mod config_ext {
    use super::*;
    use config::{
        Map,
        Source,
        Value,
    };
    use std::collections::HashMap;

    impl Source for Args {
        fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
            Box::new((*self).clone())
        }

        fn collect(&self) -> Result<Map<String, Value>, config::ConfigError> {
            let mut cache = HashMap::<String, Value>::new();
            if let Some(url) = &self.url {
                cache.insert("url".to_string(), url.clone().into());
            }
            if let Some(name) = &self.name {
                cache.insert("name".to_string(), name.clone().into());
            }
            if self.headless {
                cache.insert("headless".to_string(), true.into());
            }
            if self.no_auto_exit {
                cache.insert("auto_exit".to_string(), false.into());
            }
            if self.ephemeral_profile {
                cache.insert("persistent_profile".to_string(), false.into());
            }
            if let Some(dir) = &self.recordings_dir {
                cache.insert("recordings_dir".to_string(), dir.display().to_string().into());
            }
            if let Some(dir) = &self.user_data_dir {
                cache.insert("user_data_dir".to_string(), dir.display().to_string().into());
            }
            Ok(cache)
        }
    }
}

pub fn version() -> String {
    let version = clap::crate_version!();
    let config_dir_path = crate::get_config_dir().display().to_string();
    let data_dir_path = crate::get_data_dir().display().to_string();

    format!(
        "\
{version}

Config directory: {config_dir_path}
Data directory: {data_dir_path}"
    )
}
