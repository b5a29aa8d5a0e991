use eyre::{
    Context as _,
    Result,
};
use std::path::{
    Path,
    PathBuf,
};
use temp_dir::TempDir;

#[derive(Debug)]
pub enum UserDataDir {
    /// Use a temporary directory for user data. Will be deleted on drop.
    Temp { temp_dir: TempDir, user_data_dir: PathBuf },
    /// Use a custom directory for user data that outlives the session.
    Custom(PathBuf),
}

impl AsRef<Path> for UserDataDir {
    fn as_ref(&self) -> &Path {
        match self {
            UserDataDir::Temp { user_data_dir, .. } => user_data_dir,
            UserDataDir::Custom(user_data_dir) => user_data_dir,
        }
    }
}

impl UserDataDir {
    pub fn temporary() -> Result<Self> {
        let temp_dir = TempDir::with_prefix("meet-recorder").context("Failed to create temp dir")?;
        let user_data_dir = temp_dir.path().to_path_buf();
        Ok(Self::Temp {
            temp_dir,
            user_data_dir,
        })
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, UserDataDir::Custom(_))
    }
}

#[derive(Debug)]
pub struct BrowserConfig {
    pub user_data_dir: UserDataDir,
    pub headless: bool,
}

impl BrowserConfig {
    pub fn new(config: &super::SessionConfig) -> Result<Self> {
        let app_config = &config.app_config;
        let user_data_dir = match (&app_config.user_data_dir, app_config.persistent_profile) {
            (Some(dir), true) => UserDataDir::Custom(dir.clone()),
            (None, true) => UserDataDir::Custom(app_config.data_dir().join("user_data")),
            (_, false) => UserDataDir::temporary()?,
        };

        Ok(Self {
            user_data_dir,
            headless: app_config.headless,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Config,
        SessionConfig,
    };

    fn session_config(persistent_profile: bool) -> SessionConfig {
        let config = Config {
            url: Some("https://meet.google.com/abc-defg-hij".parse().unwrap()),
            persistent_profile,
            user_data_dir: Some(PathBuf::from("profile")),
            ..Config::default()
        };
        SessionConfig::new(&config).unwrap()
    }

    #[test]
    fn persistent_profile_uses_configured_dir() {
        let browser_config = BrowserConfig::new(&session_config(true)).unwrap();
        assert!(browser_config.user_data_dir.is_persistent());
        assert_eq!(browser_config.user_data_dir.as_ref(), Path::new("profile"));
    }

    #[test]
    fn ephemeral_profile_uses_temp_dir() {
        let browser_config = BrowserConfig::new(&session_config(false)).unwrap();
        assert!(!browser_config.user_data_dir.is_persistent());
        assert!(browser_config.user_data_dir.as_ref().exists());
    }
}
