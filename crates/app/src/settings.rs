use kairos_core::config::AppConfig;
use std::path::Path;
use thiserror::Error;

/// 未指定时读取的配置文件
pub const DEFAULT_CONFIG_PATH: &str = "config/kairos.toml";

/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "KAIROS_CONFIG";

/// 覆盖单个配置项的环境变量前缀，如 `KAIROS__BATCH__WINDOW_MS=250`
const ENV_PREFIX: &str = "KAIROS";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load config: {0}")]
    Load(#[from] config::ConfigError),
    #[error(transparent)]
    Invalid(#[from] kairos_core::config::ConfigError),
}

/// # Summary
/// 加载并校验应用配置。
///
/// # Logic
/// 1. 以 `AppConfig` 的默认值为底。
/// 2. 叠加配置文件（可以不存在）。
/// 3. 叠加 `KAIROS__` 前缀的环境变量，层级用 `__` 分隔。
/// 4. 反序列化后调用 `AppConfig::validate`。
///
/// # Arguments
/// * `path` - 配置文件路径，格式按扩展名识别。
pub fn load(path: &Path) -> Result<AppConfig, SettingsError> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = settings.try_deserialize()?;
    app_config.validate()?;
    Ok(app_config)
}
