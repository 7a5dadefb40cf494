//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务监听地址
//! - 消息路由器（队列容量、溢出与停机策略、处理器超时）
//! - 分级限流配额
//! - 消息校验限制
//! - 日志级别
//!
//! 加载顺序：默认值 → 可选配置文件（`APP_CONFIG_FILE`）→ 环境变量（`APP_*`，
//! 嵌套字段以 `__` 分隔，例如 `APP_RATE_LIMIT__NORMAL=50`）。

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,
    #[serde(default)]
    #[validate(nested)]
    pub router: RouterSettings,
    #[serde(default)]
    #[validate(nested)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    #[validate(nested)]
    pub validation: ValidationSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

/// 队列满时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowMode {
    Reject,
    #[default]
    DropOldestLower,
}

/// 停机时队列中剩余消息的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    #[default]
    Drain,
    Discard,
}

/// 路由器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RouterSettings {
    #[validate(range(min = 1))]
    pub queue_capacity: usize,
    pub overflow_policy: OverflowMode,
    pub shutdown_policy: ShutdownMode,
    #[validate(range(min = 1))]
    pub idle_tick_ms: u64,
    /// 0 表示不限制处理器执行时间
    pub handler_timeout_ms: u64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            overflow_policy: OverflowMode::default(),
            shutdown_policy: ShutdownMode::default(),
            idle_tick_ms: 500,
            handler_timeout_ms: 10_000,
        }
    }
}

/// 分级限流配置，配额为每个时间窗口内的消息数
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RateLimitSettings {
    #[validate(range(min = 1))]
    pub window_secs: u64,
    pub urgent: u32,
    pub high: u32,
    pub normal: u32,
    pub low: u32,
    #[validate(range(min = 1))]
    pub max_tracked_users: usize,
    #[validate(range(min = 1))]
    pub max_connections_per_user: u32,
    #[validate(range(min = 1))]
    pub cleanup_interval_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_secs: 60,
            urgent: 10,
            high: 20,
            normal: 30,
            low: 60,
            max_tracked_users: 50_000,
            max_connections_per_user: 5,
            cleanup_interval_secs: 300,
        }
    }
}

/// 消息校验限制
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ValidationSettings {
    #[validate(range(min = 1))]
    pub max_text_length: usize,
    #[validate(range(min = 1))]
    pub max_file_size_bytes: u64,
    #[validate(length(min = 1), custom(function = "validate_extensions"))]
    pub allowed_file_extensions: Vec<String>,
    #[validate(range(min = 2))]
    pub max_poll_options: usize,
    pub max_reason_length: usize,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            max_text_length: 4_000,
            max_file_size_bytes: 100 * 1024 * 1024,
            allowed_file_extensions: domain::default_allowed_extensions(),
            max_poll_options: 10,
            max_reason_length: 200,
        }
    }
}

/// 可执行文件与脚本永远不允许出现在白名单中
const FORBIDDEN_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "msi", "scr", "sh", "ps1", "vbs", "js", "jar", "dll", "svg",
    "html", "htm",
];

fn validate_extensions(extensions: &[String]) -> Result<(), ValidationError> {
    for extension in extensions {
        let normalized = extension.trim_start_matches('.').to_ascii_lowercase();
        if normalized.is_empty() || FORBIDDEN_EXTENSIONS.contains(&normalized.as_str()) {
            let mut error = ValidationError::new("forbidden_extension");
            error.add_param("extension".into(), extension);
            return Err(error);
        }
    }
    Ok(())
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `RUST_LOG` 未设置时使用的过滤级别
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl AppConfig {
    /// 按 默认值 → 配置文件 → 环境变量 的优先级加载
    pub fn load() -> Result<Self, ConfigError> {
        let mut fig = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            fig = merge_file(fig, &path);
        }
        Self::extract(fig.merge(Env::prefixed("APP_").split("__")))
    }

    /// 从指定文件加载（仍然叠加环境变量）
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let fig = merge_file(
            Figment::new().merge(Serialized::defaults(AppConfig::default())),
            path,
        );
        Self::extract(fig.merge(Env::prefixed("APP_").split("__")))
    }

    /// 解析 TOML/YAML/JSON 字符串，按简单规则判断格式
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let base = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        let trimmed = s.trim_start();
        let fig = if trimmed.starts_with('{') {
            base.merge(Json::string(s))
        } else if trimmed.starts_with('[') || s.contains('=') {
            base.merge(Toml::string(s))
        } else {
            base.merge(Yaml::string(s))
        };
        Self::extract(fig)
    }

    fn extract(fig: Figment) -> Result<Self, ConfigError> {
        let cfg: AppConfig = fig.extract().map_err(Box::new)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn merge_file(fig: Figment, path: &str) -> Figment {
    if path.ends_with(".yml") || path.ends_with(".yaml") {
        fig.merge(Yaml::file(path))
    } else if path.ends_with(".json") {
        fig.merge(Json::file(path))
    } else {
        fig.merge(Toml::file(path))
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.router.queue_capacity, 10_000);
        assert_eq!(config.router.overflow_policy, OverflowMode::DropOldestLower);
        assert_eq!(config.rate_limit.normal, 30);
        assert_eq!(config.validation.max_text_length, 4_000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_str(
            r#"
[router]
queue_capacity = 64
overflow_policy = "reject"
shutdown_policy = "discard"

[rate_limit]
normal = 5
"#,
        )
        .unwrap();

        assert_eq!(config.router.queue_capacity, 64);
        assert_eq!(config.router.overflow_policy, OverflowMode::Reject);
        assert_eq!(config.router.shutdown_policy, ShutdownMode::Discard);
        assert_eq!(config.router.idle_tick_ms, 500);
        assert_eq!(config.rate_limit.normal, 5);
        assert_eq!(config.rate_limit.urgent, 10);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_yaml_and_json_sources() {
        let yaml = AppConfig::from_str("server:\n  host: 0.0.0.0\n  port: 9000\n").unwrap();
        assert_eq!(yaml.server.host, "0.0.0.0");
        assert_eq!(yaml.server.port, 9000);

        let json = AppConfig::from_str(r#"{"logging": {"level": "debug"}}"#).unwrap();
        assert_eq!(json.logging.level, "debug");
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let result = AppConfig::from_str("[router]\nqueue_capacity = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_executable_extension() {
        let mut config = AppConfig::default();
        config.validation.allowed_file_extensions.push("EXE".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_extensions_match_domain_and_exclude_scripts() {
        let config = AppConfig::default();
        assert_eq!(
            config.validation.allowed_file_extensions,
            domain::default_allowed_extensions()
        );
        assert!(!config.validation.allowed_file_extensions.contains(&"svg".to_string()));

        for scriptable in ["svg", "html", ".HTM"] {
            let mut config = AppConfig::default();
            config.validation.allowed_file_extensions.push(scriptable.into());
            assert!(config.validate().is_err(), "{scriptable} should be refused");
        }
    }

    #[test]
    fn test_env_overrides_file_values() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("app.toml", "[rate_limit]\nlow = 7\nhigh = 3\n")?;
            jail.set_env("APP_CONFIG_FILE", "app.toml");
            jail.set_env("APP_RATE_LIMIT__HIGH", "12");

            let config = AppConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.rate_limit.low, 7);
            assert_eq!(config.rate_limit.high, 12);
            Ok(())
        });
    }
}
