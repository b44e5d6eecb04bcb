use crate::errors::AppError;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Ollama,
    OpenAi,
}

impl TryFrom<&str> for LlmProvider {
    type Error = AppError;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(LlmProvider::Ollama),
            "openai" => Ok(LlmProvider::OpenAi),
            other => Err(AppError::InvalidConfig {
                key: "LLM_PROVIDER".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub preamble: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// When absent, topics live in memory for the lifetime of the process.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub llm: LlmConfig,
    pub cors_allow_origin: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = parse_or(&get, "PORT", DEFAULT_PORT)?;
        let database_max_connections =
            parse_or(&get, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;

        let provider = match get("LLM_PROVIDER") {
            Some(value) => LlmProvider::try_from(value.as_str())?,
            None => LlmProvider::Ollama,
        };
        let (default_base_url, default_model) = match provider {
            LlmProvider::Ollama => (DEFAULT_OLLAMA_BASE_URL, DEFAULT_OLLAMA_MODEL),
            LlmProvider::OpenAi => (DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL),
        };
        let api_key = get("LLM_API_KEY");
        if provider == LlmProvider::OpenAi && api_key.is_none() {
            return Err(AppError::MissingConfig { key: "LLM_API_KEY".to_string() });
        }

        let llm = LlmConfig {
            provider,
            base_url: get("LLM_BASE_URL").unwrap_or_else(|| default_base_url.to_string()),
            api_key,
            model: get("LLM_MODEL").unwrap_or_else(|| default_model.to_string()),
            preamble: get("LLM_PREAMBLE"),
        };

        Ok(Self {
            port,
            database_url: get("DATABASE_URL"),
            database_max_connections,
            llm,
            cors_allow_origin: get("CORS_ALLOW_ORIGIN"),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, AppError> {
    match get(key) {
        Some(value) => value
            .parse()
            .map_err(|_| AppError::InvalidConfig { key: key.to_string(), value }),
        None => Ok(default),
    }
}
