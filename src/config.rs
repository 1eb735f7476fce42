use std::env;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_PLATFORM_BASE_URL: &str = "https://api.freshchat.com/v2";
const DEFAULT_ASSISTANT_BASE_URL: &str = "https://api.openai.com/v1";

/// Process configuration, read once at startup. The base URLs exist so tests
/// can point both clients at local mock servers; production deployments leave
/// them unset.
#[derive(Debug, Clone)]
pub struct Config {
    pub chat_platform_api_key: String,
    pub openai_api_key: String,
    pub assistant_id: String,
    pub port: u16,
    pub chat_platform_base_url: String,
    pub assistant_base_url: String,
}

fn required_var(name: &str) -> Result<String, String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(format!("{name} is not configured")),
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            chat_platform_api_key: required_var("CHAT_PLATFORM_API_KEY")?,
            openai_api_key: required_var("OPENAI_API_KEY")?,
            assistant_id: required_var("ASSISTANT_ID")?,
            port: env::var("PORT")
                .ok()
                .and_then(|value| value.parse::<u16>().ok())
                .unwrap_or(DEFAULT_PORT),
            chat_platform_base_url: var_or("CHAT_PLATFORM_BASE_URL", DEFAULT_PLATFORM_BASE_URL),
            assistant_base_url: var_or("ASSISTANT_BASE_URL", DEFAULT_ASSISTANT_BASE_URL),
        })
    }
}
