use crate::provider::{LocalProvider, Provider, SupabaseProvider};
use std::{env, path::PathBuf, sync::Arc};
use tracing::{info, warn};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SESSION_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderConfig {
    Supabase {
        url: String,
        key: String,
    },
    Local {
        data_path: Option<PathBuf>,
        session_ttl_secs: i64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub provider: ProviderConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("LEDGER_PROVIDER=supabase needs SUPABASE_URL and SUPABASE_KEY")]
    MissingSupabase,
    #[error("unknown LEDGER_PROVIDER '{0}', expected 'supabase' or 'local'")]
    UnknownProvider(String),
    #[error("invalid SUPABASE_URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Config {
    /// Reads the process environment, after loading `.env` when one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = var("PORT")
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);

        let supabase = match (var("SUPABASE_URL"), var("SUPABASE_KEY")) {
            (Some(url), Some(key)) => Some(ProviderConfig::Supabase { url, key }),
            _ => None,
        };
        let local = ProviderConfig::Local {
            data_path: var("LEDGER_DATA_PATH").map(PathBuf::from),
            session_ttl_secs: var("LEDGER_SESSION_TTL_SECS")
                .and_then(|value| value.parse::<i64>().ok())
                .unwrap_or(DEFAULT_SESSION_TTL_SECS),
        };

        let provider = match var("LEDGER_PROVIDER").map(|v| v.to_lowercase()).as_deref() {
            Some("supabase") => supabase.ok_or(ConfigError::MissingSupabase)?,
            Some("local") => local,
            Some(other) => return Err(ConfigError::UnknownProvider(other.to_string())),
            None => match supabase {
                Some(supabase) => supabase,
                None => {
                    warn!("SUPABASE_URL/SUPABASE_KEY not set, using the local provider");
                    local
                }
            },
        };

        Ok(Self { port, provider })
    }
}

impl ProviderConfig {
    pub async fn build(&self) -> Result<Arc<dyn Provider>, ConfigError> {
        match self {
            Self::Supabase { url, key } => {
                info!("using supabase provider at {url}");
                Ok(Arc::new(SupabaseProvider::new(url, key.clone())?))
            }
            Self::Local {
                data_path,
                session_ttl_secs,
            } => {
                let ttl = chrono::Duration::seconds(*session_ttl_secs);
                let provider = match data_path {
                    Some(path) => LocalProvider::open(path.clone(), ttl).await,
                    None => {
                        info!("using in-memory local provider");
                        LocalProvider::new(ttl)
                    }
                };
                Ok(Arc::new(provider))
            }
        }
    }
}
