use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

use crate::database::IdStrategy;
use crate::services::OwnershipPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub access: AccessConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    /// Allowed CORS origins; `*` allows any.
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    DynamoDb,
    Postgres,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(StoreBackend::Memory),
            "dynamodb" | "dynamo" => Ok(StoreBackend::DynamoDb),
            "postgres" | "postgresql" | "pg" => Ok(StoreBackend::Postgres),
            other => Err(format!("unknown store backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub table_name: String,
    pub owner_index: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub page_size: Option<u32>,
    pub id_strategy: IdStrategy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            table_name: "todos".to_string(),
            owner_index: "UserIdIndex".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            database_url: None,
            max_connections: 10,
            page_size: None,
            id_strategy: IdStrategy::Timestamp,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub jwks_url: Option<String>,
    pub jwks_path: Option<String>,
    #[serde(skip_serializing)]
    pub hs256_secret: Option<String>,
    pub leeway_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    pub ownership_mismatch: OwnershipPolicy,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let environment = match lookup("APP_ENV").as_deref() {
            Some("production") | Some("prod") => Environment::Production,
            Some("staging") | Some("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_overrides(lookup)
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        // Server overrides
        if let Some(v) = lookup("TODO_API_PORT").or_else(|| lookup("PORT")) {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }
        if let Some(v) = lookup("SECURITY_CORS_ORIGINS") {
            self.server.cors_origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // Store overrides
        if let Some(v) = lookup("TODO_STORE_BACKEND") {
            self.store.backend = v.parse().unwrap_or(self.store.backend);
        }
        if let Some(v) = lookup("TABLE_NAME") {
            self.store.table_name = v;
        }
        if let Some(v) = lookup("TODO_OWNER_INDEX") {
            self.store.owner_index = v;
        }
        if let Some(v) = lookup("AWS_REGION") {
            self.store.region = v;
        }
        if let Some(v) = lookup("DYNAMODB_ENDPOINT_URL") {
            self.store.endpoint_url = Some(v);
        }
        if let Some(v) = lookup("DATABASE_URL") {
            self.store.database_url = Some(v);
        }
        if let Some(v) = lookup("DATABASE_MAX_CONNECTIONS") {
            self.store.max_connections = v.parse().unwrap_or(self.store.max_connections);
        }
        if let Some(v) = lookup("TODO_STORE_PAGE_SIZE") {
            self.store.page_size = v.parse().ok().filter(|n: &u32| *n > 0);
        }
        if let Some(v) = lookup("TODO_ID_STRATEGY") {
            self.store.id_strategy = match v.as_str() {
                "uuid" => IdStrategy::Uuid,
                "timestamp" => IdStrategy::Timestamp,
                _ => self.store.id_strategy,
            };
        }

        // Auth overrides
        if let Some(v) = lookup("AUTH_ISSUER") {
            self.auth.issuer = Some(v);
        }
        if let Some(v) = lookup("AUTH_AUDIENCE") {
            self.auth.audience = Some(v);
        }
        if let Some(v) = lookup("AUTH_JWKS_URL") {
            self.auth.jwks_url = Some(v);
        }
        if let Some(v) = lookup("AUTH_JWKS_PATH") {
            self.auth.jwks_path = Some(v);
        }
        if let Some(v) = lookup("AUTH_HS256_SECRET") {
            self.auth.hs256_secret = Some(v);
        }
        if let Some(v) = lookup("AUTH_LEEWAY_SECS") {
            self.auth.leeway_secs = v.parse().unwrap_or(self.auth.leeway_secs);
        }

        // Access overrides
        if let Some(v) = lookup("TODO_OWNERSHIP_MISMATCH") {
            self.access.ownership_mismatch = match v.as_str() {
                "not_found" | "not-found" | "404" => OwnershipPolicy::ConcealExistence,
                "observed" => OwnershipPolicy::Observed,
                _ => self.access.ownership_mismatch,
            };
        }

        self
    }

    /// Settings that must be set in this environment but are not. Outside
    /// development every token must be bound to an issuer and an audience.
    pub fn missing_settings(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.environment != Environment::Development {
            if self.auth.issuer.is_none() {
                missing.push("AUTH_ISSUER");
            }
            if self.auth.audience.is_none() {
                missing.push("AUTH_AUDIENCE");
            }
        }
        missing
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                port: 3000,
                cors_origins: vec!["*".to_string()],
            },
            store: StoreConfig::default(),
            auth: AuthConfig {
                leeway_secs: 60,
                ..AuthConfig::default()
            },
            access: AccessConfig {
                ownership_mismatch: OwnershipPolicy::Observed,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            server: ServerConfig {
                port: 3000,
                cors_origins: vec!["*".to_string()],
            },
            store: StoreConfig {
                backend: StoreBackend::DynamoDb,
                ..StoreConfig::default()
            },
            auth: AuthConfig {
                leeway_secs: 30,
                ..AuthConfig::default()
            },
            access: AccessConfig {
                ownership_mismatch: OwnershipPolicy::Observed,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            server: ServerConfig {
                port: 3000,
                cors_origins: vec!["*".to_string()],
            },
            store: StoreConfig {
                backend: StoreBackend::DynamoDb,
                max_connections: 50,
                ..StoreConfig::default()
            },
            auth: AuthConfig {
                leeway_secs: 30,
                ..AuthConfig::default()
            },
            access: AccessConfig {
                ownership_mismatch: OwnershipPolicy::Observed,
            },
        }
    }
}

// Global singleton config for the binaries - the service itself receives
// everything it needs at construction
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

pub fn config() -> &'static AppConfig {
    &CONFIG
}
