use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub migration: MigrationConfig,
    pub resolver: ResolverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Upper bound on tenants migrated in parallel. Kept low so a run
    /// cannot saturate the database server's connection limit.
    pub concurrency: usize,
    /// Deadline for one tenant's full step sequence, in seconds.
    pub tenant_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Tenant schemas probed in parallel during a federated lookup.
    pub scan_concurrency: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }
        if let Ok(v) = env::var("MIGRATION_CONCURRENCY") {
            self.migration.concurrency = v.parse().unwrap_or(self.migration.concurrency);
        }
        if let Ok(v) = env::var("MIGRATION_TENANT_TIMEOUT_SECS") {
            self.migration.tenant_timeout_secs =
                v.parse().unwrap_or(self.migration.tenant_timeout_secs);
        }
        if let Ok(v) = env::var("RESOLVER_SCAN_CONCURRENCY") {
            self.resolver.scan_concurrency = v.parse().unwrap_or(self.resolver.scan_concurrency);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                max_connections: 10,
                connection_timeout: 30,
            },
            migration: MigrationConfig {
                concurrency: 4,
                tenant_timeout_secs: 120,
            },
            resolver: ResolverConfig { scan_concurrency: 4 },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                max_connections: 20,
                connection_timeout: 10,
            },
            migration: MigrationConfig {
                concurrency: 8,
                tenant_timeout_secs: 300,
            },
            resolver: ResolverConfig { scan_concurrency: 8 },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                max_connections: 50,
                connection_timeout: 5,
            },
            migration: MigrationConfig {
                concurrency: 8,
                tenant_timeout_secs: 600,
            },
            resolver: ResolverConfig { scan_concurrency: 8 },
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}
