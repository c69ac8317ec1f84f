//! Database connection management.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::secrets::{get_database_credentials, DatabaseCredentials};
use crate::{Config, Error, Result};

/// Build the Postgres URL, letting the secret override host, port and name.
pub fn database_url(config: &Config, creds: &DatabaseCredentials) -> String {
    format!(
        "postgres://{}:{}@{}:{}/{}",
        creds.username,
        creds.password,
        creds.host.as_deref().unwrap_or(&config.db_host),
        creds.port.unwrap_or(config.db_port),
        creds.dbname.as_deref().unwrap_or(&config.db_name),
    )
}

/// Create a database connection pool.
pub async fn create_pool(config: &Config, creds: &DatabaseCredentials) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&database_url(config, creds))
        .await
        .map_err(Error::Database)?;

    Ok(pool)
}

/// Resolve credentials from Secrets Manager and connect.
pub async fn connect(config: &Config) -> Result<PgPool> {
    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.aws_region.clone()))
        .load()
        .await;
    let secrets_client = aws_sdk_secretsmanager::Client::new(&aws_config);

    let creds = get_database_credentials(&secrets_client, &config.db_secret_arn).await?;
    let pool = create_pool(config, &creds).await?;

    info!(host = %config.db_host, db = %config.db_name, "Database pool ready");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            db_host: "db.internal".to_string(),
            db_port: 5432,
            db_name: "crew_marketplace".to_string(),
            db_secret_arn: "arn".to_string(),
            db_max_connections: 5,
            aws_region: "us-east-1".to_string(),
        }
    }

    #[test]
    fn test_url_from_config() {
        let creds = DatabaseCredentials {
            username: "crew_api".to_string(),
            password: "pw".to_string(),
            host: None,
            port: None,
            dbname: None,
        };
        assert_eq!(
            database_url(&config(), &creds),
            "postgres://crew_api:pw@db.internal:5432/crew_marketplace"
        );
    }

    #[test]
    fn test_secret_overrides_config() {
        let creds = DatabaseCredentials {
            username: "crew_api".to_string(),
            password: "pw".to_string(),
            host: Some("replica.internal".to_string()),
            port: Some(6432),
            dbname: Some("crew".to_string()),
        };
        assert_eq!(
            database_url(&config(), &creds),
            "postgres://crew_api:pw@replica.internal:6432/crew"
        );
    }
}
