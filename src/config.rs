use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub certs_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub google: GoogleConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let google = GoogleConfig {
            client_id: std::env::var("GOOGLE_CLIENT_ID")?,
            certs_url: std::env::var("GOOGLE_CERTS_URL")
                .unwrap_or_else(|_| "https://www.googleapis.com/oauth2/v3/certs".into()),
        };
        Ok(Self {
            database_url,
            google,
        })
    }
}
