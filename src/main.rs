use anyhow::{Context as _, Result};
use bcconnect_auth::{EntraEndpoints, LoopbackCodeSource, PastedRedirectSource, TokenStore};
use bcconnect_client::{
    Company, Customer, Item, ODataQuery, Record, ReqwestTransport, RestClient, SalesOrder, Vendor,
};
use bcconnect_config::{Config, LogConfig, LogFormat};
use bcconnect_store::SqliteSecureStore;
use bcconnect_types::{AuthorizationCodeSource, Clock as _, SystemClock};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bcconnect", version, about = "bcconnect: Business Central from the terminal")]
struct Cli {
    /// Path to the YAML configuration file (default: ~/.bcconnect/config.yaml if present).
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,
    /// Override the configured company id.
    #[arg(long, global = true)]
    company: Option<String>,
    /// Print the sign-in URL instead of opening a browser.
    #[arg(long, global = true)]
    no_browser: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign in interactively and store the credentials.
    Login,
    /// Remove stored credentials.
    Logout,
    /// Show tenant and sign-in state.
    Status,
    /// List the environments of the signed-in tenant.
    Environments,
    /// GET an endpoint relative to the tenant's API root and print the JSON.
    Get {
        /// e.g. `companies` or `companies(<id>)/items(<id>)`.
        endpoint: String,
        /// Decode as a collection and follow one `@odata.nextLink`.
        #[arg(long)]
        paged: bool,
    },
    /// List records of a standard entity set.
    List {
        entity: Entity,
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Download binary content (e.g. an item picture) to a file.
    Download {
        /// Absolute URL or endpoint relative to the API root.
        url: String,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Entity {
    Companies,
    Customers,
    Vendors,
    Items,
    SalesOrders,
}

#[derive(clap::Args, Debug, Default)]
struct QueryArgs {
    /// `$filter` expression.
    #[arg(long)]
    filter: Option<String>,
    /// Comma-separated `$select` fields.
    #[arg(long, value_delimiter = ',')]
    select: Vec<String>,
    /// `$orderby` key, repeatable.
    #[arg(long)]
    orderby: Vec<String>,
    #[arg(long)]
    top: Option<u32>,
    #[arg(long)]
    skip: Option<u32>,
}

impl QueryArgs {
    fn to_query(&self) -> ODataQuery {
        let mut q = ODataQuery::new().select(self.select.iter().cloned());
        if let Some(filter) = &self.filter {
            q = q.filter(filter.clone());
        }
        for key in &self.orderby {
            q = q.orderby(key.clone());
        }
        if let Some(top) = self.top {
            q = q.top(top);
        }
        if let Some(skip) = self.skip {
            q = q.skip(skip);
        }
        q
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    init_tracing(&config.log);
    if let Some(company) = cli.company {
        config.tenant.company_id = Some(company);
    }

    let app = App::open(config, cli.no_browser).await?;
    match cli.command {
        Commands::Login => app.login().await,
        Commands::Logout => app.logout().await,
        Commands::Status => {
            app.status();
            Ok(())
        }
        Commands::Environments => print_json(&app.client.environments().await?),
        Commands::Get { endpoint, paged } => app.get(&endpoint, paged).await,
        Commands::List { entity, query } => app.list(entity, &query.to_query()).await,
        Commands::Download { url, output } => app.download(&url, output).await,
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let default_path = default_config_path();
    let path = path.or_else(|| default_path.as_deref().filter(|p| p.exists()));
    Config::load(path).map_err(|e| anyhow::anyhow!("config error: {e}"))
}

fn default_config_path() -> Option<PathBuf> {
    let home = std::env::var("HOME").ok()?;
    Some(PathBuf::from(home).join(".bcconnect").join("config.yaml"))
}

/// `RUST_LOG` wins over the configured level. Logs go to stderr so that
/// stdout stays machine-readable.
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

struct App {
    config: Config,
    tokens: Arc<TokenStore>,
    client: RestClient,
}

impl App {
    async fn open(config: Config, no_browser: bool) -> Result<Self> {
        let http = Arc::new(ReqwestTransport::new(config.request_timeout())?);
        let secure = Arc::new(open_store(&config).await?);
        let endpoints = EntraEndpoints::new(&config.auth_base, &config.tenant, config.scope())
            .context("tenant configuration")?;

        let redirect = config.tenant.redirect_uri.clone();
        let code_source: Arc<dyn AuthorizationCodeSource> =
            if bcconnect_auth::is_loopback_redirect(&redirect) {
                let source = LoopbackCodeSource::new(redirect);
                Arc::new(if no_browser { source.without_browser() } else { source })
            } else {
                Arc::new(PastedRedirectSource)
            };

        let tokens = Arc::new(TokenStore::load(endpoints, http.clone(), secure, code_source).await);
        let client = RestClient::new(&config.api_base, config.tenant.clone(), tokens.clone(), http);
        Ok(Self {
            config,
            tokens,
            client,
        })
    }

    async fn login(&self) -> Result<()> {
        let token = self.tokens.authenticate().await.context("login failed")?;
        eprintln!(
            "signed in to {} ({}), token valid for {}s",
            self.config.tenant.tenant_id,
            self.config.tenant.environment,
            token.expires_at.saturating_sub(SystemClock.now())
        );
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.tokens.logout().await.context("logout failed")?;
        eprintln!("signed out");
        Ok(())
    }

    fn status(&self) {
        let tenant = &self.config.tenant;
        println!("tenant:      {}", tenant.tenant_id);
        println!("environment: {}", tenant.environment);
        println!(
            "company:     {}",
            tenant
                .company_name
                .as_deref()
                .or(tenant.company_id.as_deref())
                .unwrap_or("-")
        );
        let state = match self.tokens.current_token() {
            Some(t) if t.is_fresh_at(SystemClock.now()) => "authenticated",
            _ if self.tokens.is_authenticated() => "authenticated (token will be refreshed)",
            _ => "not authenticated",
        };
        println!("status:      {state}");
    }

    async fn get(&self, endpoint: &str, paged: bool) -> Result<()> {
        let value = if paged {
            serde_json::Value::Array(self.client.fetch_paged::<serde_json::Value>(endpoint).await?)
        } else {
            self.client.fetch::<serde_json::Value>(endpoint).await?
        };
        print_json(&value)
    }

    async fn list(&self, entity: Entity, query: &ODataQuery) -> Result<()> {
        match entity {
            Entity::Companies => self.print_records::<Company>(query).await,
            Entity::Customers => self.print_records::<Customer>(query).await,
            Entity::Vendors => self.print_records::<Vendor>(query).await,
            Entity::Items => self.print_records::<Item>(query).await,
            Entity::SalesOrders => self.print_records::<SalesOrder>(query).await,
        }
    }

    async fn print_records<R: Record + Serialize>(&self, query: &ODataQuery) -> Result<()> {
        let records: Vec<R> = self.client.list(query).await?;
        tracing::debug!(entity = R::ENTITY_SET, count = records.len(), "listed");
        print_json(&records)
    }

    async fn download(&self, url: &str, output: PathBuf) -> Result<()> {
        let bytes = self.client.authorized_data(url).await?;
        tokio::fs::write(&output, &bytes)
            .await
            .with_context(|| format!("cannot write {}", output.display()))?;
        eprintln!("wrote {} bytes to {}", bytes.len(), output.display());
        Ok(())
    }
}

async fn open_store(config: &Config) -> Result<SqliteSecureStore> {
    let path = config.store.database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let url = format!("sqlite://{}", path.display());
    SqliteSecureStore::new(&url, config.store.service.clone())
        .await
        .map_err(|e| anyhow::anyhow!("database error: {e}"))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
