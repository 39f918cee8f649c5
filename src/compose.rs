use docker_compose_types::{
    Compose, ComposeNetworks, ComposeVolume, DependsCondition, DependsOnOptions, Environment,
    Healthcheck, HealthcheckTest, Labels, MapOrEmpty, NetworkSettings, Networks, Ports, Service,
    Services, TopLevelVolumes, Volumes,
};
use indexmap::IndexMap;

use crate::config::Configuration;
use crate::error::DeployResult;
use crate::layout::DATA_DIR_NAME;

pub const POSTGRES_SERVICE: &str = "postgres";
pub const N8N_SERVICE: &str = "n8n";
pub const POSTGRES_IMAGE: &str = "postgres:16-alpine";
pub const N8N_IMAGE: &str = "docker.n8n.io/n8nio/n8n:latest";
/// Port n8n listens on inside its container.
pub const N8N_CONTAINER_PORT: u16 = 5678;

const NETWORK: &str = "n8n-network";
const POSTGRES_VOLUME: &str = "postgres_data";

/// The service set handed to docker compose.
#[derive(Debug, Clone)]
pub struct StackDescriptor {
    compose: Compose,
}

impl StackDescriptor {
    #[must_use]
    pub const fn compose(&self) -> &Compose {
        &self.compose
    }

    /// Service names in startup-independent declaration order.
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.compose.services.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.compose.services.0.get(name).and_then(Option::as_ref)
    }

    pub fn to_yaml(&self) -> DeployResult<String> {
        Ok(serde_yaml::to_string(&self.compose)?)
    }
}

/// Build the stack descriptor for `config`.
///
/// Pure and deterministic: secrets are not embedded but referenced as
/// `${KEY}` and interpolated by docker compose from the env file next
/// to the compose file. n8n waits on the database healthcheck rather
/// than a fixed delay.
pub fn render(config: &Configuration) -> DeployResult<StackDescriptor> {
    config.validate()?;

    let mut services = IndexMap::new();
    services.insert(POSTGRES_SERVICE.to_string(), Some(postgres_service()));
    services.insert(N8N_SERVICE.to_string(), Some(n8n_service(config)));

    let compose = Compose {
        services: Services(services),
        volumes: top_level_volumes(),
        networks: network(),
        ..Default::default()
    };

    Ok(StackDescriptor { compose })
}

fn env_list(pairs: &[(&str, &str)]) -> Environment {
    Environment::List(pairs.iter().map(|(k, v)| format!("{k}={v}")).collect())
}

fn postgres_service() -> Service {
    Service {
        image: Some(POSTGRES_IMAGE.to_string()),
        container_name: Some("n8n-postgres".to_string()),
        restart: Some("unless-stopped".to_string()),
        environment: env_list(&[
            ("POSTGRES_USER", "${POSTGRES_USER}"),
            ("POSTGRES_PASSWORD", "${POSTGRES_PASSWORD}"),
            ("POSTGRES_DB", "${POSTGRES_DB}"),
        ]),
        volumes: vec![Volumes::Simple(format!(
            "{POSTGRES_VOLUME}:/var/lib/postgresql/data"
        ))],
        // `$$` escapes compose interpolation; the container shell
        // expands the variables.
        healthcheck: Some(Healthcheck {
            test: Some(HealthcheckTest::Multiple(vec![
                "CMD-SHELL".to_string(),
                "pg_isready -U \"$${POSTGRES_USER}\" -d \"$${POSTGRES_DB}\"".to_string(),
            ])),
            interval: Some("10s".to_string()),
            timeout: Some("5s".to_string()),
            retries: 5,
            start_period: Some("10s".to_string()),
            ..Default::default()
        }),
        networks: Networks::Simple(vec![NETWORK.to_string()]),
        ..Default::default()
    }
}

fn n8n_service(config: &Configuration) -> Service {
    let mut depends = IndexMap::new();
    depends.insert(
        POSTGRES_SERVICE.to_string(),
        DependsCondition::service_healthy(),
    );

    let container_port = N8N_CONTAINER_PORT.to_string();

    Service {
        image: Some(N8N_IMAGE.to_string()),
        container_name: Some("n8n".to_string()),
        restart: Some("unless-stopped".to_string()),
        // Loopback only: the reverse proxy is the public entry point.
        ports: Ports::Short(vec![format!(
            "127.0.0.1:{}:{N8N_CONTAINER_PORT}",
            config.port
        )]),
        environment: env_list(&[
            ("DB_TYPE", "postgresdb"),
            ("DB_POSTGRESDB_HOST", POSTGRES_SERVICE),
            ("DB_POSTGRESDB_PORT", "5432"),
            ("DB_POSTGRESDB_DATABASE", "${POSTGRES_DB}"),
            ("DB_POSTGRESDB_USER", "${POSTGRES_USER}"),
            ("DB_POSTGRESDB_PASSWORD", "${POSTGRES_PASSWORD}"),
            ("N8N_HOST", "${N8N_HOST}"),
            ("N8N_PORT", &container_port),
            ("N8N_PROTOCOL", "${N8N_PROTOCOL}"),
            ("WEBHOOK_URL", "${WEBHOOK_URL}"),
            ("GENERIC_TIMEZONE", "${GENERIC_TIMEZONE}"),
            ("TZ", "${GENERIC_TIMEZONE}"),
            ("N8N_ENCRYPTION_KEY", "${N8N_ENCRYPTION_KEY}"),
            ("N8N_PROXY_HOPS", "1"),
        ]),
        volumes: vec![Volumes::Simple(format!("./{DATA_DIR_NAME}:/home/node/.n8n"))],
        depends_on: DependsOnOptions::Conditional(depends),
        networks: Networks::Simple(vec![NETWORK.to_string()]),
        ..Default::default()
    }
}

fn top_level_volumes() -> TopLevelVolumes {
    let mut vols = IndexMap::new();
    vols.insert(
        POSTGRES_VOLUME.to_string(),
        MapOrEmpty::Map(ComposeVolume {
            driver: Some("local".to_string()),
            driver_opts: IndexMap::new(),
            external: None,
            labels: Labels::default(),
            name: None,
        }),
    );
    TopLevelVolumes(vols)
}

fn network() -> ComposeNetworks {
    let mut nets = IndexMap::new();
    nets.insert(
        NETWORK.to_string(),
        MapOrEmpty::Map(NetworkSettings {
            driver: Some("bridge".to_string()),
            ..Default::default()
        }),
    );
    ComposeNetworks(nets)
}
