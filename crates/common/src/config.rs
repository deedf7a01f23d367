use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::telemetry::TelemetryConfig;

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Build database URL from configuration
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            database: "products".to_string(),
            max_connections: 10,
        }
    }
}

/// Redis cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub ttl_seconds: u64,
}

impl RedisConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            ttl_seconds: 300,
        }
    }
}

/// Broker acknowledgment level required before a publish counts as durable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Acks {
    None,
    Leader,
    All,
}

impl Acks {
    /// Value of the librdkafka `acks` property
    pub fn as_kafka_value(&self) -> &'static str {
        match self {
            Acks::None => "0",
            Acks::Leader => "1",
            Acks::All => "all",
        }
    }
}

impl FromStr for Acks {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "0" => Ok(Acks::None),
            "leader" | "1" => Ok(Acks::Leader),
            "all" | "-1" => Ok(Acks::All),
            other => Err(format!("unknown acks level: {}", other)),
        }
    }
}

/// Kafka configuration shared by the publisher and the consumer group
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    pub created_topic: String,
    pub updated_topic: String,
    pub dead_letter_topic: String,
    pub group_id: String,
    pub acks: Acks,
    pub publish_retries: u32,
    pub message_timeout_ms: u64,
    pub max_in_flight: usize,
    pub batch_size: usize,
    pub batch_wait_ms: u64,
    pub max_attempts: u32,
}

/// Lower bound for the per-attempt delivery timeout
const MIN_MESSAGE_TIMEOUT_MS: u64 = 100;

impl KafkaConfig {
    pub fn publish_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.publish_retries,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }

    /// Worst-case duration of one publish: every attempt running into the
    /// delivery timeout, plus the backoff between attempts
    pub fn publish_budget(&self) -> Duration {
        let policy = self.publish_retry_policy();
        let backoff: Duration = (1..=policy.max_retries).map(|r| policy.backoff(r)).sum();
        self.message_timeout() * (policy.max_retries + 1) + backoff
    }

    /// Shrink the per-attempt delivery timeout until the whole retry loop
    /// fits in `budget`. The request deadline wraps the publish, so a longer
    /// timeout would let the deadline fire before any retry ran.
    pub fn fit_publish_budget(&mut self, budget: Duration) {
        if self.publish_budget() <= budget {
            return;
        }

        let policy = self.publish_retry_policy();
        let backoff: Duration = (1..=policy.max_retries).map(|r| policy.backoff(r)).sum();
        let per_attempt =
            budget.saturating_sub(backoff).as_millis() as u64 / (u64::from(policy.max_retries) + 1);
        let fitted = per_attempt.max(MIN_MESSAGE_TIMEOUT_MS);

        tracing::warn!(
            configured_ms = self.message_timeout_ms,
            fitted_ms = fitted,
            budget_ms = budget.as_millis() as u64,
            "Kafka message timeout does not fit the request timeout, shrinking it"
        );
        self.message_timeout_ms = fitted;
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn batch_wait(&self) -> Duration {
        Duration::from_millis(self.batch_wait_ms)
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            created_topic: "product.created".to_string(),
            updated_topic: "product.updated".to_string(),
            dead_letter_topic: "product.dead-letter".to_string(),
            group_id: "product_group".to_string(),
            acks: Acks::Leader,
            publish_retries: 3,
            message_timeout_ms: 1000,
            max_in_flight: 64,
            batch_size: 50,
            batch_wait_ms: 200,
            max_attempts: 5,
        }
    }
}

/// Knobs of the product consistency protocol
#[derive(Debug, Clone, Deserialize)]
pub struct ConsistencyConfig {
    pub conflict_retries: u32,
    pub request_timeout_ms: u64,
    pub cache_ttl_seconds: u64,
}

impl ConsistencyConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            conflict_retries: 3,
            request_timeout_ms: 5000,
            cache_ttl_seconds: 300,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub consistency: ConsistencyConfig,
    pub http_port: u16,
    /// Port of the consumer's Prometheus listener
    pub metrics_port: u16,
    pub telemetry: TelemetryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let database = DatabaseConfig::default();
        Self {
            database_url: database.url(),
            database,
            redis: RedisConfig::default(),
            kafka: KafkaConfig::default(),
            consistency: ConsistencyConfig::default(),
            http_port: 5000,
            metrics_port: 9100,
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment (and `.env`), falling back to defaults
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut database = defaults.database;
        database.max_connections = parse_or(get("DATABASE_MAX_CONNECTIONS"), database.max_connections);
        let database_url = get("DATABASE_URL").unwrap_or_else(|| database.url());

        let cache_ttl_seconds = parse_or(get("CACHE_TTL_SECONDS"), defaults.redis.ttl_seconds);
        let redis = RedisConfig {
            url: get("REDIS_URL").unwrap_or(defaults.redis.url),
            ttl_seconds: cache_ttl_seconds,
        };

        let kafka_defaults = defaults.kafka;
        let mut kafka = KafkaConfig {
            brokers: get("KAFKA_BROKERS").unwrap_or(kafka_defaults.brokers),
            created_topic: get("KAFKA_CREATED_TOPIC").unwrap_or(kafka_defaults.created_topic),
            updated_topic: get("KAFKA_UPDATED_TOPIC").unwrap_or(kafka_defaults.updated_topic),
            dead_letter_topic: get("KAFKA_DEAD_LETTER_TOPIC")
                .unwrap_or(kafka_defaults.dead_letter_topic),
            group_id: get("KAFKA_GROUP_ID").unwrap_or(kafka_defaults.group_id),
            acks: parse_or(get("KAFKA_ACKS"), kafka_defaults.acks),
            publish_retries: parse_or(get("KAFKA_PUBLISH_RETRIES"), kafka_defaults.publish_retries),
            message_timeout_ms: parse_or(
                get("KAFKA_MESSAGE_TIMEOUT_MS"),
                kafka_defaults.message_timeout_ms,
            ),
            max_in_flight: parse_or(get("KAFKA_MAX_IN_FLIGHT"), kafka_defaults.max_in_flight),
            batch_size: parse_or(get("CONSUMER_BATCH_SIZE"), kafka_defaults.batch_size),
            batch_wait_ms: parse_or(get("CONSUMER_BATCH_WAIT_MS"), kafka_defaults.batch_wait_ms),
            max_attempts: parse_or(get("CONSUMER_MAX_ATTEMPTS"), kafka_defaults.max_attempts),
        };

        let consistency = ConsistencyConfig {
            conflict_retries: parse_or(
                get("CONFLICT_RETRIES"),
                defaults.consistency.conflict_retries,
            ),
            request_timeout_ms: parse_or(
                get("REQUEST_TIMEOUT_MS"),
                defaults.consistency.request_timeout_ms,
            ),
            cache_ttl_seconds,
        };
        kafka.fit_publish_budget(consistency.request_timeout());

        let telemetry = TelemetryConfig {
            service_name: get("SERVICE_NAME").unwrap_or(defaults.telemetry.service_name),
            log_level: get("RUST_LOG").unwrap_or(defaults.telemetry.log_level),
            jaeger_endpoint: get("JAEGER_ENDPOINT").or(defaults.telemetry.jaeger_endpoint),
            enable_jaeger: parse_or(get("ENABLE_JAEGER"), defaults.telemetry.enable_jaeger),
        };

        Self {
            database_url,
            database,
            redis,
            kafka,
            consistency,
            http_port: parse_or(get("HTTP_PORT"), defaults.http_port),
            metrics_port: parse_or(get("METRICS_PORT"), defaults.metrics_port),
            telemetry,
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    match value {
        Some(raw) => match raw.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!(value = %raw, "Ignoring unparsable configuration value");
                default
            }
        },
        None => default,
    }
}
