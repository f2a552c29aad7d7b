//! Command-line interface for Switchboard

use clap::{Parser, Subcommand};

/// Classifies chat requests and dispatches them to resilient LLM specialists
#[derive(Parser)]
#[command(name = "switchboard")]
#[command(version)]
#[command(about = "Classifies chat requests and dispatches them to resilient LLM specialists")]
#[command(
    long_about = "Switchboard classifies each chat message into a task category and answers it \
    with that category's specialist, trying cloud provider A, cloud provider B and a local \
    model in order, with per-provider circuit breakers and a general-chat fallback."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP server (default)
    Serve,

    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Answer a single message and print the result
    Ask {
        /// The message to send
        message: String,

        /// Print the routing decision and provider before the answer
        #[arg(short, long)]
        verbose: bool,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# Switchboard Configuration
# ==========================

# ─────────────────────────────────────────────────────────────────────────────
# SERVER
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"
port = 3000

# Default bound for every provider call, in seconds (1-300).
# Providers may override it with their own timeout_seconds.
request_timeout_seconds = 30

[chat]
# Longest accepted message, in characters
max_message_chars = 8000

# ─────────────────────────────────────────────────────────────────────────────
# PROVIDERS
# ─────────────────────────────────────────────────────────────────────────────
#
# Providers are tried in the fixed order primary → secondary → local.
# Every slot is optional, but at least one must be configured.
#
# Endpoint fields:
#   - name: Model identifier sent to the OpenAI-compatible API
#   - base_url: API base URL (must end with /v1)
#   - api_key_env: Environment variable holding the bearer token (optional)
#   - max_tokens: Maximum tokens for generation (default 2048)
#   - temperature: Default sampling temperature, 0.0-2.0 (default 0.7)
#   - timeout_seconds: Override of server.request_timeout_seconds (optional)

[providers.primary]
name = "gpt-4o-mini"
base_url = "https://api.openai.com/v1"
api_key_env = "OPENAI_API_KEY"

[providers.secondary]
name = "llama-3.3-70b-versatile"
base_url = "https://api.groq.com/openai/v1"
api_key_env = "GROQ_API_KEY"

# The local model has no circuit breaker. It is loaded on first use; if it
# cannot be loaded, requests that reach it fail until the server restarts.
[providers.local]
name = "qwen2.5-7b-instruct"
base_url = "http://127.0.0.1:11434/v1"
timeout_seconds = 120

# ─────────────────────────────────────────────────────────────────────────────
# CLASSIFIER
# ─────────────────────────────────────────────────────────────────────────────

[classifier]
# Which provider slot classifies messages: "primary", "secondary" or "local"
provider = "primary"
# Low temperature keeps routing close to deterministic
temperature = 0.1
timeout_seconds = 10

# ─────────────────────────────────────────────────────────────────────────────
# RESILIENCE
# ─────────────────────────────────────────────────────────────────────────────

[breaker]
# Consecutive failures before a cloud provider is skipped
failure_threshold = 5
# How long it is skipped before being probed again
open_duration_seconds = 60
# Successful probes needed to trust it again
half_open_successes_required = 1

[retry]
# Attempts per provider call for rate limits and timeouts (backoff 1s, 2s, 4s...)
max_attempts = 3
base_backoff_ms = 1000

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error" (RUST_LOG overrides)
log_level = "info"

# Prometheus metrics are always available at /metrics on the server port
"#
}
