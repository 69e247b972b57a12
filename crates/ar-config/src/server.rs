use serde::Deserialize;

/// Ingest listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address for the framed-JSON ingest receiver, `tcp://host:port`.
    pub listen: String,
    /// Bounded capacity of the ingest → pipeline channel.
    #[serde(default = "default_ingest_buffer")]
    pub ingest_buffer: usize,
}

fn default_ingest_buffer() -> usize {
    256
}
