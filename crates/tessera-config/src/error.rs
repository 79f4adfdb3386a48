use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading tessera config: {0}")]
    Read(#[source] std::io::Error),

    #[error("writing tessera config: {0}")]
    Write(#[source] std::io::Error),

    #[error("malformed tessera config: {0}")]
    Parse(#[source] ron::error::SpannedError),

    #[error("encoding tessera config: {0}")]
    Serialize(#[source] ron::Error),

    /// A value is outside its accepted range. `field` is the dotted path.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
